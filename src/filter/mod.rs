//! Filter expressions admitted in the `filter` query parameter.
//!
//! The grammar is a small CQL-like subset: comparisons, `LIKE`, null tests,
//! `IN` lists and the logical connectives. [`parse`] produces a [`Predicate`]
//! tree which is checked against a [`Collection`] and rendered into SQL by
//! [`Predicate::to_sql`]. Literals never reach the SQL text; every one of them
//! becomes a positional parameter.

mod parser;

use crate::conversions::{parse_timestamp, value_to_sql};
use crate::error::{InvalidRequest, Result};
use crate::ident::{is_plain_identifier, quote_catalog_identifier};
use crate::types::{Collection, ColumnSpec, ColumnType, Value};
use std::fmt;

pub use parser::parse;

/// A literal on the right-hand side of a comparison.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Integer(i64),
    Floating(f64),
    String(String),
    Boolean(bool),
    Null,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl CompareOp {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
        }
    }
}

/// Parsed filter tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    Compare {
        property: String,
        op: CompareOp,
        literal: Literal,
    },
    IsNull {
        property: String,
        negated: bool,
    },
    In {
        property: String,
        literals: Vec<Literal>,
    },
    Not(Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    /// Names of all properties referenced by the tree, left to right.
    pub fn properties(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_properties(&mut names);
        names
    }

    fn collect_properties<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Self::Compare { property, .. }
            | Self::IsNull { property, .. }
            | Self::In { property, .. } => names.push(property),
            Self::Not(inner) => inner.collect_properties(names),
            Self::And(left, right) | Self::Or(left, right) => {
                left.collect_properties(names);
                right.collect_properties(names);
            }
        }
    }

    /// Render the tree as a SQL boolean expression against `collection`.
    ///
    /// Every node is wrapped in parentheses. Literal values are coerced to the
    /// column's semantic type and appended to `params` in the order their
    /// placeholders appear.
    pub fn to_sql(
        &self,
        collection: &Collection,
        params: &mut Vec<rusqlite::types::Value>,
    ) -> Result<String> {
        match self {
            Self::Compare {
                property,
                op,
                literal,
            } => {
                let spec = resolve(collection, property)?;
                if *op == CompareOp::Like {
                    check_like(spec, literal)?;
                }
                let value = coerce(spec, literal)?;
                params.push(value_to_sql(&value));
                Ok(format!(
                    "({} {} ?)",
                    quote_catalog_identifier(&spec.name)?,
                    op.as_sql()
                ))
            }
            Self::IsNull { property, negated } => {
                let spec = resolve(collection, property)?;
                let test = if *negated { "IS NOT NULL" } else { "IS NULL" };
                Ok(format!("({} {test})", quote_catalog_identifier(&spec.name)?))
            }
            Self::In { property, literals } => {
                let spec = resolve(collection, property)?;
                let mut placeholders = Vec::with_capacity(literals.len());
                for literal in literals {
                    let value = coerce(spec, literal)?;
                    params.push(value_to_sql(&value));
                    placeholders.push("?");
                }
                Ok(format!(
                    "({} IN ({}))",
                    quote_catalog_identifier(&spec.name)?,
                    placeholders.join(", ")
                ))
            }
            Self::Not(inner) => Ok(format!("(NOT {})", inner.to_sql(collection, params)?)),
            Self::And(left, right) => Ok(format!(
                "({} AND {})",
                left.to_sql(collection, params)?,
                right.to_sql(collection, params)?
            )),
            Self::Or(left, right) => Ok(format!(
                "({} OR {})",
                left.to_sql(collection, params)?,
                right.to_sql(collection, params)?
            )),
        }
    }
}

fn resolve<'a>(collection: &'a Collection, property: &str) -> Result<&'a ColumnSpec> {
    collection
        .property(property)
        .ok_or_else(|| InvalidRequest::UnknownProperty(property.to_string()).into())
}

fn mismatch(spec: &ColumnSpec, expected: &'static str, literal: &Literal) -> crate::error::Error {
    InvalidRequest::TypeMismatch {
        property: spec.name.clone(),
        expected,
        literal: literal.to_string(),
    }
    .into()
}

fn check_like(spec: &ColumnSpec, literal: &Literal) -> Result<()> {
    let text_column = matches!(
        spec.column_type,
        ColumnType::String | ColumnType::Json | ColumnType::Other
    );
    if text_column && matches!(literal, Literal::String(_)) {
        Ok(())
    } else {
        Err(mismatch(spec, "string", literal))
    }
}

/// Coerce a literal to the semantic type of `spec`.
fn coerce(spec: &ColumnSpec, literal: &Literal) -> Result<Value> {
    let expected = spec.column_type.as_str();
    let value = match (spec.column_type, literal) {
        (_, Literal::Null) => Value::Null,
        (ColumnType::Integer, Literal::Integer(i)) => Value::Integer(*i),
        (ColumnType::Integer, Literal::Floating(f))
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 =>
        {
            Value::Integer(*f as i64)
        }
        (ColumnType::Floating, Literal::Integer(i)) => Value::Floating(*i as f64),
        (ColumnType::Floating, Literal::Floating(f)) => Value::Floating(*f),
        (ColumnType::String | ColumnType::Json, Literal::String(s)) => Value::String(s.clone()),
        (ColumnType::Boolean, Literal::Boolean(b)) => Value::Boolean(*b),
        // bound verbatim so that it compares against the stored spelling
        (ColumnType::Timestamp, Literal::String(s)) if parse_timestamp(s).is_some() => {
            Value::String(s.clone())
        }
        (ColumnType::Other, Literal::Integer(i)) => Value::Integer(*i),
        (ColumnType::Other, Literal::Floating(f)) => Value::Floating(*f),
        (ColumnType::Other, Literal::String(s)) => Value::String(s.clone()),
        (ColumnType::Other, Literal::Boolean(b)) => Value::Boolean(*b),
        _ => return Err(mismatch(spec, expected, literal)),
    };
    Ok(value)
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            // Debug keeps a fractional part or exponent, so it re-parses as floating
            Self::Floating(v) => write!(f, "{v:?}"),
            Self::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Null => write!(f, "NULL"),
        }
    }
}

struct PropertyName<'a>(&'a str);

impl fmt::Display for PropertyName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if is_plain_identifier(self.0) && !parser::is_keyword(self.0) {
            write!(f, "{}", self.0)
        } else {
            write!(f, "\"{}\"", self.0.replace('"', "\"\""))
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare {
                property,
                op,
                literal,
            } => write!(f, "{} {} {literal}", PropertyName(property), op.as_sql()),
            Self::IsNull { property, negated } => {
                let test = if *negated { "IS NOT NULL" } else { "IS NULL" };
                write!(f, "{} {test}", PropertyName(property))
            }
            Self::In { property, literals } => {
                let items = literals
                    .iter()
                    .map(|literal| literal.to_string())
                    .collect::<Vec<String>>()
                    .join(", ");
                write!(f, "{} IN ({items})", PropertyName(property))
            }
            Self::Not(inner) => {
                f.write_str("NOT ")?;
                inner.fmt_operand(f, inner.binding() < NOT_BINDING)
            }
            Self::And(left, right) => {
                left.fmt_operand(f, left.binding() < AND_BINDING)?;
                f.write_str(" AND ")?;
                right.fmt_operand(f, right.binding() <= AND_BINDING)
            }
            Self::Or(left, right) => {
                left.fmt_operand(f, left.binding() < OR_BINDING)?;
                f.write_str(" OR ")?;
                right.fmt_operand(f, right.binding() <= OR_BINDING)
            }
        }
    }
}

const OR_BINDING: u8 = 1;
const AND_BINDING: u8 = 2;
const NOT_BINDING: u8 = 3;

impl Predicate {
    fn binding(&self) -> u8 {
        match self {
            Self::Or(..) => OR_BINDING,
            Self::And(..) => AND_BINDING,
            _ => NOT_BINDING,
        }
    }

    // Parentheses only where re-parsing would otherwise regroup; rendering
    // never nests deeper than the text it was parsed from.
    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>, parenthesize: bool) -> fmt::Result {
        if parenthesize {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}
