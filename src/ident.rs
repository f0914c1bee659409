//! Quoting of schema, table and column names before they reach SQL.

use crate::error::{InvalidRequest, Result};

const QUOTE: char = '"';

/// Whether `name` matches `[A-Za-z_][A-Za-z_0-9$]*`.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Quote an identifier that must stay within the plain identifier class.
pub fn quote_identifier(name: &str) -> Result<String> {
    if !is_plain_identifier(name) {
        return Err(InvalidRequest::InvalidIdentifier(name.to_string()).into());
    }
    Ok(wrap(name))
}

/// Quote an identifier reported by the database catalog.
///
/// Names discovered in the catalog may use the extended character set; they
/// are still rejected when empty or when they contain NUL.
pub fn quote_catalog_identifier(name: &str) -> Result<String> {
    if name.is_empty() || name.contains('\0') {
        return Err(InvalidRequest::InvalidIdentifier(name.to_string()).into());
    }
    Ok(wrap(name))
}

/// `"schema"."table"`, or just `"table"` when the schema is the default one.
pub(crate) fn quote_table(schema: &str, table: &str, qualify: bool) -> Result<String> {
    let table = quote_catalog_identifier(table)?;
    if qualify {
        Ok(format!("{}.{table}", quote_catalog_identifier(schema)?))
    } else {
        Ok(table)
    }
}

pub(crate) fn wrap(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push(QUOTE);
    for c in name.chars() {
        if c == QUOTE {
            quoted.push(QUOTE);
        }
        quoted.push(c);
    }
    quoted.push(QUOTE);
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn quotes_plain_identifiers() -> Result<()> {
        assert_eq!(quote_identifier("geom")?, r#""geom""#);
        assert_eq!(quote_identifier("_a$1")?, r#""_a$1""#);
        Ok(())
    }

    #[test]
    fn rejects_identifiers_outside_the_class() {
        for name in ["", "1abc", "a-b", "a b", "na\"me", "$x", "é"] {
            let err = quote_identifier(name).expect_err("should be rejected");
            assert!(matches!(
                err,
                Error::InvalidRequest(InvalidRequest::InvalidIdentifier(_))
            ));
        }
    }

    #[test]
    fn catalog_identifiers_double_embedded_quotes() -> Result<()> {
        assert_eq!(quote_catalog_identifier(r#"we"ird name"#)?, r#""we""ird name""#);
        assert!(quote_catalog_identifier("").is_err());
        assert!(quote_catalog_identifier("a\0b").is_err());
        Ok(())
    }

    #[test]
    fn qualifies_tables_outside_the_default_schema() -> Result<()> {
        assert_eq!(quote_table("public", "parks", true)?, r#""public"."parks""#);
        assert_eq!(quote_table("main", "parks", false)?, r#""parks""#);
        Ok(())
    }
}
