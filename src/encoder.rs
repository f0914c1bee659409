//! GeoJSON output for query results.
//!
//! [`FeatureWriter`] produces a feature collection in pieces so rows can be
//! sent as they arrive: [`FeatureWriter::header`], one
//! [`FeatureWriter::write_feature`] per row, then [`FeatureWriter::footer`].
//! A stream that stops early simply never gets its footer.

use crate::conversions::{format_timestamp, value_from_sql};
use crate::error::Result;
use crate::planner::PlannedColumn;
use crate::types::Value;
use serde::Serialize;
use serde_json::value::RawValue;

/// A hypermedia link in a response body.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Link {
    pub href: String,
    pub rel: String,
    #[serde(rename = "type")]
    pub media_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Link {
    pub fn new(href: impl Into<String>, rel: &str, media_type: &str) -> Self {
        Self {
            href: href.into(),
            rel: rel.to_string(),
            media_type: media_type.to_string(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// One decoded result row: column values in plan order, then the geometry.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureRow {
    pub values: Vec<Value>,
    /// GeoJSON geometry text; `None` for a NULL geometry.
    pub geometry: Option<String>,
}

impl FeatureRow {
    pub fn from_row(row: &rusqlite::Row<'_>, columns: &[PlannedColumn]) -> rusqlite::Result<Self> {
        let values = columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                row.get_ref(i)
                    .map(|value| value_from_sql(value, column.spec.column_type))
            })
            .collect::<rusqlite::Result<Vec<Value>>>()?;
        let geometry = row.get::<_, Option<String>>(columns.len())?;
        Ok(Self { values, geometry })
    }
}

/// Incremental writer of a `FeatureCollection`.
#[derive(Debug)]
pub struct FeatureWriter<'a> {
    columns: &'a [PlannedColumn],
    written: u64,
}

impl<'a> FeatureWriter<'a> {
    pub fn new(columns: &'a [PlannedColumn]) -> Self {
        Self {
            columns,
            written: 0,
        }
    }

    pub fn header(&self) -> &'static str {
        r#"{"type":"FeatureCollection","features":["#
    }

    /// Append one feature to `out`, preceded by a separator after the first.
    pub fn write_feature(&mut self, out: &mut String, row: &FeatureRow) -> Result<()> {
        if self.written > 0 {
            out.push(',');
        }
        write_feature_body(out, self.columns, row)?;
        out.push('}');
        self.written += 1;
        Ok(())
    }

    pub fn number_returned(&self) -> u64 {
        self.written
    }

    /// Close the feature array and the collection object.
    pub fn footer(&self, links: &[Link]) -> Result<String> {
        Ok(format!(
            r#"],"numberReturned":{},"links":{}}}"#,
            self.written,
            serde_json::to_string(links)?
        ))
    }
}

/// A single `Feature` document with its links.
pub fn encode_feature(columns: &[PlannedColumn], row: &FeatureRow, links: &[Link]) -> Result<String> {
    let mut out = String::new();
    write_feature_body(&mut out, columns, row)?;
    out.push_str(r#","links":"#);
    out.push_str(&serde_json::to_string(links)?);
    out.push('}');
    Ok(out)
}

/// Everything of a feature object except the closing brace.
fn write_feature_body(out: &mut String, columns: &[PlannedColumn], row: &FeatureRow) -> Result<()> {
    out.push_str(r#"{"type":"Feature""#);

    let key = columns
        .iter()
        .zip(&row.values)
        .find(|(column, _)| column.is_key)
        .map(|(_, value)| value);
    match key {
        None | Some(Value::Null) => {}
        Some(Value::Integer(id)) => {
            out.push_str(r#","id":"#);
            out.push_str(&id.to_string());
        }
        Some(value) => {
            out.push_str(r#","id":"#);
            out.push_str(&serde_json::to_string(&value_text(value))?);
        }
    }

    out.push_str(r#","geometry":"#);
    out.push_str(row.geometry.as_deref().unwrap_or("null"));

    out.push_str(r#","properties":{"#);
    let properties = columns
        .iter()
        .zip(&row.values)
        .filter(|(column, _)| column.is_property);
    for (i, (column, value)) in properties.enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&serde_json::to_string(&column.spec.name)?);
        out.push(':');
        write_value(out, value)?;
    }
    out.push('}');
    Ok(())
}

fn write_value(out: &mut String, value: &Value) -> Result<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Integer(i) => out.push_str(&i.to_string()),
        Value::Floating(f) => match serde_json::Number::from_f64(*f) {
            Some(n) => out.push_str(&n.to_string()),
            None => out.push_str("null"),
        },
        Value::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Json(text) => match serde_json::from_str::<&RawValue>(text) {
            Ok(raw) => out.push_str(raw.get()),
            Err(_) => out.push_str(&serde_json::to_string(text)?),
        },
        Value::String(_) | Value::Timestamp(_) | Value::Other(_) => {
            out.push_str(&serde_json::to_string(&value_text(value))?)
        }
    }
    Ok(())
}

/// Plain text rendering used for string-typed output.
fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Floating(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Timestamp(ts) => format_timestamp(ts),
        Value::String(s) | Value::Json(s) | Value::Other(s) => s.clone(),
    }
}
