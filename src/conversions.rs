use crate::types::{ColumnType, GeometryType, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};

#[inline]
pub(crate) fn geometry_type_to_str(geometry_type: GeometryType) -> &'static str {
    match geometry_type {
        GeometryType::Point => "POINT",
        GeometryType::LineString => "LINESTRING",
        GeometryType::Polygon => "POLYGON",
        GeometryType::MultiPoint => "MULTIPOINT",
        GeometryType::MultiLineString => "MULTILINESTRING",
        GeometryType::MultiPolygon => "MULTIPOLYGON",
        GeometryType::Geometry => "GEOMETRY",
    }
}

/// Name used for the geometry type in GeoJSON and collection descriptors.
#[inline]
pub(crate) fn geometry_type_to_geojson(geometry_type: GeometryType) -> &'static str {
    match geometry_type {
        GeometryType::Point => "Point",
        GeometryType::LineString => "LineString",
        GeometryType::Polygon => "Polygon",
        GeometryType::MultiPoint => "MultiPoint",
        GeometryType::MultiLineString => "MultiLineString",
        GeometryType::MultiPolygon => "MultiPolygon",
        GeometryType::Geometry => "Geometry",
    }
}

// cf. https://www.geopackage.org/spec140/index.html#geometry_types
#[inline]
pub(crate) fn geometry_type_from_str(geometry_type_str: &str) -> Option<GeometryType> {
    let s = geometry_type_str.trim();
    if s.eq_ignore_ascii_case("GEOMETRY") || s.eq_ignore_ascii_case("GEOMETRYCOLLECTION") {
        Some(GeometryType::Geometry)
    } else if s.eq_ignore_ascii_case("POINT") {
        Some(GeometryType::Point)
    } else if s.eq_ignore_ascii_case("LINESTRING") {
        Some(GeometryType::LineString)
    } else if s.eq_ignore_ascii_case("POLYGON") {
        Some(GeometryType::Polygon)
    } else if s.eq_ignore_ascii_case("MULTIPOINT") {
        Some(GeometryType::MultiPoint)
    } else if s.eq_ignore_ascii_case("MULTILINESTRING") {
        Some(GeometryType::MultiLineString)
    } else if s.eq_ignore_ascii_case("MULTIPOLYGON") {
        Some(GeometryType::MultiPolygon)
    } else {
        None
    }
}

/// Whether a declared column type belongs to the geometry type family.
#[inline]
pub(crate) fn is_geometry_declared_type(declared_type: &str) -> bool {
    geometry_type_from_str(declared_type).is_some()
}

/// Reduce a declared SQLite column type to the semantic type set.
///
/// Follows SQLite's affinity rules, after picking out the names that carry
/// more meaning than their affinity (booleans, dates, JSON).
pub(crate) fn column_type_from_declared(declared_type: &str) -> ColumnType {
    let s = declared_type.trim().to_ascii_uppercase();
    // strip a length or precision suffix such as VARCHAR(20)
    let base = s.split('(').next().unwrap_or("").trim();

    if base.is_empty() {
        ColumnType::Other
    } else if base == "BOOLEAN" || base == "BOOL" {
        ColumnType::Boolean
    } else if base == "DATE" || base == "DATETIME" || base.starts_with("TIMESTAMP") {
        ColumnType::Timestamp
    } else if base == "JSON" || base == "JSONB" {
        ColumnType::Json
    } else if base.contains("INT") {
        ColumnType::Integer
    } else if base.contains("CHAR") || base.contains("CLOB") || base.contains("TEXT") {
        ColumnType::String
    } else if base.contains("REAL")
        || base.contains("FLOA")
        || base.contains("DOUB")
        || base == "NUMERIC"
        || base == "DECIMAL"
    {
        ColumnType::Floating
    } else {
        ColumnType::Other
    }
}

/// Parse the timestamp spellings commonly stored in SQLite text columns.
pub(crate) fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Decode one result cell, guided by the semantic type of its column.
pub(crate) fn value_from_sql(value: ValueRef<'_>, column_type: ColumnType) -> Value {
    match (value, column_type) {
        (ValueRef::Null, _) => Value::Null,
        (ValueRef::Integer(i), ColumnType::Boolean) => Value::Boolean(i != 0),
        (ValueRef::Text(text), ColumnType::Boolean) => {
            let text = String::from_utf8_lossy(text);
            if text.eq_ignore_ascii_case("true") {
                Value::Boolean(true)
            } else if text.eq_ignore_ascii_case("false") {
                Value::Boolean(false)
            } else {
                Value::Other(text.into_owned())
            }
        }
        (ValueRef::Text(text), ColumnType::Timestamp) => {
            let text = String::from_utf8_lossy(text);
            match parse_timestamp(&text) {
                Some(ts) => Value::Timestamp(ts),
                None => Value::String(text.into_owned()),
            }
        }
        (ValueRef::Integer(secs), ColumnType::Timestamp) => DateTime::from_timestamp(secs, 0)
            .map(Value::Timestamp)
            .unwrap_or(Value::Integer(secs)),
        (ValueRef::Text(text), ColumnType::Json) => {
            Value::Json(String::from_utf8_lossy(text).into_owned())
        }
        (ValueRef::Text(text), ColumnType::Other) => {
            Value::Other(String::from_utf8_lossy(text).into_owned())
        }
        (ValueRef::Integer(i), _) => Value::Integer(i),
        (ValueRef::Real(f), _) => Value::Floating(f),
        (ValueRef::Text(text), _) => Value::String(String::from_utf8_lossy(text).into_owned()),
        (ValueRef::Blob(blob), _) => Value::Other(hex(blob)),
    }
}

/// Convert a bound filter value into a SQL parameter.
pub(crate) fn value_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Floating(f) => SqlValue::Real(*f),
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        Value::Timestamp(ts) => SqlValue::Text(format_timestamp(ts)),
        Value::String(s) | Value::Json(s) | Value::Other(s) => SqlValue::Text(s.clone()),
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
