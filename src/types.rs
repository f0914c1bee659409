use chrono::{DateTime, Utc};

/// Schema name SQLite gives to the primary database file.
pub const DEFAULT_SCHEMA: &str = "main";

/// Semantic type of a property column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Floating,
    String,
    Boolean,
    Timestamp,
    Json,
    Other,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Floating => "floating",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Json => "json",
            Self::Other => "other",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

/// Declared geometry type of a collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryType {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    Geometry,
}

/// Axis-aligned bounding rectangle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Extent {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl Extent {
    pub fn intersects(&self, other: &Extent) -> bool {
        self.minx <= other.maxx
            && other.minx <= self.maxx
            && self.miny <= other.maxy
            && other.miny <= self.maxy
    }
}

/// A spatial table served as a feature collection.
#[derive(Clone, Debug, PartialEq)]
pub struct Collection {
    pub schema: String,
    pub table: String,
    pub id: String,
    pub title: String,
    pub description: String,
    pub geometry_column: String,
    pub geometry_type: GeometryType,
    /// Native SRID of the geometry column; 0 means unknown / planar.
    pub srid: i32,
    /// Non-geometry columns in table order.
    pub properties: Vec<ColumnSpec>,
    pub primary_key: Option<String>,
    pub extent: Option<Extent>,
    pub row_estimate: Option<u64>,
}

impl Collection {
    /// Create a collection with no properties, key or statistics.
    pub fn new(schema: &str, table: &str, geometry_column: &str) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            id: collection_id(schema, table),
            title: table.to_string(),
            description: String::new(),
            geometry_column: geometry_column.to_string(),
            geometry_type: GeometryType::Geometry,
            srid: 0,
            properties: Vec::new(),
            primary_key: None,
            extent: None,
            row_estimate: None,
        }
    }

    /// Look up a property column by exact name.
    pub fn property(&self, name: &str) -> Option<&ColumnSpec> {
        self.properties.iter().find(|spec| spec.name == name)
    }

    pub fn has_default_schema(&self) -> bool {
        self.schema == DEFAULT_SCHEMA
    }
}

/// External id of a table: `schema.table`, or just `table` in the default schema.
pub fn collection_id(schema: &str, table: &str) -> String {
    if schema == DEFAULT_SCHEMA {
        table.to_string()
    } else {
        format!("{schema}.{table}")
    }
}

/// Owned property value, tagged by semantic type.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Floating(f64),
    String(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    /// Raw JSON text as stored.
    Json(String),
    /// Anything else, rendered as text.
    Other(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Floating(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Collection, Extent, collection_id};

    #[test]
    fn default_schema_is_omitted_from_ids() {
        assert_eq!(collection_id("main", "parks"), "parks");
        assert_eq!(collection_id("public", "parks"), "public.parks");
        assert_eq!(Collection::new("public", "Parks", "geom").id, "public.Parks");
    }

    #[test]
    fn extents_touching_on_an_edge_intersect() {
        let a = Extent {
            minx: 0.0,
            miny: 0.0,
            maxx: 1.0,
            maxy: 1.0,
        };
        let b = Extent {
            minx: 1.0,
            miny: 0.5,
            maxx: 2.0,
            maxy: 2.0,
        };
        let c = Extent {
            minx: 1.5,
            miny: 0.0,
            maxx: 2.0,
            maxy: 1.0,
        };
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }
}
