use super::geometry::{encode, to_geo};
use super::gpkg::Gpkg;
use crate::error::Result;
use crate::ident::quote_catalog_identifier;
use crate::ogc_sql::{rtree_table_name, sql_insert_feature};
use crate::types::GeometryType;
use geo_traits::GeometryTrait;
use rusqlite::params_from_iter;
use rusqlite::types::Value;

/// Definition of a feature table to create.
#[derive(Clone, Debug)]
pub struct LayerSpec {
    pub name: String,
    pub geometry_column: String,
    pub geometry_type: GeometryType,
    pub srs_id: i32,
    /// Integer primary key column; `None` creates a table without one.
    pub primary_key: Option<String>,
    /// Property columns as `(name, declared SQLite type)`.
    pub columns: Vec<(String, String)>,
    /// `gpkg_contents.identifier`, defaulting to the table name.
    pub identifier: Option<String>,
    pub description: String,
}

impl LayerSpec {
    /// A layer with a `geom` geometry column and an `fid` primary key.
    pub fn new(name: &str, geometry_type: GeometryType, srs_id: i32) -> Self {
        Self {
            name: name.to_string(),
            geometry_column: "geom".to_string(),
            geometry_type,
            srs_id,
            primary_key: Some("fid".to_string()),
            columns: Vec::new(),
            identifier: None,
            description: String::new(),
        }
    }

    pub fn geometry_column(mut self, name: &str) -> Self {
        self.geometry_column = name.to_string();
        self
    }

    pub fn primary_key(mut self, name: Option<&str>) -> Self {
        self.primary_key = name.map(str::to_string);
        self
    }

    pub fn column(mut self, name: &str, declared_type: &str) -> Self {
        self.columns
            .push((name.to_string(), declared_type.to_string()));
        self
    }

    pub fn title(mut self, identifier: &str) -> Self {
        self.identifier = Some(identifier.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// Handle for inserting features into a table created by [`Gpkg::new_layer`].
#[derive(Debug)]
pub struct GpkgLayer<'a> {
    conn: &'a Gpkg,
    layer_name: String,
    geometry_column: String,
    srs_id: i32,
    insert_sql: String,
}

impl<'a> GpkgLayer<'a> {
    pub(super) fn new(conn: &'a Gpkg, spec: &LayerSpec) -> Result<Self> {
        let insert_sql = Self::build_insert_sql(spec)?;
        Ok(Self {
            conn,
            layer_name: spec.name.clone(),
            geometry_column: spec.geometry_column.clone(),
            srs_id: spec.srs_id,
            insert_sql,
        })
    }

    pub fn name(&self) -> &str {
        &self.layer_name
    }

    /// Insert a feature with ordered property values; returns its rowid.
    ///
    /// Example:
    /// ```no_run
    /// use geo_types::Point;
    /// use gpkg_featureserv::gpkg::{Gpkg, LayerSpec};
    /// use gpkg_featureserv::types::GeometryType;
    /// use rusqlite::types::Value;
    ///
    /// let gpkg = Gpkg::new_in_memory()?;
    /// let layer = gpkg.new_layer(
    ///     &LayerSpec::new("points", GeometryType::Point, 4326).column("name", "TEXT"),
    /// )?;
    /// layer.insert(Point::new(1.0, 2.0), vec![Value::Text("alpha".to_string())])?;
    /// # Ok::<(), gpkg_featureserv::Error>(())
    /// ```
    pub fn insert<G, P>(&self, geometry: G, properties: P) -> Result<i64>
    where
        G: GeometryTrait<T = f64>,
        P: IntoIterator<Item = Value>,
    {
        let geom = encode(&to_geo(&geometry), self.srs_id)?;
        self.insert_blob(Value::Blob(geom), properties)
    }

    /// Insert a feature whose geometry is NULL.
    pub fn insert_without_geometry<P>(&self, properties: P) -> Result<i64>
    where
        P: IntoIterator<Item = Value>,
    {
        self.insert_blob(Value::Null, properties)
    }

    fn insert_blob<P>(&self, geometry: Value, properties: P) -> Result<i64>
    where
        P: IntoIterator<Item = Value>,
    {
        let conn = self.conn.connection();
        let params = std::iter::once(geometry).chain(properties);
        let mut stmt = conn.prepare_cached(&self.insert_sql)?;
        stmt.execute(params_from_iter(params))?;
        Ok(conn.last_insert_rowid())
    }

    /// Store the extent of the R-tree index in `gpkg_contents`.
    pub fn update_extent(&self) -> Result<()> {
        let rtree =
            quote_catalog_identifier(&rtree_table_name(&self.layer_name, &self.geometry_column))?;
        let sql = format!(
            "UPDATE gpkg_contents SET (min_x, min_y, max_x, max_y) = \
             (SELECT min(minx), min(miny), max(maxx), max(maxy) FROM {rtree}) \
             WHERE table_name = ?1"
        );
        self.conn
            .connection()
            .execute(&sql, rusqlite::params![self.layer_name])?;
        Ok(())
    }

    pub(crate) fn build_insert_sql(spec: &LayerSpec) -> Result<String> {
        let mut columns = Vec::with_capacity(spec.columns.len() + 1);
        columns.push(quote_catalog_identifier(&spec.geometry_column)?);
        for (name, _) in &spec.columns {
            columns.push(quote_catalog_identifier(name)?);
        }

        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<String>>()
            .join(",");

        Ok(sql_insert_feature(
            &quote_catalog_identifier(&spec.name)?,
            &columns.join(","),
            &placeholders,
        ))
    }
}
