use crate::conversions::geometry_type_to_str;
use crate::error::{Error, Result};
use crate::ident::quote_catalog_identifier;
use crate::ogc_sql::{
    SQL_INSERT_GPKG_CONTENTS, SQL_INSERT_GPKG_GEOMETRY_COLUMNS, SQL_INSERT_GPKG_SPATIAL_REF_SYS,
    SQL_SRS_EXISTS, execute_rtree_sqls, initialize_gpkg, sql_create_table,
};
use crate::sql_functions::register_spatial_functions;
use rusqlite::OpenFlags;
use std::path::Path;

use super::layer::{GpkgLayer, LayerSpec};

/// URI of a named in-memory database shared by every connection of the process.
pub fn shared_memory_uri(name: &str) -> String {
    format!("file:{name}?mode=memory&cache=shared")
}

#[derive(Debug)]
/// Writable GeoPackage used to seed feature tables.
pub struct Gpkg {
    conn: rusqlite::Connection,
}

impl Gpkg {
    /// Create a new GeoPackage file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("GeoPackage file already exists: {}", path.display()),
            )));
        }
        Self::initialize(rusqlite::Connection::open(path)?)
    }

    /// Create a new GeoPackage in private memory.
    pub fn new_in_memory() -> Result<Self> {
        Self::initialize(rusqlite::Connection::open_in_memory()?)
    }

    /// Create a new GeoPackage in shared memory, reachable from other
    /// connections through [`shared_memory_uri`] while this value is alive.
    pub fn new_shared_memory(name: &str) -> Result<Self> {
        let conn = rusqlite::Connection::open_with_flags(
            shared_memory_uri(name),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Self::initialize(conn)
    }

    fn initialize(conn: rusqlite::Connection) -> Result<Self> {
        initialize_gpkg(&conn)?;
        register_spatial_functions(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &rusqlite::Connection {
        &self.conn
    }

    /// Register a spatial reference system in gpkg_spatial_ref_sys.
    ///
    /// Layers must reference an `srs_id` that already exists. EPSG:4326,
    /// EPSG:3857 and the two undefined systems are registered on creation.
    pub fn register_srs(
        &self,
        srs_name: &str,
        srs_id: i32,
        organization: &str,
        organization_coordsys_id: i32,
        definition: &str,
        description: &str,
    ) -> Result<()> {
        self.conn.execute(
            SQL_INSERT_GPKG_SPATIAL_REF_SYS,
            rusqlite::params![
                srs_name,
                srs_id,
                organization,
                organization_coordsys_id,
                definition,
                description
            ],
        )?;
        Ok(())
    }

    /// Create a feature table with its GeoPackage metadata and R-tree index.
    pub fn new_layer(&self, spec: &LayerSpec) -> Result<GpkgLayer<'_>> {
        let srs_exists: bool =
            self.conn
                .query_row(SQL_SRS_EXISTS, rusqlite::params![spec.srs_id], |row| row.get(0))?;
        if !srs_exists {
            return Err(Error::Config(format!(
                "srs_id {} not found in gpkg_spatial_ref_sys",
                spec.srs_id
            )));
        }

        let mut column_defs = Vec::with_capacity(spec.columns.len() + 2);
        if let Some(pk) = &spec.primary_key {
            column_defs.push(format!("{} INTEGER PRIMARY KEY", quote_catalog_identifier(pk)?));
        }
        column_defs.push(format!(
            "{} {}",
            quote_catalog_identifier(&spec.geometry_column)?,
            geometry_type_to_str(spec.geometry_type)
        ));
        for (name, declared_type) in &spec.columns {
            // declared types are spliced verbatim
            let admitted = |c: char| c.is_ascii_alphanumeric() || " _(),".contains(c);
            if declared_type.is_empty() || !declared_type.chars().all(admitted) {
                return Err(Error::Config(format!(
                    "invalid declared type for column {name}: {declared_type:?}"
                )));
            }
            column_defs.push(format!("{} {declared_type}", quote_catalog_identifier(name)?));
        }

        let create_sql = sql_create_table(
            &quote_catalog_identifier(&spec.name)?,
            &column_defs.join(", "),
        );
        self.conn.execute_batch(&create_sql)?;

        let identifier = spec.identifier.as_deref().unwrap_or(&spec.name);
        self.conn.execute(
            SQL_INSERT_GPKG_CONTENTS,
            rusqlite::params![spec.name, identifier, spec.description, spec.srs_id],
        )?;
        self.conn.execute(
            SQL_INSERT_GPKG_GEOMETRY_COLUMNS,
            rusqlite::params![
                spec.name,
                spec.geometry_column,
                geometry_type_to_str(spec.geometry_type),
                spec.srs_id
            ],
        )?;

        let id_column = spec.primary_key.as_deref().unwrap_or("rowid");
        execute_rtree_sqls(&self.conn, &spec.name, &spec.geometry_column, id_column)?;

        GpkgLayer::new(self, spec)
    }
}
