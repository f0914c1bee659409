use super::{Catalog, TableFilter};
use crate::cache::CollectionCache;
use crate::conversions::{column_type_from_declared, geometry_type_from_str, is_geometry_declared_type};
use crate::error::{Error, Result};
use crate::ident::quote_catalog_identifier;
use crate::ogc_sql::{
    SQL_LIST_SCHEMAS, SQL_LIST_TABLES, SQL_TABLE_COLUMNS, SQL_TABLE_EXISTS, rtree_table_name,
    sql_contents_meta, sql_geometry_column_meta, sql_row_estimate, sql_rtree_extent,
};
use crate::pool::ConnectionPool;
use crate::types::{Collection, ColumnSpec, Extent, GeometryType};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Arc;

/// Catalog discovered from the tables of the pooled database.
#[derive(Debug)]
pub struct DbCatalog {
    pool: ConnectionPool,
    filter: TableFilter,
    cache: CollectionCache,
}

impl DbCatalog {
    /// Create an empty catalog; call [`Catalog::refresh`] to populate it.
    pub fn new(pool: ConnectionPool, filter: TableFilter) -> Self {
        Self {
            pool,
            filter,
            cache: CollectionCache::new(),
        }
    }

    /// Create a catalog and run the first discovery.
    pub async fn open(pool: ConnectionPool, filter: TableFilter) -> Result<Self> {
        let catalog = Self::new(pool, filter);
        catalog.refresh().await?;
        Ok(catalog)
    }
}

#[async_trait]
impl Catalog for DbCatalog {
    async fn list(&self) -> Result<Vec<Arc<Collection>>> {
        Ok(self.cache.list())
    }

    async fn get(&self, id: &str) -> Result<Arc<Collection>> {
        self.cache
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("collection {id}")))
    }

    async fn refresh(&self) -> Result<()> {
        let conn = self.pool.acquire().await?;
        let filter = self.filter.clone();
        let discovered = tokio::task::spawn_blocking(move || discover(&conn, &filter)).await?;

        match discovered {
            Ok(collections) => {
                tracing::info!(collections = collections.len(), "catalog refreshed");
                self.cache.replace(collections);
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%err, "catalog refresh failed, keeping previous collections");
                Err(err)
            }
        }
    }
}

struct RawColumn {
    name: String,
    declared_type: String,
    not_null: bool,
    pk: i64,
}

/// Which GeoPackage metadata tables a schema carries.
struct SchemaMeta {
    quoted: String,
    geometry_columns: bool,
    contents: bool,
    stat1: bool,
}

impl SchemaMeta {
    fn read(conn: &Connection, schema: &str) -> Result<Self> {
        Ok(Self {
            quoted: quote_catalog_identifier(schema)?,
            geometry_columns: table_exists(conn, schema, "gpkg_geometry_columns")?,
            contents: table_exists(conn, schema, "gpkg_contents")?,
            stat1: table_exists(conn, schema, "sqlite_stat1")?,
        })
    }
}

/// Walk every schema and describe the admitted spatial tables.
pub(crate) fn discover(conn: &Connection, filter: &TableFilter) -> Result<Vec<Collection>> {
    let schemas: Vec<String> = conn
        .prepare(SQL_LIST_SCHEMAS)?
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;

    let mut collections = Vec::new();
    for schema in &schemas {
        let meta = SchemaMeta::read(conn, schema)?;
        let tables: Vec<String> = conn
            .prepare(SQL_LIST_TABLES)?
            .query_map([schema], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        for table in tables {
            if !filter.admits(schema, &table) {
                tracing::debug!(schema, table, "table filtered out");
                continue;
            }
            match describe(conn, &meta, schema, &table)? {
                Some(collection) => collections.push(collection),
                None => tracing::debug!(schema, table, "table has no geometry column"),
            }
        }
    }

    warn_on_case_collisions(&collections);
    Ok(collections)
}

fn describe(
    conn: &Connection,
    meta: &SchemaMeta,
    schema: &str,
    table: &str,
) -> Result<Option<Collection>> {
    let columns: Vec<RawColumn> = conn
        .prepare(SQL_TABLE_COLUMNS)?
        .query_map([table, schema], |row| {
            Ok(RawColumn {
                name: row.get(0)?,
                declared_type: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                not_null: row.get(2)?,
                pk: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;

    let registered = if meta.geometry_columns {
        conn.query_row(&sql_geometry_column_meta(&meta.quoted), [table], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i32>(2)?,
            ))
        })
        .optional()?
    } else {
        None
    };

    let registered_column = registered.as_ref().and_then(|(name, geometry_type, srid)| {
        columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .map(|c| {
                let geometry_type =
                    geometry_type_from_str(geometry_type).unwrap_or(GeometryType::Geometry);
                (c.name.clone(), geometry_type, *srid)
            })
    });
    let (geometry_column, geometry_type, srid) = match registered_column {
        Some(found) => found,
        None => match columns
            .iter()
            .find(|c| is_geometry_declared_type(&c.declared_type))
        {
            Some(c) => (c.name.clone(), GeometryType::Geometry, 0),
            None => return Ok(None),
        },
    };

    let mut collection = Collection::new(schema, table, &geometry_column);
    collection.geometry_type = geometry_type;
    collection.srid = srid;
    for column in &columns {
        if column.name == geometry_column || is_geometry_declared_type(&column.declared_type) {
            continue;
        }
        collection.properties.push(ColumnSpec {
            name: column.name.clone(),
            column_type: column_type_from_declared(&column.declared_type),
            nullable: !column.not_null && column.pk == 0,
        });
    }
    collection.primary_key = columns
        .iter()
        .find(|c| c.pk == 1 && c.name != geometry_column)
        .map(|c| c.name.clone());

    let contents = if meta.contents {
        best_effort("contents", table, read_contents(conn, meta, table))
    } else {
        None
    };
    if let Some(contents) = &contents {
        if let Some(title) = contents.title.as_deref().filter(|t| !t.is_empty()) {
            collection.title = title.to_string();
        }
        collection.description = contents.description.clone().unwrap_or_default();
    }
    collection.extent = contents.and_then(|c| c.extent).or_else(|| {
        best_effort(
            "index extent",
            table,
            read_rtree_extent(conn, meta, schema, table, &geometry_column),
        )
    });
    if meta.stat1 {
        collection.row_estimate = best_effort("row estimate", table, read_row_estimate(conn, meta, table));
    }

    Ok(Some(collection))
}

struct Contents {
    title: Option<String>,
    description: Option<String>,
    extent: Option<Extent>,
}

fn read_contents(conn: &Connection, meta: &SchemaMeta, table: &str) -> Result<Option<Contents>> {
    let contents = conn
        .query_row(&sql_contents_meta(&meta.quoted), [table], |row| {
            Ok(Contents {
                title: row.get(0)?,
                description: row.get(1)?,
                extent: extent_from(row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?),
            })
        })
        .optional()?;
    Ok(contents)
}

fn read_rtree_extent(
    conn: &Connection,
    meta: &SchemaMeta,
    schema: &str,
    table: &str,
    geometry_column: &str,
) -> Result<Option<Extent>> {
    let rtree = rtree_table_name(table, geometry_column);
    if !table_exists(conn, schema, &rtree)? {
        return Ok(None);
    }
    let sql = sql_rtree_extent(&meta.quoted, &quote_catalog_identifier(&rtree)?);
    let extent = conn.query_row(&sql, [], |row| {
        Ok(extent_from(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    })?;
    Ok(extent)
}

fn read_row_estimate(conn: &Connection, meta: &SchemaMeta, table: &str) -> Result<Option<u64>> {
    let stat: Option<String> = conn
        .query_row(&sql_row_estimate(&meta.quoted), [table], |row| row.get(0))
        .optional()?;
    Ok(stat.and_then(|s| s.split_whitespace().next()?.parse().ok()))
}

fn extent_from(
    minx: Option<f64>,
    miny: Option<f64>,
    maxx: Option<f64>,
    maxy: Option<f64>,
) -> Option<Extent> {
    Some(Extent {
        minx: minx?,
        miny: miny?,
        maxx: maxx?,
        maxy: maxy?,
    })
}

fn table_exists(conn: &Connection, schema: &str, name: &str) -> Result<bool> {
    Ok(conn.query_row(SQL_TABLE_EXISTS, [schema, name], |row| row.get(0))?)
}

fn best_effort<T>(what: &str, table: &str, result: Result<Option<T>>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(table, %err, "could not read {what}");
            None
        }
    }
}

fn warn_on_case_collisions(collections: &[Collection]) {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for collection in collections {
        if let Some(previous) = seen.insert(collection.id.to_lowercase(), &collection.id) {
            tracing::warn!(
                first = previous,
                second = collection.id.as_str(),
                "collection ids differ only in case; both are served under their exact id"
            );
        }
    }
}
