//! OGC API Features server for GeoPackage files, built on top of rusqlite.
//!
//! ## Overview
//!
//! - [`catalog`] discovers spatial tables and keeps their metadata cached.
//! - [`request`] validates the query parameters of a features request.
//! - [`planner`] turns a request into one parameterised SQL statement.
//! - [`encoder`] writes the resulting rows as GeoJSON.
//! - [`server`] exposes all of it over HTTP with axum.
//!
//! Geometry work happens inside SQLite: every pooled connection carries a
//! small set of spatial SQL functions (see [`register_spatial_functions`])
//! operating on GeoPackage geometry blobs.
//!
//! ## Short usage
//!
//! ```no_run
//! use gpkg_featureserv::catalog::{DbCatalog, TableFilter};
//! use gpkg_featureserv::config::Config;
//! use gpkg_featureserv::pool::{ConnectionPool, DataSource};
//! use gpkg_featureserv::server::{AppState, serve};
//! use std::sync::Arc;
//!
//! # async fn run() -> gpkg_featureserv::Result<()> {
//! let config = Config::default();
//! let pool = ConnectionPool::new(DataSource::File("data.gpkg".into()), Vec::new(), 4)?;
//! let catalog = DbCatalog::open(pool.clone(), TableFilter::default()).await?;
//! serve(AppState::new(Arc::new(catalog), pool, config)).await
//! # }
//! ```
//!
//! Planning alone needs no database:
//!
//! ```
//! use gpkg_featureserv::planner::plan_items;
//! use gpkg_featureserv::request::{RequestDefaults, RequestDescriptor};
//! use gpkg_featureserv::types::Collection;
//! use std::collections::HashMap;
//!
//! let mut roads = Collection::new("main", "roads", "geom");
//! roads.srid = 4326;
//! let params = HashMap::from([("limit".to_string(), "5".to_string())]);
//! let request = RequestDescriptor::items(&roads.id, &params, &RequestDefaults::default())?;
//! let plan = plan_items(&roads, &request, 4326)?;
//! assert_eq!(plan.sql, r#"SELECT ST_AsGeoJSON("geom") FROM "roads" LIMIT ? OFFSET ?"#);
//! # Ok::<(), gpkg_featureserv::Error>(())
//! ```
mod conversions;
mod error;
mod ogc_sql;
mod sql_functions;

pub mod cache;
pub mod catalog;
pub mod config;
pub mod crs;
pub mod encoder;
pub mod filter;
pub mod gpkg;
pub mod ident;
pub mod logging;
pub mod mock;
pub mod planner;
pub mod pool;
pub mod request;
pub mod server;
pub mod types;

pub use error::{Error, GeometryError, InvalidRequest, Result};
pub use sql_functions::register_spatial_functions;
