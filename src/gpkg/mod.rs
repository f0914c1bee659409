//! GeoPackage geometry codec and fixture writer.
//!
//! Geometry blobs are the GeoPackage header followed by WKB. [`Gpkg`] creates
//! GeoPackages with feature tables, R-tree indexes and metadata rows; the
//! server only reads them.

mod blob;
mod geometry;
pub(crate) mod geojson;
mod gpkg;
mod layer;

pub use gpkg::{Gpkg, shared_memory_uri};
pub use layer::{GpkgLayer, LayerSpec};

pub(crate) use blob::{gpkg_geometry_srs_id, gpkg_geometry_to_wkb};
pub(crate) use geometry::{
    bounds, decode, encode, envelope, intersects, map_coords, rect_polygon, simplify,
};
