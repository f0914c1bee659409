//! Sample data served by `--test`.
//!
//! The dataset lives in a shared in-memory GeoPackage and is discovered like
//! any other database, so the whole request path is exercised.

use crate::error::Result;
use crate::gpkg::{Gpkg, LayerSpec};
use crate::types::GeometryType;
use geo_types::{LineString, Point, Polygon};
use rusqlite::types::Value;

/// Name of the shared in-memory database used by `--test`.
pub const MOCK_DATABASE: &str = "gpkg_featureserv_mock";

const GRID: i32 = 5;

/// Create and fill the mock GeoPackage.
///
/// The database exists as long as the returned handle is alive.
pub fn seed(name: &str) -> Result<Gpkg> {
    let gpkg = Gpkg::new_shared_memory(name)?;

    let points = gpkg.new_layer(
        &LayerSpec::new("mock_points", GeometryType::Point, 4326)
            .column("name", "TEXT")
            .column("rank", "INTEGER")
            .column("score", "REAL")
            .column("active", "BOOLEAN")
            .column("observed", "DATETIME")
            .column("tags", "JSON")
            .title("Mock points")
            .description("A grid of points over Europe"),
    )?;
    for i in 0..GRID {
        for j in 0..GRID {
            let n = i * GRID + j;
            points.insert(
                Point::new(f64::from(i * 2), f64::from(45 + j)),
                [
                    Value::Text(format!("point {n}")),
                    Value::Integer(i64::from(n)),
                    Value::Real(f64::from(n) / 4.0),
                    Value::Integer(i64::from(n % 2)),
                    Value::Text(format!("2024-01-{:02}T12:00:00Z", n % 28 + 1)),
                    Value::Text(format!(r#"{{"row":{i},"col":{j}}}"#)),
                ],
            )?;
        }
    }
    points.update_extent()?;

    let lines = gpkg.new_layer(
        &LayerSpec::new("mock_lines", GeometryType::LineString, 3857)
            .column("name", "TEXT")
            .column("length_m", "DOUBLE")
            .title("Mock lines"),
    )?;
    for i in 0..GRID {
        let y = f64::from(i) * 100_000.0;
        lines.insert(
            LineString::from(vec![(0.0, y), (500_000.0, y + 50_000.0)]),
            [Value::Text(format!("line {i}")), Value::Real(502_494.4)],
        )?;
    }
    lines.update_extent()?;

    let polygons = gpkg.new_layer(
        &LayerSpec::new("mock_polygons", GeometryType::Polygon, 4326)
            .column("name", "TEXT")
            .column("area", "REAL")
            .column("category", "VARCHAR(16)")
            .title("Mock polygons"),
    )?;
    for i in 0..GRID {
        let x = f64::from(i * 3);
        let ring = LineString::from(vec![
            (x, 10.0),
            (x + 2.0, 10.0),
            (x + 2.0, 12.0),
            (x, 12.0),
            (x, 10.0),
        ]);
        polygons.insert(
            Polygon::new(ring, vec![]),
            [
                Value::Text(format!("polygon {i}")),
                Value::Real(4.0),
                if i % 2 == 0 {
                    Value::Text("even".to_string())
                } else {
                    Value::Null
                },
            ],
        )?;
    }
    polygons.insert_without_geometry([
        Value::Text("no geometry".to_string()),
        Value::Null,
        Value::Null,
    ])?;
    polygons.update_extent()?;

    tracing::info!(database = name, "seeded mock dataset");
    Ok(gpkg)
}

#[cfg(test)]
mod tests {
    use super::seed;
    use crate::Result;
    use crate::catalog::{Catalog, DbCatalog, TableFilter};
    use crate::pool::{ConnectionPool, DataSource};
    use crate::types::{ColumnType, GeometryType};

    #[tokio::test]
    async fn mock_dataset_is_discoverable() -> Result<()> {
        let _gpkg = seed("mock_discovery_test")?;
        let pool = ConnectionPool::new(
            DataSource::SharedMemory("mock_discovery_test".to_string()),
            Vec::new(),
            2,
        )?;
        let catalog = DbCatalog::open(pool, TableFilter::default()).await?;

        let ids: Vec<String> = catalog
            .list()
            .await?
            .iter()
            .map(|c| c.id.clone())
            .collect();
        assert_eq!(ids, ["mock_lines", "mock_points", "mock_polygons"]);

        let points = catalog.get("mock_points").await?;
        assert_eq!(points.geometry_type, GeometryType::Point);
        assert_eq!(points.srid, 4326);
        assert_eq!(points.primary_key.as_deref(), Some("fid"));
        assert_eq!(points.title, "Mock points");
        let types: Vec<ColumnType> = points.properties.iter().map(|p| p.column_type).collect();
        assert_eq!(
            types,
            [
                ColumnType::Integer,
                ColumnType::String,
                ColumnType::Integer,
                ColumnType::Floating,
                ColumnType::Boolean,
                ColumnType::Timestamp,
                ColumnType::Json,
            ]
        );
        let extent = points.extent.expect("extent");
        assert_eq!((extent.minx, extent.maxy), (0.0, 49.0));

        assert_eq!(catalog.get("mock_lines").await?.srid, 3857);
        Ok(())
    }
}
