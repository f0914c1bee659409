use crate::crs::coord_transform;
use crate::error::{GeometryError, Result};
use crate::gpkg::geojson::to_geojson;
use crate::gpkg::{
    bounds, decode, encode, envelope, gpkg_geometry_srs_id, gpkg_geometry_to_wkb, intersects,
    map_coords, rect_polygon, simplify,
};
use crate::types::Extent;
use geo_traits::GeometryTrait;
use geo_types::Geometry;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{Connection, Error};
use wkb::reader::Wkb;

/// Largest number of decimals `ST_AsGeoJSON` rounds to.
pub const MAX_PRECISION: i64 = 15;

/// Register all spatial SQL functions in the provided connection.
///
/// Example:
/// ```no_run
/// use rusqlite::Connection;
/// use gpkg_featureserv::register_spatial_functions;
///
/// let conn = Connection::open_in_memory()?;
/// register_spatial_functions(&conn)?;
/// # Ok::<(), gpkg_featureserv::Error>(())
/// ```
pub fn register_spatial_functions(conn: &Connection) -> Result<()> {
    register_st_minx(conn)?;
    register_st_miny(conn)?;
    register_st_maxx(conn)?;
    register_st_maxy(conn)?;
    register_st_isempty(conn)?;
    register_st_srid(conn)?;
    register_st_geometrytype(conn)?;
    register_st_asgeojson(conn)?;
    register_st_transform(conn)?;
    register_st_makeenvelope(conn)?;
    register_st_intersects(conn)?;
    register_st_simplify(conn)?;
    register_st_envelope(conn)?;
    Ok(())
}

pub(crate) fn register_st_minx(conn: &Connection) -> Result<()> {
    register_bounds_component(conn, "ST_MinX", |b| b.minx)
}

pub(crate) fn register_st_miny(conn: &Connection) -> Result<()> {
    register_bounds_component(conn, "ST_MinY", |b| b.miny)
}

pub(crate) fn register_st_maxx(conn: &Connection) -> Result<()> {
    register_bounds_component(conn, "ST_MaxX", |b| b.maxx)
}

pub(crate) fn register_st_maxy(conn: &Connection) -> Result<()> {
    register_bounds_component(conn, "ST_MaxY", |b| b.maxy)
}

pub(crate) fn register_st_isempty(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_IsEmpty",
        1,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let wkb = match wkb_from_ctx(ctx, 0)? {
                Some(wkb) => wkb,
                None => return Ok(None),
            };
            let is_empty = bounds(&wkb).is_none();
            Ok(Some(i64::from(is_empty)))
        },
    )?;
    Ok(())
}

pub(crate) fn register_st_srid(conn: &Connection) -> Result<()> {
    conn.create_scalar_function("ST_SRID", 1, FunctionFlags::SQLITE_DETERMINISTIC, |ctx| {
        match blob_from_ctx(ctx, 0)? {
            Some(blob) => gpkg_geometry_srs_id(blob).map(Some).map_err(user_error),
            None => Ok(None),
        }
    })?;
    Ok(())
}

pub(crate) fn register_st_geometrytype(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_GeometryType",
        1,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let wkb = match wkb_from_ctx(ctx, 0)? {
                Some(wkb) => wkb,
                None => return Ok(None),
            };
            Ok(Some(geometry_type_name(&wkb)))
        },
    )?;
    Ok(())
}

/// `ST_AsGeoJSON(g)` and `ST_AsGeoJSON(g, precision)`.
pub(crate) fn register_st_asgeojson(conn: &Connection) -> Result<()> {
    for n_arg in [1, 2] {
        conn.create_scalar_function(
            "ST_AsGeoJSON",
            n_arg,
            FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let (geometry, _) = match geometry_from_ctx(ctx, 0)? {
                    Some(decoded) => decoded,
                    None => return Ok(None),
                };
                let precision = if ctx.len() > 1 {
                    let precision: i64 = ctx.get(1)?;
                    if !(0..=MAX_PRECISION).contains(&precision) {
                        return Err(Error::UserFunctionError(
                            format!("precision must be between 0 and {MAX_PRECISION}").into(),
                        ));
                    }
                    Some(precision as u32)
                } else {
                    None
                };
                Ok(Some(to_geojson(&geometry, precision)))
            },
        )?;
    }
    Ok(())
}

pub(crate) fn register_st_transform(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_Transform",
        2,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let (geometry, from) = match geometry_from_ctx(ctx, 0)? {
                Some(decoded) => decoded,
                None => return Ok(None),
            };
            let to: i32 = ctx.get(1)?;
            let transformed = match coord_transform(from, to).map_err(user_error)? {
                Some(f) => map_coords(&geometry, &f),
                None => geometry,
            };
            encode(&transformed, to).map(Some).map_err(user_error)
        },
    )?;
    Ok(())
}

pub(crate) fn register_st_makeenvelope(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_MakeEnvelope",
        5,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            if (0..5).any(|i| matches!(ctx.get_raw(i), ValueRef::Null)) {
                return Ok(None);
            }
            let extent = Extent {
                minx: ctx.get(0)?,
                miny: ctx.get(1)?,
                maxx: ctx.get(2)?,
                maxy: ctx.get(3)?,
            };
            let srid: i32 = ctx.get(4)?;
            let polygon = Geometry::Polygon(rect_polygon(&extent));
            encode(&polygon, srid).map(Some).map_err(user_error)
        },
    )?;
    Ok(())
}

pub(crate) fn register_st_intersects(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_Intersects",
        2,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let (a, a_srid) = match geometry_from_ctx(ctx, 0)? {
                Some(decoded) => decoded,
                None => return Ok(None),
            };
            let (b, b_srid) = match geometry_from_ctx(ctx, 1)? {
                Some(decoded) => decoded,
                None => return Ok(None),
            };
            // an undefined SRID on either side is taken to match the other
            if a_srid != b_srid && a_srid != 0 && b_srid != 0 {
                return Err(user_error(GeometryError::UnsupportedTransform {
                    from: b_srid,
                    to: a_srid,
                }));
            }
            Ok(Some(i64::from(intersects(&a, &b))))
        },
    )?;
    Ok(())
}

pub(crate) fn register_st_simplify(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_Simplify",
        2,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let (geometry, srid) = match geometry_from_ctx(ctx, 0)? {
                Some(decoded) => decoded,
                None => return Ok(None),
            };
            let tolerance: f64 = ctx.get(1)?;
            encode(&simplify(&geometry, tolerance), srid)
                .map(Some)
                .map_err(user_error)
        },
    )?;
    Ok(())
}

pub(crate) fn register_st_envelope(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_Envelope",
        1,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let (geometry, srid) = match geometry_from_ctx(ctx, 0)? {
                Some(decoded) => decoded,
                None => return Ok(None),
            };
            encode(&envelope(&geometry), srid)
                .map(Some)
                .map_err(user_error)
        },
    )?;
    Ok(())
}

fn register_bounds_component<F>(conn: &Connection, name: &str, f: F) -> Result<()>
where
    F: Fn(Extent) -> f64 + Copy + Send + Sync + 'static,
{
    conn.create_scalar_function(name, 1, FunctionFlags::SQLITE_DETERMINISTIC, move |ctx| {
        let wkb = match wkb_from_ctx(ctx, 0)? {
            Some(wkb) => wkb,
            None => return Ok(None),
        };
        Ok(bounds(&wkb).map(f))
    })?;
    Ok(())
}

fn user_error<E>(err: E) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    Error::UserFunctionError(Box::new(err))
}

fn blob_from_ctx<'a>(
    ctx: &'a Context<'a>,
    idx: usize,
) -> std::result::Result<Option<&'a [u8]>, Error> {
    match ctx.get_raw(idx) {
        ValueRef::Null => Ok(None),
        ValueRef::Blob(blob) => Ok(Some(blob)),
        _ => Err(Error::InvalidFunctionParameterType(idx, Type::Blob)),
    }
}

fn wkb_from_ctx<'a>(
    ctx: &'a Context<'a>,
    idx: usize,
) -> std::result::Result<Option<Wkb<'a>>, Error> {
    match blob_from_ctx(ctx, idx)? {
        Some(blob) => gpkg_geometry_to_wkb(blob).map(Some).map_err(user_error),
        None => Ok(None),
    }
}

fn geometry_from_ctx(
    ctx: &Context<'_>,
    idx: usize,
) -> std::result::Result<Option<(Geometry<f64>, i32)>, Error> {
    match blob_from_ctx(ctx, idx)? {
        Some(blob) => decode(blob).map(Some).map_err(user_error),
        None => Ok(None),
    }
}

fn geometry_type_name<G: GeometryTrait<T = f64>>(geom: &G) -> &'static str {
    use geo_traits::GeometryType as GeoType;

    match geom.as_type() {
        GeoType::Point(_) => "POINT",
        GeoType::LineString(_) => "LINESTRING",
        GeoType::Line(_) => "LINESTRING",
        GeoType::Polygon(_) | GeoType::Rect(_) | GeoType::Triangle(_) => "POLYGON",
        GeoType::MultiPoint(_) => "MULTIPOINT",
        GeoType::MultiLineString(_) => "MULTILINESTRING",
        GeoType::MultiPolygon(_) => "MULTIPOLYGON",
        GeoType::GeometryCollection(_) => "GEOMETRYCOLLECTION",
    }
}

#[cfg(test)]
mod tests {
    use super::register_spatial_functions;
    use crate::gpkg::{decode, encode};
    use geo_types::{
        Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, Point, Polygon,
    };
    use rusqlite::{Connection, params};

    fn gpkg_blob_from_geometry<G: Into<Geometry<f64>>>(geometry: G) -> crate::Result<Vec<u8>> {
        encode(&geometry.into(), 4326)
    }

    fn connection() -> crate::Result<Connection> {
        let conn = Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;
        Ok(conn)
    }

    #[test]
    fn st_bounds_for_point() -> crate::Result<()> {
        let conn = connection()?;
        let blob = gpkg_blob_from_geometry(Point::new(1.5, -2.0))?;

        let (minx, maxx, miny, maxy, empty): (f64, f64, f64, f64, i64) = conn.query_row(
            "SELECT ST_MinX(?1), ST_MaxX(?1), ST_MinY(?1), ST_MaxY(?1), ST_IsEmpty(?1)",
            params![blob],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )?;

        assert_eq!((minx, maxx, miny, maxy, empty), (1.5, 1.5, -2.0, -2.0, 0));
        Ok(())
    }

    #[test]
    fn st_is_empty_for_empty_linestring() -> crate::Result<()> {
        let conn = connection()?;
        let line: LineString<f64> = LineString::new(Vec::new());
        let blob = gpkg_blob_from_geometry(line)?;

        let (minx, empty): (Option<f64>, i64) =
            conn.query_row("SELECT ST_MinX(?1), ST_IsEmpty(?1)", params![blob], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;

        assert!(minx.is_none());
        assert_eq!(empty, 1);
        Ok(())
    }

    #[test]
    fn st_bounds_for_multi_geometries() -> crate::Result<()> {
        let conn = connection()?;
        let sql = "SELECT ST_MinX(?1), ST_MaxX(?1), ST_MinY(?1), ST_MaxY(?1)";

        let mp = MultiPoint::from(vec![Point::new(1.0, 5.0), Point::new(-2.0, 3.0)]);
        let blob = gpkg_blob_from_geometry(mp)?;
        let bounds: (f64, f64, f64, f64) = conn.query_row(sql, params![blob], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        assert_eq!(bounds, (-2.0, 1.0, 3.0, 5.0));

        let line_a = LineString::from(vec![(0.0, 0.0), (2.0, 1.0)]);
        let line_b = LineString::from(vec![(-3.0, 4.0), (-1.0, 2.0)]);
        let blob = gpkg_blob_from_geometry(MultiLineString(vec![line_a, line_b]))?;
        let bounds: (f64, f64, f64, f64) = conn.query_row(sql, params![blob], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        assert_eq!(bounds, (-3.0, 2.0, 0.0, 4.0));

        let point = Geometry::Point(Point::new(5.0, -1.0));
        let line = Geometry::LineString(LineString::from(vec![(-2.0, 2.0), (1.0, 3.0)]));
        let blob = gpkg_blob_from_geometry(Geometry::GeometryCollection(GeometryCollection::from(vec![point, line])))?;
        let bounds: (f64, f64, f64, f64) = conn.query_row(sql, params![blob], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        assert_eq!(bounds, (-2.0, 5.0, -1.0, 3.0));
        Ok(())
    }

    #[test]
    fn st_srid_and_geometry_type() -> crate::Result<()> {
        let conn = connection()?;
        let blob = encode(&Geometry::MultiPoint(MultiPoint::from(vec![(1.0, 2.0)])), 3857)?;

        let (srid, kind): (i64, String) = conn.query_row(
            "SELECT ST_SRID(?1), ST_GeometryType(?1)",
            params![blob],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!(srid, 3857);
        assert_eq!(kind, "MULTIPOINT");
        Ok(())
    }

    #[test]
    fn st_asgeojson_with_and_without_precision() -> crate::Result<()> {
        let conn = connection()?;
        let blob = gpkg_blob_from_geometry(Point::new(1.23456, 2.0))?;

        let (full, rounded, null): (String, String, Option<String>) = conn.query_row(
            "SELECT ST_AsGeoJSON(?1), ST_AsGeoJSON(?1, 2), ST_AsGeoJSON(NULL)",
            params![blob],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        assert_eq!(full, r#"{"type":"Point","coordinates":[1.23456,2.0]}"#);
        assert_eq!(rounded, r#"{"type":"Point","coordinates":[1.23,2.0]}"#);
        assert!(null.is_none());

        let err = conn
            .query_row("SELECT ST_AsGeoJSON(?1, 16)", params![blob], |row| {
                row.get::<_, String>(0)
            })
            .expect_err("precision out of range");
        assert!(err.to_string().contains("precision"));
        Ok(())
    }

    #[test]
    fn st_transform_reprojects_and_retags() -> crate::Result<()> {
        let conn = connection()?;
        let blob = gpkg_blob_from_geometry(Point::new(180.0, 0.0))?;

        let projected: Vec<u8> =
            conn.query_row("SELECT ST_Transform(?1, 3857)", params![blob], |row| row.get(0))?;
        let (geometry, srid) = decode(&projected)?;
        assert_eq!(srid, 3857);
        let Geometry::Point(point) = geometry else {
            panic!("expected a point");
        };
        assert!((point.x() - 20_037_508.342_789_244).abs() < 1e-6);

        let same: Vec<u8> =
            conn.query_row("SELECT ST_Transform(?1, 4326)", params![blob], |row| row.get(0))?;
        assert_eq!(same, blob);

        let err = conn
            .query_row("SELECT ST_Transform(?1, 27700)", params![blob], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .expect_err("unsupported transform");
        assert!(err.to_string().contains("27700"));
        Ok(())
    }

    #[test]
    fn st_intersects_against_an_envelope() -> crate::Result<()> {
        let conn = connection()?;
        let inside = gpkg_blob_from_geometry(Point::new(0.5, 0.5))?;
        let outside = gpkg_blob_from_geometry(LineString::from(vec![(2.0, 0.0), (0.0, 2.5)]))?;

        let sql = "SELECT ST_Intersects(?1, ST_MakeEnvelope(0, 0, 1, 1, 4326))";
        let hit: i64 = conn.query_row(sql, params![inside], |row| row.get(0))?;
        let miss: i64 = conn.query_row(sql, params![outside], |row| row.get(0))?;
        assert_eq!((hit, miss), (1, 0));

        let null: Option<i64> = conn.query_row(
            "SELECT ST_Intersects(NULL, ST_MakeEnvelope(0, 0, 1, 1, 4326))",
            [],
            |row| row.get(0),
        )?;
        assert!(null.is_none());

        let mixed = "SELECT ST_Intersects(?1, ST_MakeEnvelope(0, 0, 1, 1, 3857))";
        assert!(
            conn.query_row(mixed, params![inside], |row| row.get::<_, i64>(0))
                .is_err()
        );
        Ok(())
    }

    #[test]
    fn st_simplify_and_envelope() -> crate::Result<()> {
        let conn = connection()?;
        let line = LineString::from(vec![(0.0, 0.0), (1.0, 0.01), (2.0, 0.0)]);
        let blob = gpkg_blob_from_geometry(line)?;

        let (simplified, envelope): (String, String) = conn.query_row(
            "SELECT ST_AsGeoJSON(ST_Simplify(?1, 0.1)), ST_AsGeoJSON(ST_Envelope(?1))",
            params![blob],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!(
            simplified,
            r#"{"type":"LineString","coordinates":[[0.0,0.0],[2.0,0.0]]}"#
        );
        let expected = Polygon::new(
            LineString::from(vec![
                (0.0, 0.0),
                (2.0, 0.0),
                (2.0, 0.01),
                (0.0, 0.01),
                (0.0, 0.0),
            ]),
            Vec::new(),
        );
        assert_eq!(
            envelope,
            crate::gpkg::geojson::to_geojson(&Geometry::Polygon(expected), None)
        );
        Ok(())
    }

    #[test]
    fn rejects_non_geometry_arguments() -> crate::Result<()> {
        let conn = connection()?;
        assert!(
            conn.query_row("SELECT ST_MinX('text')", [], |row| row.get::<_, f64>(0))
                .is_err()
        );
        assert!(
            conn.query_row("SELECT ST_AsGeoJSON(X'00')", [], |row| row.get::<_, String>(0))
                .is_err()
        );
        Ok(())
    }
}
