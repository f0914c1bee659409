//! Owned geometry operations used by the spatial SQL functions.
//!
//! Blobs are decoded through `wkb`'s zero-copy reader and lifted into
//! `geo_types` values through the `geo_traits` accessors; results are written
//! back with `wkb`'s writer.

use super::blob::{gpkg_geometry_to_wkb, read_header, wkb_to_gpkg_geometry};
use crate::error::{GeometryError, Result};
use crate::types::Extent;
use geo_traits::{
    CoordTrait, GeometryCollectionTrait, GeometryTrait, LineStringTrait, LineTrait,
    MultiLineStringTrait, MultiPointTrait, MultiPolygonTrait, PointTrait, PolygonTrait, RectTrait,
    TriangleTrait,
};
use geo_types::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};

/// Decode a GeoPackage blob into an owned geometry and its header SRID.
pub(crate) fn decode(blob: &[u8]) -> Result<(Geometry<f64>, i32)> {
    let srs_id = read_header(blob)?.srs_id;
    let wkb = gpkg_geometry_to_wkb(blob)?;
    Ok((to_geo(&wkb), srs_id))
}

/// Encode an owned geometry into a GeoPackage blob.
pub(crate) fn encode(geometry: &Geometry<f64>, srs_id: i32) -> Result<Vec<u8>> {
    let mut wkb = Vec::new();
    wkb::writer::write_geometry(&mut wkb, geometry, &Default::default())
        .map_err(GeometryError::from)?;
    let is_empty = bounds(geometry).is_none();
    Ok(wkb_to_gpkg_geometry(&wkb, srs_id, is_empty))
}

/// Lift any `geo_traits` geometry into `geo_types`, dropping Z and M.
///
/// An empty point has no `geo_types` spelling, so it becomes a point with NaN
/// coordinates, which is also how WKB spells it.
pub(crate) fn to_geo<G: GeometryTrait<T = f64>>(geom: &G) -> Geometry<f64> {
    use geo_traits::GeometryType as GeoType;

    match geom.as_type() {
        GeoType::Point(point) => Geometry::Point(point_of(point)),
        GeoType::LineString(line) => Geometry::LineString(line_string_of(line)),
        GeoType::Polygon(poly) => Geometry::Polygon(polygon_of(poly)),
        GeoType::MultiPoint(multi) => {
            Geometry::MultiPoint(MultiPoint(multi.points().map(|p| point_of(&p)).collect()))
        }
        GeoType::MultiLineString(multi) => Geometry::MultiLineString(MultiLineString(
            multi.line_strings().map(|l| line_string_of(&l)).collect(),
        )),
        GeoType::MultiPolygon(multi) => Geometry::MultiPolygon(MultiPolygon(
            multi.polygons().map(|p| polygon_of(&p)).collect(),
        )),
        GeoType::GeometryCollection(collection) => Geometry::GeometryCollection(
            GeometryCollection(collection.geometries().map(|g| to_geo(&g)).collect()),
        ),
        GeoType::Line(line) => Geometry::LineString(LineString::new(vec![
            coord_of(&line.start()),
            coord_of(&line.end()),
        ])),
        GeoType::Rect(rect) => {
            let (min, max) = (coord_of(&rect.min()), coord_of(&rect.max()));
            Geometry::Polygon(Polygon::new(
                LineString::from(vec![
                    (min.x, min.y),
                    (max.x, min.y),
                    (max.x, max.y),
                    (min.x, max.y),
                    (min.x, min.y),
                ]),
                Vec::new(),
            ))
        }
        GeoType::Triangle(triangle) => {
            let first = coord_of(&triangle.first());
            Geometry::Polygon(Polygon::new(
                LineString::new(vec![
                    first,
                    coord_of(&triangle.second()),
                    coord_of(&triangle.third()),
                    first,
                ]),
                Vec::new(),
            ))
        }
    }
}

fn coord_of<C: CoordTrait<T = f64>>(coord: &C) -> Coord<f64> {
    let (x, y) = coord.x_y();
    Coord { x, y }
}

fn point_of<P: PointTrait<T = f64>>(point: &P) -> Point<f64> {
    match point.coord() {
        Some(coord) => Point(coord_of(&coord)),
        None => Point::new(f64::NAN, f64::NAN),
    }
}

fn line_string_of<L: LineStringTrait<T = f64>>(line: &L) -> LineString<f64> {
    LineString::new(line.coords().map(|c| coord_of(&c)).collect())
}

fn polygon_of<P: PolygonTrait<T = f64>>(poly: &P) -> Polygon<f64> {
    let exterior = poly
        .exterior()
        .map(|ring| line_string_of(&ring))
        .unwrap_or_else(|| LineString::new(Vec::new()));
    let interiors = poly.interiors().map(|ring| line_string_of(&ring)).collect();
    Polygon::new(exterior, interiors)
}

/// Bounding rectangle of every finite coordinate, or `None` when empty.
pub(crate) fn bounds<G: GeometryTrait<T = f64>>(geom: &G) -> Option<Extent> {
    use geo_traits::GeometryType as GeoType;

    let mut bounds: Option<Extent> = None;
    match geom.as_type() {
        GeoType::Point(point) => {
            if let Some(coord) = point.coord() {
                add_coord(&mut bounds, &coord);
            }
        }
        GeoType::LineString(line) => add_line_string(&mut bounds, line),
        GeoType::Polygon(poly) => add_polygon(&mut bounds, poly),
        GeoType::MultiPoint(multi) => {
            for point in multi.points() {
                if let Some(coord) = point.coord() {
                    add_coord(&mut bounds, &coord);
                }
            }
        }
        GeoType::MultiLineString(multi) => {
            for line in multi.line_strings() {
                add_line_string(&mut bounds, &line);
            }
        }
        GeoType::MultiPolygon(multi) => {
            for poly in multi.polygons() {
                add_polygon(&mut bounds, &poly);
            }
        }
        GeoType::GeometryCollection(collection) => {
            for sub_geom in collection.geometries() {
                if let Some(sub_bounds) = self::bounds(&sub_geom) {
                    merge_bounds(&mut bounds, sub_bounds);
                }
            }
        }
        GeoType::Line(line) => {
            add_coord(&mut bounds, &line.start());
            add_coord(&mut bounds, &line.end());
        }
        GeoType::Rect(rect) => {
            add_coord(&mut bounds, &rect.min());
            add_coord(&mut bounds, &rect.max());
        }
        GeoType::Triangle(triangle) => {
            add_coord(&mut bounds, &triangle.first());
            add_coord(&mut bounds, &triangle.second());
            add_coord(&mut bounds, &triangle.third());
        }
    }

    bounds
}

fn add_polygon<P: PolygonTrait<T = f64>>(bounds: &mut Option<Extent>, poly: &P) {
    if let Some(ring) = poly.exterior() {
        add_line_string(bounds, &ring);
    }
    for ring in poly.interiors() {
        add_line_string(bounds, &ring);
    }
}

fn add_line_string<L: LineStringTrait<T = f64>>(bounds: &mut Option<Extent>, line: &L) {
    for coord in line.coords() {
        add_coord(bounds, &coord);
    }
}

fn add_coord<C: CoordTrait<T = f64>>(bounds: &mut Option<Extent>, coord: &C) {
    let (x, y) = coord.x_y();
    if !x.is_finite() || !y.is_finite() {
        return;
    }
    merge_bounds(
        bounds,
        Extent {
            minx: x,
            miny: y,
            maxx: x,
            maxy: y,
        },
    );
}

fn merge_bounds(bounds: &mut Option<Extent>, other: Extent) {
    match bounds {
        Some(existing) => {
            existing.minx = existing.minx.min(other.minx);
            existing.maxx = existing.maxx.max(other.maxx);
            existing.miny = existing.miny.min(other.miny);
            existing.maxy = existing.maxy.max(other.maxy);
        }
        None => *bounds = Some(other),
    }
}

/// Closed counter-clockwise rectangle.
pub(crate) fn rect_polygon(extent: &Extent) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![
            (extent.minx, extent.miny),
            (extent.maxx, extent.miny),
            (extent.maxx, extent.maxy),
            (extent.minx, extent.maxy),
            (extent.minx, extent.miny),
        ]),
        Vec::new(),
    )
}

/// Bounding rectangle as a geometry: a point or a line when degenerate, an
/// empty collection when there is nothing to bound.
pub(crate) fn envelope(geom: &Geometry<f64>) -> Geometry<f64> {
    match bounds(geom) {
        None => Geometry::GeometryCollection(GeometryCollection(Vec::new())),
        Some(b) if b.minx == b.maxx && b.miny == b.maxy => Geometry::Point(Point::new(b.minx, b.miny)),
        Some(b) if b.minx == b.maxx || b.miny == b.maxy => Geometry::LineString(LineString::from(
            vec![(b.minx, b.miny), (b.maxx, b.maxy)],
        )),
        Some(b) => Geometry::Polygon(rect_polygon(&b)),
    }
}

/// Apply `f` to every coordinate.
pub(crate) fn map_coords<F>(geom: &Geometry<f64>, f: &F) -> Geometry<f64>
where
    F: Fn(Coord<f64>) -> Coord<f64>,
{
    let map_line = |line: &LineString<f64>| LineString::new(line.0.iter().map(|c| f(*c)).collect());
    let map_polygon = |poly: &Polygon<f64>| {
        Polygon::new(
            map_line(poly.exterior()),
            poly.interiors().iter().map(&map_line).collect(),
        )
    };
    let map_point = |point: &Point<f64>| {
        if point.x().is_nan() {
            *point
        } else {
            Point(f(point.0))
        }
    };

    match geom {
        Geometry::Point(point) => Geometry::Point(map_point(point)),
        Geometry::LineString(line) => Geometry::LineString(map_line(line)),
        Geometry::Polygon(poly) => Geometry::Polygon(map_polygon(poly)),
        Geometry::MultiPoint(multi) => {
            Geometry::MultiPoint(MultiPoint(multi.0.iter().map(&map_point).collect()))
        }
        Geometry::MultiLineString(multi) => {
            Geometry::MultiLineString(MultiLineString(multi.0.iter().map(&map_line).collect()))
        }
        Geometry::MultiPolygon(multi) => {
            Geometry::MultiPolygon(MultiPolygon(multi.0.iter().map(&map_polygon).collect()))
        }
        Geometry::GeometryCollection(collection) => Geometry::GeometryCollection(
            GeometryCollection(collection.0.iter().map(|g| map_coords(g, f)).collect()),
        ),
        Geometry::Line(line) => Geometry::LineString(map_line(&LineString::from(*line))),
        Geometry::Rect(rect) => Geometry::Polygon(map_polygon(&rect.to_polygon())),
        Geometry::Triangle(triangle) => Geometry::Polygon(map_polygon(&triangle.to_polygon())),
    }
}

/// Douglas-Peucker simplification of every line and ring.
///
/// Rings that would collapse below four positions are kept as they are, so
/// polygons stay valid.
pub(crate) fn simplify(geom: &Geometry<f64>, tolerance: f64) -> Geometry<f64> {
    let simplify_ring = |ring: &LineString<f64>| {
        let simplified = douglas_peucker(&ring.0, tolerance);
        if simplified.len() < 4 {
            ring.clone()
        } else {
            LineString::new(simplified)
        }
    };
    let simplify_line = |line: &LineString<f64>| LineString::new(douglas_peucker(&line.0, tolerance));
    let simplify_polygon = |poly: &Polygon<f64>| {
        Polygon::new(
            simplify_ring(poly.exterior()),
            poly.interiors().iter().map(&simplify_ring).collect(),
        )
    };

    match geom {
        Geometry::LineString(line) => Geometry::LineString(simplify_line(line)),
        Geometry::Polygon(poly) => Geometry::Polygon(simplify_polygon(poly)),
        Geometry::MultiLineString(multi) => {
            Geometry::MultiLineString(MultiLineString(multi.0.iter().map(&simplify_line).collect()))
        }
        Geometry::MultiPolygon(multi) => {
            Geometry::MultiPolygon(MultiPolygon(multi.0.iter().map(&simplify_polygon).collect()))
        }
        Geometry::GeometryCollection(collection) => Geometry::GeometryCollection(
            GeometryCollection(collection.0.iter().map(|g| simplify(g, tolerance)).collect()),
        ),
        other => other.clone(),
    }
}

fn douglas_peucker(coords: &[Coord<f64>], tolerance: f64) -> Vec<Coord<f64>> {
    if coords.len() < 3 {
        return coords.to_vec();
    }
    let mut keep = vec![false; coords.len()];
    keep[0] = true;
    keep[coords.len() - 1] = true;

    let mut stack = vec![(0, coords.len() - 1)];
    while let Some((start, end)) = stack.pop() {
        let mut max_distance = 0.0;
        let mut index = start;
        for i in (start + 1)..end {
            let distance = segment_distance(coords[i], coords[start], coords[end]);
            if distance > max_distance {
                max_distance = distance;
                index = i;
            }
        }
        if max_distance > tolerance {
            keep[index] = true;
            stack.push((start, index));
            stack.push((index, end));
        }
    }

    coords
        .iter()
        .zip(keep)
        .filter_map(|(c, kept)| kept.then_some(*c))
        .collect()
}

fn segment_distance(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let length_sq = dx * dx + dy * dy;
    if length_sq == 0.0 {
        return (p.x - a.x).hypot(p.y - a.y);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / length_sq).clamp(0.0, 1.0);
    (p.x - (a.x + t * dx)).hypot(p.y - (a.y + t * dy))
}

/// The rectangle a polygon describes, when it is an axis-aligned rectangle
/// without holes.
pub(crate) fn as_rect(geom: &Geometry<f64>) -> Option<Extent> {
    let Geometry::Polygon(poly) = geom else {
        return None;
    };
    let ring = &poly.exterior().0;
    if !poly.interiors().is_empty() || ring.len() != 5 {
        return None;
    }
    let extent = bounds(geom)?;
    let on_corner = |c: &Coord<f64>| {
        (c.x == extent.minx || c.x == extent.maxx) && (c.y == extent.miny || c.y == extent.maxy)
    };
    let axis_aligned = ring
        .windows(2)
        .all(|w| w[0].x == w[1].x || w[0].y == w[1].y);
    (ring.iter().all(on_corner) && axis_aligned).then_some(extent)
}

/// Intersection test: exact when one side is an axis-aligned rectangle,
/// bounding boxes otherwise.
pub(crate) fn intersects(a: &Geometry<f64>, b: &Geometry<f64>) -> bool {
    if let Some(rect) = as_rect(b) {
        intersects_rect(a, &rect)
    } else if let Some(rect) = as_rect(a) {
        intersects_rect(b, &rect)
    } else {
        match (bounds(a), bounds(b)) {
            (Some(a), Some(b)) => a.intersects(&b),
            _ => false,
        }
    }
}

/// Exact intersection of a geometry with a closed rectangle.
pub(crate) fn intersects_rect(geom: &Geometry<f64>, rect: &Extent) -> bool {
    match geom {
        Geometry::Point(point) => contains_coord(rect, &point.0),
        Geometry::MultiPoint(multi) => multi.0.iter().any(|p| contains_coord(rect, &p.0)),
        Geometry::LineString(line) => line_intersects_rect(line, rect),
        Geometry::MultiLineString(multi) => multi.0.iter().any(|l| line_intersects_rect(l, rect)),
        Geometry::Polygon(poly) => polygon_intersects_rect(poly, rect),
        Geometry::MultiPolygon(multi) => multi.0.iter().any(|p| polygon_intersects_rect(p, rect)),
        Geometry::GeometryCollection(collection) => {
            collection.0.iter().any(|g| intersects_rect(g, rect))
        }
        other => bounds(other).is_some_and(|b| b.intersects(rect)),
    }
}

fn contains_coord(rect: &Extent, c: &Coord<f64>) -> bool {
    c.x >= rect.minx && c.x <= rect.maxx && c.y >= rect.miny && c.y <= rect.maxy
}

fn rect_edges(rect: &Extent) -> [(Coord<f64>, Coord<f64>); 4] {
    let a = Coord { x: rect.minx, y: rect.miny };
    let b = Coord { x: rect.maxx, y: rect.miny };
    let c = Coord { x: rect.maxx, y: rect.maxy };
    let d = Coord { x: rect.minx, y: rect.maxy };
    [(a, b), (b, c), (c, d), (d, a)]
}

fn line_intersects_rect(line: &LineString<f64>, rect: &Extent) -> bool {
    if line.0.iter().any(|c| contains_coord(rect, c)) {
        return true;
    }
    let edges = rect_edges(rect);
    line.0.windows(2).any(|w| {
        edges
            .iter()
            .any(|(p, q)| segments_intersect(w[0], w[1], *p, *q))
    })
}

fn polygon_intersects_rect(poly: &Polygon<f64>, rect: &Extent) -> bool {
    if poly.exterior().0.is_empty() {
        return false;
    }
    if line_intersects_rect(poly.exterior(), rect)
        || poly.interiors().iter().any(|ring| line_intersects_rect(ring, rect))
    {
        return true;
    }
    // rectangle entirely inside the polygon
    let corner = Coord {
        x: rect.minx,
        y: rect.miny,
    };
    ring_contains(poly.exterior(), corner)
        && !poly.interiors().iter().any(|ring| ring_contains(ring, corner))
}

fn ring_contains(ring: &LineString<f64>, p: Coord<f64>) -> bool {
    let mut inside = false;
    for w in ring.0.windows(2) {
        let (a, b) = (w[0], w[1]);
        if (a.y > p.y) != (b.y > p.y) {
            let x = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if p.x < x {
                inside = !inside;
            }
        }
    }
    inside
}

fn orientation(a: Coord<f64>, b: Coord<f64>, c: Coord<f64>) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn on_segment(a: Coord<f64>, b: Coord<f64>, p: Coord<f64>) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

fn segments_intersect(p1: Coord<f64>, p2: Coord<f64>, q1: Coord<f64>, q2: Coord<f64>) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use wkt::Wkt;

    fn geom(text: &str) -> Geometry<f64> {
        let parsed = Wkt::<f64>::from_str(text).expect("valid wkt");
        to_geo(&parsed)
    }

    fn extent(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Extent {
        Extent {
            minx,
            miny,
            maxx,
            maxy,
        }
    }

    #[test]
    fn blob_roundtrip_preserves_geometry_and_srid() -> Result<()> {
        let polygon = geom("POLYGON((0 0,4 0,4 4,0 4,0 0),(1 1,2 1,2 2,1 1))");
        let blob = encode(&polygon, 4326)?;
        let (decoded, srid) = decode(&blob)?;
        assert_eq!(decoded, polygon);
        assert_eq!(srid, 4326);
        Ok(())
    }

    #[test]
    fn bounds_skip_empty_points() {
        let collection = geom("GEOMETRYCOLLECTION(POINT EMPTY,LINESTRING(-2 2,1 3))");
        assert_eq!(bounds(&collection), Some(extent(-2.0, 2.0, 1.0, 3.0)));
        assert_eq!(bounds(&geom("POINT EMPTY")), None);
    }

    #[test]
    fn envelope_degrades_for_degenerate_bounds() {
        assert_eq!(
            envelope(&geom("LINESTRING(0 0,2 3)")),
            Geometry::Polygon(rect_polygon(&extent(0.0, 0.0, 2.0, 3.0)))
        );
        assert_eq!(envelope(&geom("POINT(1 2)")), Geometry::Point(Point::new(1.0, 2.0)));
        assert!(matches!(
            envelope(&geom("LINESTRING(0 0,0 3)")),
            Geometry::LineString(_)
        ));
    }

    #[test]
    fn simplify_drops_points_within_tolerance() {
        let line = geom("LINESTRING(0 0,1 0.1,2 -0.1,3 5,4 6,5 7.1,6 8)");
        let Geometry::LineString(simplified) = simplify(&line, 0.5) else {
            panic!("expected a linestring");
        };
        assert_eq!(
            simplified,
            LineString::from(vec![(0.0, 0.0), (2.0, -0.1), (3.0, 5.0), (6.0, 8.0)])
        );
    }

    #[test]
    fn simplify_keeps_small_rings_intact() {
        let triangle = geom("POLYGON((0 0,1 0,0.5 0.01,0 0))");
        assert_eq!(simplify(&triangle, 10.0), triangle);
    }

    #[test]
    fn recognises_axis_aligned_rectangles() {
        assert_eq!(
            as_rect(&geom("POLYGON((0 0,0 2,3 2,3 0,0 0))")),
            Some(extent(0.0, 0.0, 3.0, 2.0))
        );
        assert_eq!(as_rect(&geom("POLYGON((0 0,1 1,3 2,3 0,0 0))")), None);
        assert_eq!(as_rect(&geom("POINT(1 1)")), None);
    }

    #[test]
    fn rectangle_intersection_is_exact() {
        let rect = extent(0.0, 0.0, 1.0, 1.0);
        assert!(intersects_rect(&geom("LINESTRING(1.5 0,0 1.5)"), &rect));
        // bounding boxes overlap, the line itself passes by the corner
        assert!(!intersects_rect(&geom("LINESTRING(2 0,0 2.5)"), &rect));
        assert!(intersects_rect(&geom("LINESTRING(-1 0.5,2 0.5)"), &rect));
        assert!(intersects_rect(&geom("POINT(1 1)"), &rect));
        assert!(!intersects_rect(&geom("POINT(1.01 1)"), &rect));
        // rectangle inside a polygon, and inside one of its holes
        assert!(intersects_rect(&geom("POLYGON((-5 -5,5 -5,5 5,-5 5,-5 -5))"), &rect));
        assert!(!intersects_rect(
            &geom("POLYGON((-5 -5,5 -5,5 5,-5 5,-5 -5),(-2 -2,3 -2,3 3,-2 3,-2 -2))"),
            &rect
        ));
    }

    #[test]
    fn general_intersection_falls_back_to_bounds() {
        let a = geom("LINESTRING(0 0,10 10)");
        let b = geom("LINESTRING(0 10,1 9)");
        assert!(intersects(&a, &b));
        let far = geom("POINT(20 20)");
        assert!(!intersects(&a, &far));
    }

    #[test]
    fn map_coords_leaves_empty_points_alone() {
        let shifted = map_coords(&geom("GEOMETRYCOLLECTION(POINT(1 1),POINT EMPTY)"), &|c| Coord {
            x: c.x + 1.0,
            y: c.y,
        });
        let Geometry::GeometryCollection(collection) = shifted else {
            panic!("expected a collection");
        };
        assert_eq!(collection.0[0], Geometry::Point(Point::new(2.0, 1.0)));
        assert!(matches!(collection.0[1], Geometry::Point(p) if p.x().is_nan()));
    }
}
