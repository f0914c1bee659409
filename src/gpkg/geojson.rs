use geo_types::{Coord, Geometry, LineString, Point, Polygon};
use std::fmt::Write;

/// Serialise a geometry as a GeoJSON geometry object.
///
/// Coordinates are rounded half away from zero to `precision` decimals when
/// given; numbers are printed in their shortest round-trip form. An empty
/// point is written with an empty coordinate array.
pub(crate) fn write_geometry(out: &mut String, geom: &Geometry<f64>, precision: Option<u32>) {
    let writer = CoordWriter::new(precision);
    match geom {
        Geometry::Point(point) => {
            out.push_str(r#"{"type":"Point","coordinates":"#);
            writer.point(out, point);
        }
        Geometry::LineString(line) => {
            out.push_str(r#"{"type":"LineString","coordinates":"#);
            writer.line(out, line);
        }
        Geometry::Polygon(poly) => {
            out.push_str(r#"{"type":"Polygon","coordinates":"#);
            writer.polygon(out, poly);
        }
        Geometry::MultiPoint(multi) => {
            out.push_str(r#"{"type":"MultiPoint","coordinates":"#);
            writer.array(out, &multi.0, |out, p| writer.point(out, p));
        }
        Geometry::MultiLineString(multi) => {
            out.push_str(r#"{"type":"MultiLineString","coordinates":"#);
            writer.array(out, &multi.0, |out, l| writer.line(out, l));
        }
        Geometry::MultiPolygon(multi) => {
            out.push_str(r#"{"type":"MultiPolygon","coordinates":"#);
            writer.array(out, &multi.0, |out, p| writer.polygon(out, p));
        }
        Geometry::GeometryCollection(collection) => {
            out.push_str(r#"{"type":"GeometryCollection","geometries":["#);
            for (i, g) in collection.0.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_geometry(out, g, precision);
            }
            out.push(']');
        }
        Geometry::Line(line) => {
            out.push_str(r#"{"type":"LineString","coordinates":"#);
            writer.line(out, &LineString::from(*line));
        }
        Geometry::Rect(rect) => {
            out.push_str(r#"{"type":"Polygon","coordinates":"#);
            writer.polygon(out, &rect.to_polygon());
        }
        Geometry::Triangle(triangle) => {
            out.push_str(r#"{"type":"Polygon","coordinates":"#);
            writer.polygon(out, &triangle.to_polygon());
        }
    }
    out.push('}');
}

pub(crate) fn to_geojson(geom: &Geometry<f64>, precision: Option<u32>) -> String {
    let mut out = String::new();
    write_geometry(&mut out, geom, precision);
    out
}

struct CoordWriter {
    scale: Option<f64>,
}

impl CoordWriter {
    fn new(precision: Option<u32>) -> Self {
        Self {
            scale: precision.map(|p| 10f64.powi(p as i32)),
        }
    }

    fn number(&self, out: &mut String, value: f64) {
        let value = match self.scale {
            Some(scale) => {
                let rounded = (value * scale).round() / scale;
                if rounded.is_finite() { rounded } else { value }
            }
            None => value,
        };
        match serde_json::Number::from_f64(value) {
            Some(number) => {
                let _ = write!(out, "{number}");
            }
            None => out.push_str("null"),
        }
    }

    fn coord(&self, out: &mut String, coord: &Coord<f64>) {
        out.push('[');
        self.number(out, coord.x);
        out.push(',');
        self.number(out, coord.y);
        out.push(']');
    }

    fn point(&self, out: &mut String, point: &Point<f64>) {
        if point.x().is_nan() && point.y().is_nan() {
            out.push_str("[]");
        } else {
            self.coord(out, &point.0);
        }
    }

    fn line(&self, out: &mut String, line: &LineString<f64>) {
        self.array(out, &line.0, |out, c| self.coord(out, c));
    }

    fn polygon(&self, out: &mut String, poly: &Polygon<f64>) {
        if poly.exterior().0.is_empty() {
            out.push_str("[]");
            return;
        }
        out.push('[');
        self.line(out, poly.exterior());
        for ring in poly.interiors() {
            out.push(',');
            self.line(out, ring);
        }
        out.push(']');
    }

    fn array<T, F>(&self, out: &mut String, items: &[T], f: F)
    where
        F: Fn(&mut String, &T),
    {
        out.push('[');
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            f(out, item);
        }
        out.push(']');
    }
}

#[cfg(test)]
mod tests {
    use super::to_geojson;
    use crate::gpkg::geometry::to_geo;
    use geo_types::Geometry;
    use std::str::FromStr;
    use wkt::Wkt;

    fn geom(text: &str) -> Geometry<f64> {
        to_geo(&Wkt::<f64>::from_str(text).expect("valid wkt"))
    }

    #[test]
    fn writes_every_geometry_type() {
        assert_eq!(
            to_geojson(&geom("POINT(1 2)"), None),
            r#"{"type":"Point","coordinates":[1.0,2.0]}"#
        );
        assert_eq!(
            to_geojson(&geom("LINESTRING(0 0,1.5 -2)"), None),
            r#"{"type":"LineString","coordinates":[[0.0,0.0],[1.5,-2.0]]}"#
        );
        assert_eq!(
            to_geojson(&geom("POLYGON((0 0,1 0,1 1,0 0))"), None),
            r#"{"type":"Polygon","coordinates":[[[0.0,0.0],[1.0,0.0],[1.0,1.0],[0.0,0.0]]]}"#
        );
        assert_eq!(
            to_geojson(&geom("MULTIPOINT((1 2),(3 4))"), None),
            r#"{"type":"MultiPoint","coordinates":[[1.0,2.0],[3.0,4.0]]}"#
        );
        assert_eq!(
            to_geojson(&geom("GEOMETRYCOLLECTION(POINT(1 2),POINT EMPTY)"), None),
            r#"{"type":"GeometryCollection","geometries":[{"type":"Point","coordinates":[1.0,2.0]},{"type":"Point","coordinates":[]}]}"#
        );
    }

    #[test]
    fn rounds_to_precision() {
        assert_eq!(
            to_geojson(&geom("POINT(1.23456 -7.65432)"), Some(2)),
            r#"{"type":"Point","coordinates":[1.23,-7.65]}"#
        );
        assert_eq!(
            to_geojson(&geom("POINT(1.5 2.4)"), Some(0)),
            r#"{"type":"Point","coordinates":[2.0,2.0]}"#
        );
    }

    #[test]
    fn output_is_valid_json() -> Result<(), serde_json::Error> {
        let text = to_geojson(
            &geom("MULTIPOLYGON(((0 0,4 0,4 4,0 0),(1 1,2 1,2 2,1 1)),((5 5,6 5,6 6,5 5)))"),
            Some(6),
        );
        let value: serde_json::Value = serde_json::from_str(&text)?;
        assert_eq!(value["type"], "MultiPolygon");
        assert_eq!(value["coordinates"][0][1][2][0], 2.0);
        Ok(())
    }
}
