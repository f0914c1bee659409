//! Coordinate reference systems known to the server.
//!
//! Only WGS 84 (EPSG:4326, also addressed as OGC CRS84) and Web Mercator
//! (EPSG:3857) are reprojected. SRID 0 is the GeoPackage "undefined" system
//! and is never transformed.

use crate::error::{GeometryError, InvalidRequest};
use geo_types::Coord;

pub const WGS84: i32 = 4326;
pub const WEB_MERCATOR: i32 = 3857;
pub const UNDEFINED: i32 = 0;

pub const CRS84_URI: &str = "http://www.opengis.net/def/crs/OGC/1.3/CRS84";
const EPSG_URI_PREFIX: &str = "http://www.opengis.net/def/crs/EPSG/0/";

const EARTH_RADIUS: f64 = 6_378_137.0;
const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_779_806_59;

/// Systems that can be reached from one another by a transform.
pub const SUPPORTED: [i32; 2] = [WGS84, WEB_MERCATOR];

/// Parse a CRS given as an integer SRID, `EPSG:<n>`, or an OGC CRS URI.
pub fn parse_crs(text: &str) -> Result<i32, InvalidRequest> {
    let text = text.trim();
    let unsupported = || InvalidRequest::UnsupportedCrs(text.to_string());

    if text == CRS84_URI || text.eq_ignore_ascii_case("CRS84") {
        return Ok(WGS84);
    }
    let code = if let Some(code) = text.strip_prefix(EPSG_URI_PREFIX) {
        code
    } else if let Some(code) = text
        .get(..5)
        .filter(|prefix| prefix.eq_ignore_ascii_case("EPSG:"))
        .map(|_| &text[5..])
    {
        code
    } else {
        text
    };
    code.parse::<i32>()
        .ok()
        .filter(|srid| *srid >= 0)
        .ok_or_else(unsupported)
}

/// URI advertised for `srid`, or `None` for the undefined system.
pub fn crs_uri(srid: i32) -> Option<String> {
    match srid {
        UNDEFINED => None,
        WGS84 => Some(CRS84_URI.to_string()),
        other => Some(format!("{EPSG_URI_PREFIX}{other}")),
    }
}

/// Whether geometries stored in `from` can be served in `to`.
pub fn can_transform(from: i32, to: i32) -> bool {
    from == to || (SUPPORTED.contains(&from) && SUPPORTED.contains(&to))
}

/// Every CRS a collection with native SRID `native` can be served in.
pub fn reachable(native: i32) -> Vec<i32> {
    let mut srids = vec![native];
    if SUPPORTED.contains(&native) {
        srids.extend(SUPPORTED.iter().copied().filter(|srid| *srid != native));
    }
    srids
}

/// Pick the output CRS of a request.
///
/// An explicit request must be reachable from `native`. Without one, the
/// configured default is used when reachable and `native` otherwise.
pub fn resolve_output(
    native: i32,
    requested: Option<i32>,
    default: i32,
) -> Result<i32, InvalidRequest> {
    match requested {
        Some(srid) if can_transform(native, srid) => Ok(srid),
        Some(srid) => Err(InvalidRequest::UnsupportedCrs(srid.to_string())),
        None if can_transform(native, default) => Ok(default),
        None => Ok(native),
    }
}

pub(crate) type CoordTransform = fn(Coord<f64>) -> Coord<f64>;

/// Coordinate function taking `from` to `to`; `None` when they are equal.
pub(crate) fn coord_transform(
    from: i32,
    to: i32,
) -> Result<Option<CoordTransform>, GeometryError> {
    match (from, to) {
        _ if from == to => Ok(None),
        (WGS84, WEB_MERCATOR) => Ok(Some(to_web_mercator as CoordTransform)),
        (WEB_MERCATOR, WGS84) => Ok(Some(from_web_mercator as CoordTransform)),
        _ => Err(GeometryError::UnsupportedTransform { from, to }),
    }
}

pub(crate) fn to_web_mercator(c: Coord<f64>) -> Coord<f64> {
    let lat = c.y.clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
    Coord {
        x: EARTH_RADIUS * c.x.to_radians(),
        y: EARTH_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln(),
    }
}

pub(crate) fn from_web_mercator(c: Coord<f64>) -> Coord<f64> {
    Coord {
        x: (c.x / EARTH_RADIUS).to_degrees(),
        y: (2.0 * (c.y / EARTH_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn parses_every_crs_spelling() {
        assert_eq!(parse_crs("4326"), Ok(WGS84));
        assert_eq!(parse_crs(CRS84_URI), Ok(WGS84));
        assert_eq!(parse_crs("epsg:3857"), Ok(WEB_MERCATOR));
        assert_eq!(
            parse_crs("http://www.opengis.net/def/crs/EPSG/0/3857"),
            Ok(WEB_MERCATOR)
        );
        assert_eq!(parse_crs("27700"), Ok(27700));
        assert!(matches!(
            parse_crs("mars"),
            Err(InvalidRequest::UnsupportedCrs(_))
        ));
        assert!(parse_crs("-1").is_err());
    }

    #[test]
    fn output_crs_falls_back_to_native() {
        assert_eq!(resolve_output(4326, None, 4326), Ok(4326));
        assert_eq!(resolve_output(3857, None, 4326), Ok(4326));
        assert_eq!(resolve_output(0, None, 4326), Ok(0));
        assert_eq!(resolve_output(4326, Some(3857), 4326), Ok(3857));
        assert_eq!(resolve_output(0, Some(0), 4326), Ok(0));
        assert_eq!(
            resolve_output(0, Some(4326), 4326),
            Err(InvalidRequest::UnsupportedCrs("4326".to_string()))
        );
        assert_eq!(
            resolve_output(4326, Some(27700), 4326),
            Err(InvalidRequest::UnsupportedCrs("27700".to_string()))
        );
    }

    #[test]
    fn web_mercator_roundtrip() -> Result<(), GeometryError> {
        let forward = coord_transform(WGS84, WEB_MERCATOR)?.expect("transform");
        let inverse = coord_transform(WEB_MERCATOR, WGS84)?.expect("transform");

        let projected = forward(Coord { x: 180.0, y: 0.0 });
        assert!(close(projected.x, 20_037_508.342_789_244));
        assert!(close(projected.y, 0.0));

        let back = inverse(forward(Coord { x: -73.98, y: 40.75 }));
        assert!(close(back.x, -73.98));
        assert!(close(back.y, 40.75));

        assert!(coord_transform(WGS84, WGS84)?.is_none());
        assert!(coord_transform(UNDEFINED, WGS84).is_err());
        Ok(())
    }

    #[test]
    fn advertises_uris() {
        assert_eq!(crs_uri(4326).as_deref(), Some(CRS84_URI));
        assert_eq!(
            crs_uri(3857).as_deref(),
            Some("http://www.opengis.net/def/crs/EPSG/0/3857")
        );
        assert_eq!(crs_uri(0), None);
        assert_eq!(reachable(3857), vec![3857, 4326]);
        assert_eq!(reachable(0), vec![0]);
    }
}
