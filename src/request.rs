//! Validated, typed form of the query parameters of a features request.

use crate::crs::parse_crs;
use crate::error::{InvalidRequest, Result};
use crate::filter::{Predicate, parse};
use crate::sql_functions::MAX_PRECISION;
use crate::types::Extent;
use std::collections::HashMap;

/// Paging and precision defaults taken from the configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RequestDefaults {
    pub limit_default: u64,
    pub limit_max: u64,
    pub precision: Option<u32>,
}

impl Default for RequestDefaults {
    fn default() -> Self {
        Self {
            limit_default: 10,
            limit_max: 10_000,
            precision: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub property: String,
    pub direction: SortDirection,
}

/// Geometry function applied before output.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GeometryTransform {
    Simplify { tolerance: f64 },
    Envelope,
}

/// One request against a collection, after parameter validation.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    pub collection_id: String,
    pub item_id: Option<String>,
    /// 2D extent; the Z range of a 3D bbox is dropped.
    pub bbox: Option<Extent>,
    pub bbox_crs: Option<i32>,
    pub crs: Option<i32>,
    pub filter_crs: Option<i32>,
    /// Properties to project, in request order; empty means all.
    pub properties: Vec<String>,
    pub filter: Option<Predicate>,
    pub sortby: Vec<SortKey>,
    pub limit: u64,
    pub offset: u64,
    pub precision: Option<u32>,
    pub transforms: Vec<GeometryTransform>,
}

impl RequestDescriptor {
    /// Descriptor for `/collections/{id}/items`.
    pub fn items(
        collection_id: &str,
        params: &HashMap<String, String>,
        defaults: &RequestDefaults,
    ) -> Result<Self> {
        let param = |name: &str| params.get(name).map(String::as_str);

        let limit = match param("limit") {
            Some(text) => parse_count("limit", text)?,
            None => defaults.limit_default,
        }
        .min(defaults.limit_max);
        let offset = match param("offset") {
            Some(text) => parse_count("offset", text)?,
            None => 0,
        };

        Ok(Self {
            collection_id: collection_id.to_string(),
            item_id: None,
            bbox: param("bbox").map(parse_bbox).transpose()?.flatten(),
            bbox_crs: param("bbox-crs").map(parse_crs).transpose()?,
            crs: param("crs").map(parse_crs).transpose()?,
            filter_crs: param("filter-crs").map(parse_crs).transpose()?,
            properties: param("properties").map(parse_list).unwrap_or_default(),
            filter: param("filter")
                .filter(|text| !text.trim().is_empty())
                .map(parse)
                .transpose()?,
            sortby: param("sortby").map(parse_sortby).transpose()?.unwrap_or_default(),
            limit,
            offset,
            precision: parse_precision(param("precision"), defaults)?,
            transforms: param("transform")
                .map(parse_transforms)
                .transpose()?
                .unwrap_or_default(),
        })
    }

    /// Descriptor for `/collections/{id}/items/{item_id}`.
    ///
    /// Only the output parameters apply to a single item.
    pub fn item(
        collection_id: &str,
        item_id: &str,
        params: &HashMap<String, String>,
        defaults: &RequestDefaults,
    ) -> Result<Self> {
        let param = |name: &str| params.get(name).map(String::as_str);
        Ok(Self {
            collection_id: collection_id.to_string(),
            item_id: Some(item_id.to_string()),
            bbox: None,
            bbox_crs: None,
            crs: param("crs").map(parse_crs).transpose()?,
            filter_crs: None,
            properties: param("properties").map(parse_list).unwrap_or_default(),
            filter: None,
            sortby: Vec::new(),
            limit: 1,
            offset: 0,
            precision: parse_precision(param("precision"), defaults)?,
            transforms: param("transform")
                .map(parse_transforms)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

fn out_of_range(parameter: &str, value: &str) -> InvalidRequest {
    InvalidRequest::OutOfRange {
        parameter: parameter.to_string(),
        value: value.to_string(),
    }
}

/// Non-negative integer that fits a SQLite integer.
fn parse_count(parameter: &str, text: &str) -> Result<u64> {
    text.trim()
        .parse::<u64>()
        .ok()
        .filter(|n| i64::try_from(*n).is_ok())
        .ok_or_else(|| out_of_range(parameter, text).into())
}

fn parse_precision(text: Option<&str>, defaults: &RequestDefaults) -> Result<Option<u32>> {
    match text {
        None => Ok(defaults.precision),
        Some(text) => text
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|p| i64::from(*p) <= MAX_PRECISION)
            .map(Some)
            .ok_or_else(|| out_of_range("precision", text).into()),
    }
}

/// `minx,miny,maxx,maxy` or `minx,miny,minz,maxx,maxy,maxz`; empty means absent.
fn parse_bbox(text: &str) -> Result<Option<Extent>> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    let invalid = |reason: &str| InvalidRequest::InvalidBbox(format!("{reason}: {text}"));

    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<f64>, _>>()
        .map_err(|_| invalid("not a list of numbers"))?;
    if values.iter().any(|v| !v.is_finite()) {
        return Err(invalid("coordinates must be finite").into());
    }
    let extent = match values.as_slice() {
        [minx, miny, maxx, maxy] | [minx, miny, _, maxx, maxy, _] => Extent {
            minx: *minx,
            miny: *miny,
            maxx: *maxx,
            maxy: *maxy,
        },
        _ => return Err(invalid("expected 4 or 6 numbers").into()),
    };
    if extent.minx > extent.maxx || extent.miny > extent.maxy {
        return Err(invalid("minimum exceeds maximum").into());
    }
    Ok(Some(extent))
}

fn parse_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `name`, `+name` or `-name`, comma separated.
fn parse_sortby(text: &str) -> Result<Vec<SortKey>> {
    parse_list(text)
        .into_iter()
        .map(|term| -> Result<SortKey> {
            let (direction, property) = if let Some(rest) = term.strip_prefix('-') {
                (SortDirection::Descending, rest)
            } else if let Some(rest) = term.strip_prefix('+') {
                (SortDirection::Ascending, rest)
            } else {
                (SortDirection::Ascending, term.as_str())
            };
            let property = property.trim();
            if property.is_empty() {
                return Err(InvalidRequest::UnknownProperty(term.clone()).into());
            }
            Ok(SortKey {
                property: property.to_string(),
                direction,
            })
        })
        .collect()
}

/// `fn[,arg]*` steps separated by `|`, e.g. `ST_Simplify,0.5|envelope`.
fn parse_transforms(text: &str) -> Result<Vec<GeometryTransform>> {
    let mut transforms = Vec::new();
    for step in text.split('|').map(str::trim).filter(|s| !s.is_empty()) {
        let mut parts = step.split(',').map(str::trim);
        let name = parts.next().unwrap_or_default().to_ascii_lowercase();
        let name = name.strip_prefix("st_").unwrap_or(&name);
        let args = parts
            .map(|arg| arg.parse::<f64>().ok().filter(|v| v.is_finite()))
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| out_of_range("transform", step))?;

        let transform = match (name, args.as_slice()) {
            ("simplify", [tolerance]) if *tolerance >= 0.0 => GeometryTransform::Simplify {
                tolerance: *tolerance,
            },
            ("envelope", []) => GeometryTransform::Envelope,
            _ => return Err(out_of_range("transform", step).into()),
        };
        transforms.push(transform);
    }
    Ok(transforms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn items(pairs: &[(&str, &str)]) -> Result<RequestDescriptor> {
        RequestDescriptor::items("parks", &query(pairs), &RequestDefaults::default())
    }

    fn invalid(result: Result<RequestDescriptor>) -> InvalidRequest {
        match result {
            Err(Error::InvalidRequest(err)) => err,
            other => panic!("expected an invalid request, got {other:?}"),
        }
    }

    #[test]
    fn defaults_apply_without_parameters() -> Result<()> {
        let desc = items(&[("unknown", "ignored")])?;
        assert_eq!(desc.limit, 10);
        assert_eq!(desc.offset, 0);
        assert_eq!(desc.bbox, None);
        assert!(desc.properties.is_empty());
        assert!(desc.filter.is_none());
        assert_eq!(desc.precision, None);
        Ok(())
    }

    #[test]
    fn limit_is_clamped_and_bounds_checked() -> Result<()> {
        assert_eq!(items(&[("limit", "50000")])?.limit, 10_000);
        assert_eq!(items(&[("limit", "0")])?.limit, 0);
        assert!(matches!(
            invalid(items(&[("limit", "-1")])),
            InvalidRequest::OutOfRange { .. }
        ));
        assert!(matches!(
            invalid(items(&[("offset", "ten")])),
            InvalidRequest::OutOfRange { .. }
        ));
        assert!(matches!(
            invalid(items(&[("offset", "18446744073709551615")])),
            InvalidRequest::OutOfRange { .. }
        ));
        Ok(())
    }

    #[test]
    fn parses_bboxes() -> Result<()> {
        let desc = items(&[("bbox", "-180,-90,180,90")])?;
        assert_eq!(
            desc.bbox,
            Some(Extent {
                minx: -180.0,
                miny: -90.0,
                maxx: 180.0,
                maxy: 90.0
            })
        );

        let desc = items(&[("bbox", "1,2,0,3,4,100")])?;
        assert_eq!(
            desc.bbox,
            Some(Extent {
                minx: 1.0,
                miny: 2.0,
                maxx: 3.0,
                maxy: 4.0
            })
        );
        assert_eq!(items(&[("bbox", "")])?.bbox, None);
        Ok(())
    }

    #[test]
    fn rejects_bad_bboxes() {
        for bbox in ["1,2,3", "NaN,0,1,1", "0,0,inf,1", "a,b,c,d", "2,0,1,1", "1,2,3,4,5"] {
            assert!(
                matches!(invalid(items(&[("bbox", bbox)])), InvalidRequest::InvalidBbox(_)),
                "{bbox}"
            );
        }
    }

    #[test]
    fn parses_crs_parameters() -> Result<()> {
        let desc = items(&[
            ("crs", "http://www.opengis.net/def/crs/EPSG/0/3857"),
            ("bbox-crs", "http://www.opengis.net/def/crs/OGC/1.3/CRS84"),
            ("filter-crs", "4326"),
        ])?;
        assert_eq!(desc.crs, Some(3857));
        assert_eq!(desc.bbox_crs, Some(4326));
        assert_eq!(desc.filter_crs, Some(4326));
        assert!(matches!(
            invalid(items(&[("crs", "EPSG:xyz")])),
            InvalidRequest::UnsupportedCrs(_)
        ));
        Ok(())
    }

    #[test]
    fn parses_properties_sortby_and_filter() -> Result<()> {
        let desc = items(&[
            ("properties", "name, id,"),
            ("sortby", "-name,+id,area"),
            ("filter", "name = 'Zion'"),
        ])?;
        assert_eq!(desc.properties, ["name", "id"]);
        assert_eq!(
            desc.sortby,
            [
                SortKey {
                    property: "name".to_string(),
                    direction: SortDirection::Descending
                },
                SortKey {
                    property: "id".to_string(),
                    direction: SortDirection::Ascending
                },
                SortKey {
                    property: "area".to_string(),
                    direction: SortDirection::Ascending
                },
            ]
        );
        assert!(desc.filter.is_some());
        assert!(items(&[("properties", "")])?.properties.is_empty());
        assert!(matches!(
            invalid(items(&[("filter", "name = ")])),
            InvalidRequest::FilterSyntax { .. }
        ));
        Ok(())
    }

    #[test]
    fn parses_precision_and_transforms() -> Result<()> {
        let desc = items(&[("precision", "6"), ("transform", "ST_Simplify,0.5|envelope")])?;
        assert_eq!(desc.precision, Some(6));
        assert_eq!(
            desc.transforms,
            [
                GeometryTransform::Simplify { tolerance: 0.5 },
                GeometryTransform::Envelope
            ]
        );

        for (name, value) in [
            ("precision", "16"),
            ("precision", "-1"),
            ("transform", "buffer,10"),
            ("transform", "simplify"),
            ("transform", "simplify,abc"),
            ("transform", "envelope,1"),
        ] {
            assert!(
                matches!(invalid(items(&[(name, value)])), InvalidRequest::OutOfRange { .. }),
                "{name}={value}"
            );
        }
        Ok(())
    }

    #[test]
    fn configured_precision_is_the_default() -> Result<()> {
        let defaults = RequestDefaults {
            precision: Some(4),
            ..RequestDefaults::default()
        };
        let desc = RequestDescriptor::item("parks", "7", &query(&[]), &defaults)?;
        assert_eq!(desc.precision, Some(4));
        assert_eq!(desc.item_id.as_deref(), Some("7"));
        Ok(())
    }
}
