//! Translation of a request descriptor into one parameterised SQL statement.
//!
//! The statement projects the requested properties, the primary key when it
//! is needed for the feature id, and finally the geometry as GeoJSON text:
//!
//! ```text
//! SELECT "id","name", ST_AsGeoJSON("geom") FROM "public"."parks"
//!   WHERE (("name" = ?) AND ("id" > ?)) AND ST_Intersects("geom", ST_MakeEnvelope(?,?,?,?,?))
//!   ORDER BY "id" ASC LIMIT ? OFFSET ?
//! ```
//!
//! Literal values are always bound; only identifiers (quoted), SRIDs and the
//! precision (validated integers) appear in the SQL text.

use crate::crs::{WGS84, can_transform, resolve_output};
use crate::error::{Error, InvalidRequest, Result};
use crate::ident::{quote_catalog_identifier, quote_table};
use crate::request::{GeometryTransform, RequestDescriptor, SortDirection};
use crate::types::{Collection, ColumnSpec, ColumnType};
use rusqlite::types::Value as SqlValue;

/// A non-geometry column of the result set.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedColumn {
    pub spec: ColumnSpec,
    /// Emitted under `properties`.
    pub is_property: bool,
    /// Hoisted into the feature `id`.
    pub is_key: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryPlan {
    pub sql: String,
    pub params: Vec<SqlValue>,
    /// Non-geometry columns in select order; the geometry text follows them.
    pub columns: Vec<PlannedColumn>,
    /// SRID of the emitted geometries.
    pub output_srid: i32,
}

impl QueryPlan {
    /// Index of the GeoJSON geometry column in each row.
    pub fn geometry_index(&self) -> usize {
        self.columns.len()
    }
}

/// Plan a `/items` request: filter, bbox, ordering and paging.
pub fn plan_items(
    collection: &Collection,
    request: &RequestDescriptor,
    default_crs: i32,
) -> Result<QueryPlan> {
    let mut builder = PlanBuilder::new(collection, request, default_crs)?;

    let mut conditions = Vec::new();
    if let Some(filter) = &request.filter {
        if let Some(srid) = request.filter_crs {
            check_reachable(srid, collection.srid)?;
        }
        conditions.push(filter.to_sql(collection, &mut builder.params)?);
    }
    if let Some(bbox) = &request.bbox {
        let bbox_srid = match request.bbox_crs {
            Some(srid) => check_reachable(srid, collection.srid)?,
            None if can_transform(WGS84, collection.srid) => WGS84,
            None => collection.srid,
        };
        let envelope = if bbox_srid == collection.srid {
            "ST_MakeEnvelope(?,?,?,?,?)".to_string()
        } else {
            format!("ST_Transform(ST_MakeEnvelope(?,?,?,?,?), {})", collection.srid)
        };
        builder.params.extend([
            SqlValue::Real(bbox.minx),
            SqlValue::Real(bbox.miny),
            SqlValue::Real(bbox.maxx),
            SqlValue::Real(bbox.maxy),
            SqlValue::Integer(i64::from(bbox_srid)),
        ]);
        conditions.push(format!(
            "ST_Intersects({}, {envelope})",
            quote_catalog_identifier(&collection.geometry_column)?
        ));
    }

    let mut order = Vec::with_capacity(request.sortby.len());
    for key in &request.sortby {
        let spec = property(collection, &key.property)?;
        let direction = match key.direction {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        };
        order.push(format!("{} {direction}", quote_catalog_identifier(&spec.name)?));
    }
    if order.is_empty() {
        if let Some(pk) = &collection.primary_key {
            order.push(format!("{} ASC", quote_catalog_identifier(pk)?));
        }
    }

    let mut sql = builder.select_from()?;
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    if !order.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
    }
    sql.push_str(" LIMIT ? OFFSET ?");
    builder.params.push(SqlValue::Integer(to_i64("limit", request.limit)?));
    builder.params.push(SqlValue::Integer(to_i64("offset", request.offset)?));

    Ok(builder.finish(sql))
}

/// Plan a single-item request, matching the primary key against `item_id`.
pub fn plan_item(
    collection: &Collection,
    request: &RequestDescriptor,
    default_crs: i32,
) -> Result<QueryPlan> {
    let pk = collection
        .primary_key
        .as_deref()
        .ok_or_else(|| InvalidRequest::NoPrimaryKey(collection.id.clone()))?;
    let item_id = request
        .item_id
        .as_deref()
        .ok_or_else(|| Error::Internal("item request without an item id".to_string()))?;

    let mut builder = PlanBuilder::new(collection, request, default_crs)?;
    let key_type = collection
        .property(pk)
        .map(|spec| spec.column_type)
        .unwrap_or(ColumnType::Other);
    let key_value = match (key_type, item_id.parse::<i64>()) {
        (ColumnType::Integer, Ok(id)) => SqlValue::Integer(id),
        _ => SqlValue::Text(item_id.to_string()),
    };
    builder.params.push(key_value);

    let sql = format!(
        "{} WHERE {} = ?",
        builder.select_from()?,
        quote_catalog_identifier(pk)?
    );
    Ok(builder.finish(sql))
}

/// Projection and geometry pipeline shared by both request kinds.
struct PlanBuilder<'a> {
    collection: &'a Collection,
    columns: Vec<PlannedColumn>,
    geometry: String,
    params: Vec<SqlValue>,
    output_srid: i32,
}

impl<'a> PlanBuilder<'a> {
    fn new(collection: &'a Collection, request: &RequestDescriptor, default_crs: i32) -> Result<Self> {
        let output_srid = resolve_output(collection.srid, request.crs, default_crs)?;
        let pk = collection.primary_key.as_deref();

        let selected: Vec<&ColumnSpec> = if request.properties.is_empty() {
            collection.properties.iter().collect()
        } else {
            request
                .properties
                .iter()
                .map(|name| property(collection, name))
                .collect::<Result<_>>()?
        };
        let mut columns: Vec<PlannedColumn> = selected
            .into_iter()
            .map(|spec| PlannedColumn {
                spec: spec.clone(),
                is_property: true,
                is_key: Some(spec.name.as_str()) == pk,
            })
            .collect();
        if let Some(pk) = pk {
            if !columns.iter().any(|c| c.is_key) {
                let spec = collection.property(pk).cloned().unwrap_or(ColumnSpec {
                    name: pk.to_string(),
                    column_type: ColumnType::Other,
                    nullable: false,
                });
                columns.push(PlannedColumn {
                    spec,
                    is_property: false,
                    is_key: true,
                });
            }
        }

        let mut params = Vec::new();
        let mut geometry = quote_catalog_identifier(&collection.geometry_column)?;
        for transform in &request.transforms {
            geometry = match transform {
                GeometryTransform::Simplify { tolerance } => {
                    params.push(SqlValue::Real(*tolerance));
                    format!("ST_Simplify({geometry}, ?)")
                }
                GeometryTransform::Envelope => format!("ST_Envelope({geometry})"),
            };
        }
        if output_srid != collection.srid {
            geometry = format!("ST_Transform({geometry}, {output_srid})");
        }
        geometry = match request.precision {
            Some(precision) => format!("ST_AsGeoJSON({geometry}, {precision})"),
            None => format!("ST_AsGeoJSON({geometry})"),
        };

        Ok(Self {
            collection,
            columns,
            geometry,
            params,
            output_srid,
        })
    }

    fn select_from(&self) -> Result<String> {
        let mut projection = self
            .columns
            .iter()
            .map(|c| quote_catalog_identifier(&c.spec.name))
            .collect::<Result<Vec<String>>>()?
            .join(",");
        if !projection.is_empty() {
            projection.push_str(", ");
        }
        let table = quote_table(
            &self.collection.schema,
            &self.collection.table,
            !self.collection.has_default_schema(),
        )?;
        Ok(format!("SELECT {projection}{} FROM {table}", self.geometry))
    }

    fn finish(self, sql: String) -> QueryPlan {
        QueryPlan {
            sql,
            params: self.params,
            columns: self.columns,
            output_srid: self.output_srid,
        }
    }
}

fn property<'a>(collection: &'a Collection, name: &str) -> Result<&'a ColumnSpec> {
    collection
        .property(name)
        .ok_or_else(|| InvalidRequest::UnknownProperty(name.to_string()).into())
}

/// `srid` if geometries in `native` can be compared with it.
fn check_reachable(srid: i32, native: i32) -> Result<i32> {
    if can_transform(srid, native) {
        Ok(srid)
    } else {
        Err(InvalidRequest::UnsupportedCrs(srid.to_string()).into())
    }
}

fn to_i64(parameter: &str, value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| {
        InvalidRequest::OutOfRange {
            parameter: parameter.to_string(),
            value: value.to_string(),
        }
        .into()
    })
}
