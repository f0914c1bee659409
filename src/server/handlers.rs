use super::links::{PageLinks, base_url, href};
use super::{ApiError, AppState, GEOJSON, JSON};
use crate::conversions::geometry_type_to_geojson;
use crate::crs::{CRS84_URI, WGS84, can_transform, coord_transform, crs_uri, reachable};
use crate::encoder::{FeatureRow, FeatureWriter, Link, encode_feature};
use crate::error::{Error, Result};
use crate::planner::{QueryPlan, plan_item, plan_items};
use crate::pool::PooledConnection;
use crate::request::RequestDescriptor;
use crate::types::{Collection, Extent};
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use geo_types::Coord;
use parking_lot::Mutex;
use rusqlite::{OptionalExtension, params_from_iter};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

const CONFORMANCE: [&str; 4] = [
    "http://www.opengis.net/spec/ogcapi-features-1/1.0/conf/core",
    "http://www.opengis.net/spec/ogcapi-features-1/1.0/conf/geojson",
    "http://www.opengis.net/spec/ogcapi-features-1/1.0/conf/oas30",
    "http://www.opengis.net/spec/ogcapi-features-2/1.0/conf/crs",
];

const CONTENT_CRS: HeaderName = HeaderName::from_static("content-crs");

/// Bytes buffered before a chunk is handed to the response body.
const CHUNK_BYTES: usize = 64 * 1024;
/// Chunks in flight between the query task and the response body.
const CHANNEL_CHUNKS: usize = 4;

type Params = Query<HashMap<String, String>>;
type Chunk = std::result::Result<String, std::io::Error>;

#[derive(Serialize)]
pub(crate) struct Landing {
    title: String,
    description: String,
    links: Vec<Link>,
}

pub(crate) async fn landing(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Json<Landing>, ApiError> {
    let base = base_url(&state.config.server, &headers);
    Ok(Json(Landing {
        title: state.config.metadata.title.clone(),
        description: state.config.metadata.description.clone(),
        links: vec![
            Link::new(href(&base, &[])?, "self", JSON).with_title("This document"),
            Link::new(href(&base, &["conformance"])?, "conformance", JSON)
                .with_title("Conformance classes"),
            Link::new(href(&base, &["collections"])?, "data", JSON).with_title("Collections"),
        ],
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Conformance {
    conforms_to: [&'static str; 4],
}

pub(crate) async fn conformance() -> Json<Conformance> {
    Json(Conformance {
        conforms_to: CONFORMANCE,
    })
}

pub(crate) async fn health(
    State(state): State<AppState>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    state.pool.check().await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

#[derive(Serialize)]
pub(crate) struct CollectionList {
    collections: Vec<CollectionInfo>,
    links: Vec<Link>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CollectionInfo {
    id: String,
    title: String,
    description: String,
    item_type: &'static str,
    geometry_type: &'static str,
    crs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage_crs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extent: Option<ExtentInfo>,
    /// Row count from `sqlite_stat1`; absent until the table is analyzed.
    #[serde(skip_serializing_if = "Option::is_none")]
    item_count: Option<u64>,
    links: Vec<Link>,
}

#[derive(Serialize)]
pub(crate) struct ExtentInfo {
    spatial: SpatialExtent,
}

#[derive(Serialize)]
pub(crate) struct SpatialExtent {
    bbox: Vec<[f64; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    crs: Option<String>,
}

impl CollectionInfo {
    fn new(collection: &Collection, base: &str) -> Result<Self> {
        Ok(Self {
            id: collection.id.clone(),
            title: collection.title.clone(),
            description: collection.description.clone(),
            item_type: "feature",
            geometry_type: geometry_type_to_geojson(collection.geometry_type),
            crs: reachable(collection.srid)
                .into_iter()
                .filter_map(crs_uri)
                .collect(),
            storage_crs: crs_uri(collection.srid),
            extent: collection
                .extent
                .map(|extent| extent_info(&extent, collection.srid)),
            item_count: collection.row_estimate,
            links: vec![
                Link::new(href(base, &["collections", &collection.id])?, "self", JSON)
                    .with_title("This collection"),
                Link::new(
                    href(base, &["collections", &collection.id, "items"])?,
                    "items",
                    GEOJSON,
                )
                .with_title("Features"),
            ],
        })
    }
}

/// Extent in CRS84 when the native system can be transformed, else native.
fn extent_info(extent: &Extent, srid: i32) -> ExtentInfo {
    let transform = if srid != WGS84 && can_transform(srid, WGS84) {
        coord_transform(srid, WGS84).ok().flatten()
    } else {
        None
    };
    let (bbox, crs) = match transform {
        Some(f) => {
            let min = f(Coord {
                x: extent.minx,
                y: extent.miny,
            });
            let max = f(Coord {
                x: extent.maxx,
                y: extent.maxy,
            });
            ([min.x, min.y, max.x, max.y], Some(CRS84_URI.to_string()))
        }
        None => (
            [extent.minx, extent.miny, extent.maxx, extent.maxy],
            crs_uri(srid),
        ),
    };
    ExtentInfo {
        spatial: SpatialExtent {
            bbox: vec![bbox],
            crs,
        },
    }
}

pub(crate) async fn collections(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> std::result::Result<Json<CollectionList>, ApiError> {
    let base = base_url(&state.config.server, &headers);
    let collections = state
        .catalog
        .list()
        .await?
        .iter()
        .map(|collection| CollectionInfo::new(collection, &base))
        .collect::<Result<Vec<_>>>()?;
    Ok(Json(CollectionList {
        collections,
        links: vec![Link::new(href(&base, &["collections"])?, "self", JSON).with_title("This document")],
    }))
}

pub(crate) async fn collection(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
    headers: HeaderMap,
) -> std::result::Result<Json<CollectionInfo>, ApiError> {
    let base = base_url(&state.config.server, &headers);
    let collection = state.catalog.get(&collection_id).await?;
    Ok(Json(CollectionInfo::new(&collection, &base)?))
}

pub(crate) async fn items(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
    Query(params): Params,
    headers: HeaderMap,
) -> std::result::Result<Response, ApiError> {
    let collection = state.catalog.get(&collection_id).await?;
    let request = RequestDescriptor::items(&collection.id, &params, &state.request_defaults())?;
    let plan = plan_items(&collection, &request, state.config.output.default_crs)?;
    tracing::debug!(collection = %collection.id, sql = %plan.sql, params = plan.params.len(), "planned items query");

    let base = base_url(&state.config.server, &headers);
    let links = PageLinks::new(&base, &collection.id, &params, request.limit, request.offset)?;
    let conn = state.pool.acquire().await?;
    let output_srid = plan.output_srid;
    let body = stream_items(conn, plan, links).await?;
    Ok(geojson_response(body, output_srid))
}

pub(crate) async fn item(
    State(state): State<AppState>,
    Path((collection_id, item_id)): Path<(String, String)>,
    Query(params): Params,
    headers: HeaderMap,
) -> std::result::Result<Response, ApiError> {
    let collection = state.catalog.get(&collection_id).await?;
    let request =
        RequestDescriptor::item(&collection.id, &item_id, &params, &state.request_defaults())?;
    let plan = plan_item(&collection, &request, state.config.output.default_crs)?;

    let base = base_url(&state.config.server, &headers);
    let links = [
        Link::new(
            href(&base, &["collections", &collection.id, "items", &item_id])?,
            "self",
            GEOJSON,
        )
        .with_title("This document"),
        Link::new(href(&base, &["collections", &collection.id])?, "collection", JSON)
            .with_title("The collection"),
    ];

    let conn = state.pool.acquire().await?;
    let output_srid = plan.output_srid;
    let found = tokio::task::spawn_blocking(move || -> Result<Option<String>> {
        let mut stmt = conn.prepare(&plan.sql)?;
        let row = stmt
            .query_row(params_from_iter(plan.params.iter()), |row| {
                FeatureRow::from_row(row, &plan.columns)
            })
            .optional()?;
        row.map(|row| encode_feature(&plan.columns, &row, &links))
            .transpose()
    })
    .await??;

    match found {
        Some(body) => Ok(geojson_response(Body::from(body), output_srid)),
        None => Err(Error::NotFound(format!("item {item_id} in collection {}", collection.id)).into()),
    }
}

fn geojson_response(body: Body, output_srid: i32) -> Response {
    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(GEOJSON));
    let crs = crs_uri(output_srid).and_then(|uri| HeaderValue::from_str(&format!("<{uri}>")).ok());
    if let Some(value) = crs {
        headers.insert(CONTENT_CRS, value);
    }
    response
}

/// Run the items query on the blocking pool and stream its features.
///
/// Resolves once the first row has been fetched, so a failing statement is
/// still reported as an error response. Dropping the response body
/// interrupts the statement.
async fn stream_items(conn: PooledConnection, plan: QueryPlan, links: PageLinks) -> Result<Body> {
    let (tx, rx) = mpsc::channel::<Chunk>(CHANNEL_CHUNKS);
    let (start_tx, start_rx) = oneshot::channel::<Result<()>>();
    let (done_tx, done_rx) = oneshot::channel::<()>();

    let interrupt = conn.interrupt_handle();
    let finished = Arc::new(Mutex::new(false));

    let watch_tx = tx.clone();
    let watch_finished = Arc::clone(&finished);
    tokio::spawn(async move {
        tokio::select! {
            _ = watch_tx.closed() => {
                let finished = watch_finished.lock();
                if !*finished {
                    tracing::debug!("client went away, interrupting query");
                    interrupt.interrupt();
                }
            }
            _ = done_rx => {}
        }
    });

    tokio::task::spawn_blocking(move || {
        let mut sink = ChunkSink {
            tx,
            start: Some(start_tx),
        };
        if let Err(err) = write_items(&conn, &plan, &links, &mut sink) {
            sink.fail(err);
        }
        *finished.lock() = true;
        let _ = done_tx.send(());
        drop(conn);
    });

    match start_rx.await {
        Ok(Ok(())) => Ok(Body::from_stream(ReceiverStream::new(rx))),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(Error::Internal("query task ended before responding".to_string())),
    }
}

/// Sending half of a streamed response.
struct ChunkSink {
    tx: mpsc::Sender<Chunk>,
    start: Option<oneshot::Sender<Result<()>>>,
}

impl ChunkSink {
    fn started(&mut self) {
        if let Some(start) = self.start.take() {
            let _ = start.send(Ok(()));
        }
    }

    /// `false` once the client has gone away.
    fn send(&mut self, chunk: String) -> bool {
        self.started();
        self.tx.blocking_send(Ok(chunk)).is_ok()
    }

    fn fail(&mut self, err: Error) {
        match self.start.take() {
            Some(start) => {
                let _ = start.send(Err(err));
            }
            None => {
                tracing::warn!(%err, "feature stream aborted");
                let _ = self
                    .tx
                    .blocking_send(Err(std::io::Error::other(err.to_string())));
            }
        }
    }
}

fn write_items(
    conn: &PooledConnection,
    plan: &QueryPlan,
    links: &PageLinks,
    sink: &mut ChunkSink,
) -> Result<()> {
    let mut stmt = conn.prepare(&plan.sql)?;
    let mut rows = stmt.query(params_from_iter(plan.params.iter()))?;
    let mut writer = FeatureWriter::new(&plan.columns);
    let mut chunk = writer.header().to_string();

    let mut first = true;
    loop {
        let row = rows.next()?;
        if first {
            sink.started();
            first = false;
        }
        let Some(row) = row else { break };
        let row = FeatureRow::from_row(row, &plan.columns)?;
        writer.write_feature(&mut chunk, &row)?;
        if chunk.len() >= CHUNK_BYTES && !sink.send(std::mem::take(&mut chunk)) {
            return Ok(());
        }
    }

    chunk.push_str(&writer.footer(&links.links(writer.number_returned()))?);
    sink.send(chunk);
    Ok(())
}
