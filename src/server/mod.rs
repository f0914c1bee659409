//! HTTP surface of the feature server.
//!
//! [`router`] wires the OGC API Features endpoints onto an [`AppState`];
//! [`serve`] binds it to the configured address.

mod error;
mod handlers;
mod links;

pub use error::ApiError;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pool::ConnectionPool;
use crate::request::RequestDefaults;
use axum::Router;
use axum::http::HeaderValue;
use axum::routing::get;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub(crate) const GEOJSON: &str = "application/geo+json";
pub(crate) const JSON: &str = "application/json";

/// Shared, read-only state of every request.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn Catalog>,
    pub pool: ConnectionPool,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(catalog: Arc<dyn Catalog>, pool: ConnectionPool, config: Config) -> Self {
        Self {
            catalog,
            pool,
            config: Arc::new(config),
        }
    }

    pub(crate) fn request_defaults(&self) -> RequestDefaults {
        RequestDefaults {
            limit_default: self.config.paging.limit_default,
            limit_max: self.config.paging.limit_max,
            precision: self.config.output.default_precision,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);
    Router::new()
        .route("/", get(handlers::landing))
        .route("/conformance", get(handlers::conformance))
        .route("/health", get(handlers::health))
        .route("/collections", get(handlers::collections))
        .route("/collections/{collection_id}", get(handlers::collection))
        .route("/collections/{collection_id}/items", get(handlers::items))
        .route(
            "/collections/{collection_id}/items/{item_id}",
            get(handlers::item),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.server.socket_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, collections = state.catalog.list().await?.len(), "serving features");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(%err, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
        })
        .await
        .map_err(Error::Io)
}

#[cfg(test)]
mod tests;
