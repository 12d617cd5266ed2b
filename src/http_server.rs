//! C12's HTTP surface: the one part of the dashboard the core exposes
//! directly, per §10.3. Grounded on the donor's `HttpServer`, but trimmed
//! to the two routes that survive here — `/metrics` and `/health` — since
//! the cluster/config-reload/detailed-stats endpoints have no counterpart
//! in this crate.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::cache::Cache;
use crate::metrics::Metrics;

#[derive(Clone)]
struct AppState {
    metrics: Arc<Metrics>,
    cache: Arc<Cache>,
}

pub struct HttpServer {
    bind_addr: SocketAddr,
    metrics: Arc<Metrics>,
    cache: Arc<Cache>,
}

impl HttpServer {
    pub fn new(bind_addr: SocketAddr, metrics: Arc<Metrics>, cache: Arc<Cache>) -> Self {
        Self { bind_addr, metrics, cache }
    }

    pub async fn run(self) -> crate::error::Result<()> {
        let state = AppState { metrics: self.metrics, cache: self.cache };
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .with_state(state)
            .layer(ServiceBuilder::new().layer(CorsLayer::permissive()));

        info!(bind_addr = %self.bind_addr, "HTTP status surface listening");
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    state.metrics.set_cache_size_bytes(state.cache.stats().size_bytes);
    match state.metrics.render() {
        Ok(text) => text.into_response(),
        Err(e) => {
            error!(error = %e, "failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to render metrics").into_response()
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}
