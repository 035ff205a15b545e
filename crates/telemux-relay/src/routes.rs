use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use telemux_core::config::HEALTH_PATH;

use crate::acceptor::ws_handler;
use crate::registry::ConnectionRegistry;
use crate::stats::{RelayStats, StatsSnapshot};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub stats: Arc<RelayStats>,
    /// Deadline used when closing a consumer's transport.
    pub write_timeout: Duration,
    /// Fires when the relay starts shutting down.
    pub shutdown: CancellationToken,
}

/// Body of `GET /healthz`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub consumers: usize,
    pub stats: StatsSnapshot,
}

/// `GET /healthz`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        consumers: state.registry.len().await,
        stats: state.stats.snapshot(),
    })
}

/// Build the HTTP router: the WebSocket endpoint at `ws_path` plus the
/// health endpoint.
pub fn build_router(state: AppState, ws_path: &str) -> Router {
    Router::new()
        .route(ws_path, get(ws_handler))
        .route(HEALTH_PATH, get(health))
        .with_state(state)
}
