//! WebAPI - HTTP and WebSocket endpoints
//!
//! ## Responsibilities
//!
//! - Bus delivery endpoints (Pub/Sub push, direct publish)
//! - Frame and raw message inspection
//! - Reprocess entry point
//! - `/ws` for viewers and streaming devices

mod routes;
mod ws_routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::{HealthResponse, StatusResponse};
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.started_at.elapsed().as_secs(),
        viewers: state.realtime.connection_count(),
        store_backend: state.store.backend().to_string(),
    };

    Json(response)
}

/// Ingest status endpoint
pub async fn ingest_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        topic: state.bus.topic().to_string(),
        bus: state.bus_stats.snapshot(),
        viewers: state.realtime.connection_count(),
    })
}
