//! API Routes

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::bus_ingest::PubSubPushMessage;
use crate::error::{Error, Result};
use crate::frame_store::FrameQuery;
use crate::models::ApiResponse;
use crate::raw_message_log::{OutcomeStatus, ParseOutcome, RawMessage, RawMessageFilter, RawMessageId};
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(super::ingest_status))
        // Bus delivery
        .route("/api/bus/push", post(handle_pubsub_push))
        .route("/api/bus/publish", post(publish_direct))
        // Frames
        .route("/api/frames", get(list_frames))
        // Raw message log
        .route("/api/raw-messages", get(list_raw_messages))
        .route("/api/raw-messages/:id", get(get_raw_message))
        .route("/api/raw-messages/:id/reprocess", post(reprocess_raw_message))
        // WebSocket (viewers and devices)
        .route("/ws", get(super::ws_routes::websocket_handler))
        .with_state(state)
}

// ========================================
// Bus Handlers
// ========================================

/// POST /api/bus/push
///
/// Google Cloud Pub/Sub push endpoint. Acknowledged once enqueued; the processing
/// outcome is recorded on the raw message, never returned here.
async fn handle_pubsub_push(
    State(state): State<AppState>,
    Json(body): Json<PubSubPushMessage>,
) -> Result<StatusCode> {
    state.bus.publish_push(body).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/bus/publish
///
/// Direct enqueue of a raw JSON body (internal tools, tests)
async fn publish_direct(State(state): State<AppState>, body: Bytes) -> Result<impl IntoResponse> {
    let message_id = uuid::Uuid::new_v4().to_string();
    state
        .bus
        .publish(body.to_vec(), Some(message_id.clone()))
        .await?;

    tracing::debug!(message_id = %message_id, bytes = body.len(), "Direct publish enqueued");

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(json!({ "message_id": message_id }))),
    ))
}

// ========================================
// Frame Handlers
// ========================================

#[derive(Debug, Deserialize)]
struct FrameListQuery {
    camera_id: Option<String>,
    limit: Option<u32>,
}

async fn list_frames(
    State(state): State<AppState>,
    Query(query): Query<FrameListQuery>,
) -> Result<impl IntoResponse> {
    let frames = state
        .store
        .list_frames(&FrameQuery {
            camera_id: query.camera_id,
            limit: query.limit,
        })
        .await?;

    Ok(Json(ApiResponse::success(frames)))
}

// ========================================
// Raw Message Handlers
// ========================================

#[derive(Debug, Deserialize)]
struct RawListQuery {
    outcome: Option<String>,
    limit: Option<u32>,
}

/// Raw message as returned by the API
///
/// UTF-8 payloads are returned as text, anything else as base64.
#[derive(Debug, Serialize)]
struct RawMessageView {
    id: RawMessageId,
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_base64: Option<String>,
    received_at: DateTime<Utc>,
    outcome: ParseOutcome,
    processed_at: Option<DateTime<Utc>>,
}

impl From<RawMessage> for RawMessageView {
    fn from(raw: RawMessage) -> Self {
        let (payload, payload_base64) = match String::from_utf8(raw.payload) {
            Ok(text) => (Some(text), None),
            Err(e) => (None, Some(BASE64.encode(e.into_bytes()))),
        };
        Self {
            id: raw.id,
            source: raw.source,
            payload,
            payload_base64,
            received_at: raw.received_at,
            outcome: raw.outcome,
            processed_at: raw.processed_at,
        }
    }
}

fn parse_outcome_filter(value: Option<&str>) -> Result<Option<OutcomeStatus>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some("pending") => Ok(Some(OutcomeStatus::Pending)),
        Some("ok") => Ok(Some(OutcomeStatus::Ok)),
        Some("failed") => Ok(Some(OutcomeStatus::Failed)),
        Some(other) => Err(Error::BadRequest(format!(
            "unknown outcome '{}', expected pending, ok or failed",
            other
        ))),
    }
}

async fn list_raw_messages(
    State(state): State<AppState>,
    Query(query): Query<RawListQuery>,
) -> Result<impl IntoResponse> {
    let filter = RawMessageFilter {
        outcome: parse_outcome_filter(query.outcome.as_deref())?,
        limit: query.limit,
    };

    let messages: Vec<RawMessageView> = state
        .raw_log
        .list(&filter)
        .await?
        .into_iter()
        .map(RawMessageView::from)
        .collect();

    Ok(Json(ApiResponse::success(messages)))
}

async fn get_raw_message(
    State(state): State<AppState>,
    Path(id): Path<RawMessageId>,
) -> Result<impl IntoResponse> {
    match state.raw_log.get(id).await? {
        Some(raw) => Ok(Json(ApiResponse::success(RawMessageView::from(raw)))),
        None => Err(Error::NotFound(format!("raw message {}", id))),
    }
}

/// Request body for reprocess
#[derive(Debug, Default, Deserialize)]
struct ReprocessRequest {
    #[serde(default)]
    patch: Option<Map<String, Value>>,
}

/// POST /api/raw-messages/:id/reprocess
///
/// Body is optional: `{"patch": {...}}` overwrites top-level payload fields.
async fn reprocess_raw_message(
    State(state): State<AppState>,
    Path(id): Path<RawMessageId>,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let request: ReprocessRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ReprocessRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| Error::BadRequest(format!("invalid reprocess body: {}", e)))?
    };

    let frame_id = state.reprocess.reprocess(id, request.patch.as_ref()).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(json!({
            "raw_id": id,
            "frame_id": frame_id
        }))),
    ))
}
