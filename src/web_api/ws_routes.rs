//! WebSocket endpoint
//!
//! `GET /ws?role=viewer` subscribes to live frames.
//! `GET /ws?role=pi&source_id=..&cam_id=..&token=..` opens a device streaming session.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::device_session::{DeviceConnectParams, DeviceSession};
use crate::error::{Error, Result};
use crate::state::AppState;

/// Peer role on `/ws`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WsRole {
    Viewer,
    Device,
}

impl WsRole {
    /// Missing role means viewer
    fn parse(value: Option<&str>) -> Result<Self> {
        match value.map(str::trim) {
            None | Some("") | Some("viewer") => Ok(Self::Viewer),
            Some("pi") | Some("device") => Ok(Self::Device),
            Some(other) => Err(Error::BadRequest(format!(
                "unknown role '{}', expected viewer or pi",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct WsQuery {
    role: Option<String>,
    #[serde(flatten)]
    device: DeviceConnectParams,
}

/// WebSocket upgrade handler
pub(super) async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse> {
    let role = WsRole::parse(query.role.as_deref())?;

    Ok(match role {
        WsRole::Viewer => ws.on_upgrade(move |socket| handle_viewer(socket, state)),
        WsRole::Device => {
            let params = query.device;
            ws.on_upgrade(move |socket| handle_device(socket, state, params))
        }
    })
}

/// Viewer connection: forward hub messages until either side closes
async fn handle_viewer(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let (conn_id, mut rx) = state.realtime.register().await;

    // Forward frames from the hub to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.to_string())).await.is_err() {
                break;
            }
        }
    });

    // Viewers only listen; inbound traffic is drained to detect close
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "Viewer WebSocket error");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.realtime.unregister(&conn_id).await;
}

/// Device connection: feed every message through the session in arrival order
async fn handle_device(mut socket: WebSocket, state: AppState, params: DeviceConnectParams) {
    tracing::info!(
        source_id = ?params.source_id,
        camera_id = ?params.camera_id,
        has_token = params.credential.is_some(),
        "Device connected"
    );

    let mut session = DeviceSession::new(params);

    while let Some(result) = socket.recv().await {
        let bytes = match result {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Err(e) => {
                tracing::warn!(
                    source_id = ?session.params().source_id,
                    error = %e,
                    "Device WebSocket error"
                );
                break;
            }
        };

        // Awaited inline: a frame being stored completes even if the socket closes
        session.process(&state.pipeline, bytes).await;
    }

    session.close();
}
