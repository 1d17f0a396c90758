//! FrameStore - Persistence boundary
//!
//! ## Responsibilities
//!
//! - Persist validated frames (with their detected objects)
//! - Persist raw messages and their outcome
//! - Read back frames and raw messages
//!
//! Writes are visible to subsequent reads in the same process. Two implementations:
//! [`MySqlFrameStore`] (production) and [`InMemoryFrameStore`] (tests, `STORE_BACKEND=memory`).

mod memory;
mod repository;

pub use memory::InMemoryFrameStore;
pub use repository::MySqlFrameStore;

use crate::frame_schema::{CameraInfo, DetectedObject, Frame, ImageDimensions};
use crate::raw_message_log::{ParseOutcome, RawMessage, RawMessageFilter, RawMessageId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Stored frame identifier (frames.id)
pub type FrameId = u64;

/// Default page size for listings
pub const DEFAULT_LIST_LIMIT: u32 = 50;
/// Upper bound for listings
pub const MAX_LIST_LIMIT: u32 = 500;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Frame listing query
#[derive(Debug, Clone, Default)]
pub struct FrameQuery {
    pub camera_id: Option<String>,
    pub limit: Option<u32>,
}

impl FrameQuery {
    pub fn effective_limit(&self) -> u32 {
        clamp_limit(self.limit)
    }
}

pub(crate) fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

/// Stored frame as returned by listings (image bytes are not loaded)
#[derive(Debug, Clone, Serialize)]
pub struct StoredFrame {
    pub id: FrameId,
    pub frame_id: String,
    pub camera_id: String,
    pub camera_info: Option<CameraInfo>,
    pub captured_at: DateTime<Utc>,
    pub image_dimensions: Option<ImageDimensions>,
    pub objects: Vec<StoredObject>,
    pub has_image: bool,
    pub stored_at: DateTime<Utc>,
}

/// Detected object as stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredObject {
    pub object_id: String,
    #[serde(rename = "type")]
    pub object_type: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub altitude: f64,
    pub speed_kt: f64,
}

impl From<&DetectedObject> for StoredObject {
    fn from(obj: &DetectedObject) -> Self {
        Self {
            object_id: obj.object_id.clone(),
            object_type: obj.object_type.clone(),
            lat: obj.lat,
            lng: obj.lng,
            altitude: obj.altitude,
            speed_kt: obj.speed,
        }
    }
}

/// Persistence collaborator used by the ingest paths and the reprocess operator
#[async_trait]
pub trait FrameStore: Send + Sync {
    /// Persist a frame and its objects; duplicates are stored as new records
    async fn persist_frame(&self, frame: &Frame) -> Result<FrameId, StoreError>;

    /// Record a raw payload with outcome = pending
    async fn persist_raw(&self, source: &str, payload: &[u8]) -> Result<RawMessageId, StoreError>;

    /// Move a pending raw message to a terminal outcome
    ///
    /// Returns `false` when the message is missing or already terminal.
    async fn update_raw_outcome(
        &self,
        raw_id: RawMessageId,
        outcome: &ParseOutcome,
    ) -> Result<bool, StoreError>;

    async fn get_raw_by_id(&self, raw_id: RawMessageId) -> Result<Option<RawMessage>, StoreError>;

    /// Newest first
    async fn list_raw(&self, filter: &RawMessageFilter) -> Result<Vec<RawMessage>, StoreError>;

    /// Newest first
    async fn list_frames(&self, query: &FrameQuery) -> Result<Vec<StoredFrame>, StoreError>;

    /// Backend name for health output
    fn backend(&self) -> &'static str;
}
