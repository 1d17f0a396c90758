//! DeviceSession - Device streaming protocol
//!
//! ## Responsibilities
//!
//! - Pair a JSON metadata message with the binary JPEG that follows it
//! - Enrich, persist and broadcast each completed frame
//!
//! ## Protocol
//!
//! The device connects with `source_id`, `cam_id` and `token` query parameters and then
//! alternates: metadata (JSON), image (JPEG bytes), metadata, image, ...
//!
//! Messages are told apart by their first byte: `{` or `"` is metadata, anything else
//! is an image. Deployed devices rely on this, so it is kept; a binary payload that
//! happens to start with one of those bytes would be misread as metadata.
//!
//! - A second metadata before an image replaces the first (last wins, logged)
//! - Invalid metadata is dropped and clears any pending metadata
//! - An image with nothing pending is discarded
//! - Closing the connection discards pending metadata

use crate::frame_schema::{self, Frame};
use crate::ingest_pipeline::{FramePipeline, IngestError};
use crate::realtime_hub::FrameOrigin;
use serde::{Deserialize, Serialize};

/// Connection parameters from the upgrade query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceConnectParams {
    #[serde(default, alias = "sourceId")]
    pub source_id: Option<String>,
    #[serde(default, rename = "cam_id", alias = "cameraId", alias = "camera_id")]
    pub camera_id: Option<String>,
    #[serde(default, rename = "token", alias = "credential")]
    pub credential: Option<String>,
}

impl DeviceConnectParams {
    /// Camera id and credential for the metadata lookup, when both were given
    fn lookup_identity(&self) -> Option<(&str, &str)> {
        let camera_id = self.camera_id.as_deref().filter(|s| !s.trim().is_empty())?;
        let credential = self.credential.as_deref().filter(|s| !s.trim().is_empty())?;
        Some((camera_id, credential))
    }
}

/// Sub-message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMessageKind {
    Metadata,
    Image,
    Empty,
}

pub fn classify_message(bytes: &[u8]) -> DeviceMessageKind {
    match bytes.first() {
        None => DeviceMessageKind::Empty,
        Some(b'{') | Some(b'"') => DeviceMessageKind::Metadata,
        Some(_) => DeviceMessageKind::Image,
    }
}

/// What one inbound message did to the session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    MetadataBuffered,
    MetadataReplaced { dropped_frame_id: String },
    MetadataRejected(String),
    ImageWithoutMetadata { bytes: usize },
    Ignored,
    /// Metadata and image paired; ready for enrichment
    FrameReady(Frame),
}

/// Per-connection counters, logged at close
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    pub frames_completed: u64,
    pub frames_failed: u64,
    pub images_discarded: u64,
    pub metadata_replaced: u64,
    pub metadata_rejected: u64,
}

/// One device connection
pub struct DeviceSession {
    params: DeviceConnectParams,
    pending: Option<Frame>,
    counters: SessionCounters,
}

impl DeviceSession {
    pub fn new(params: DeviceConnectParams) -> Self {
        Self {
            params,
            pending: None,
            counters: SessionCounters::default(),
        }
    }

    pub fn params(&self) -> &DeviceConnectParams {
        &self.params
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn source(&self) -> &str {
        self.params.source_id.as_deref().unwrap_or("-")
    }

    /// Advance the pairing state machine
    pub fn handle_message(&mut self, bytes: Vec<u8>) -> SessionEvent {
        match classify_message(&bytes) {
            DeviceMessageKind::Metadata => self.on_metadata(&bytes),
            DeviceMessageKind::Image => self.on_image(bytes),
            DeviceMessageKind::Empty => SessionEvent::Ignored,
        }
    }

    fn on_metadata(&mut self, bytes: &[u8]) -> SessionEvent {
        let parsed = serde_json::from_slice::<serde_json::Value>(bytes)
            .map_err(|e| format!("malformed JSON: {}", e))
            .and_then(|raw| frame_schema::validate(&raw).map_err(|e| e.to_string()));

        match parsed {
            Ok(frame) => match self.pending.replace(frame) {
                Some(previous) => {
                    self.counters.metadata_replaced += 1;
                    tracing::warn!(
                        source_id = %self.source(),
                        dropped_frame_id = %previous.frame_id,
                        "Metadata arrived before the previous frame's image, replacing"
                    );
                    SessionEvent::MetadataReplaced {
                        dropped_frame_id: previous.frame_id,
                    }
                }
                None => SessionEvent::MetadataBuffered,
            },
            Err(reason) => {
                self.pending = None;
                self.counters.metadata_rejected += 1;
                tracing::warn!(source_id = %self.source(), reason = %reason, "Invalid device metadata dropped");
                SessionEvent::MetadataRejected(reason)
            }
        }
    }

    fn on_image(&mut self, bytes: Vec<u8>) -> SessionEvent {
        match self.pending.take() {
            Some(mut frame) => {
                frame.image = Some(bytes);
                SessionEvent::FrameReady(frame)
            }
            None => {
                self.counters.images_discarded += 1;
                tracing::warn!(
                    source_id = %self.source(),
                    bytes = bytes.len(),
                    "Image received without metadata, discarded"
                );
                SessionEvent::ImageWithoutMetadata { bytes: bytes.len() }
            }
        }
    }

    /// Enrich, persist and broadcast a paired frame
    ///
    /// The connection's `cam_id`/`token` drive the lookup. Without both no lookup is made
    /// and the frame keeps its embedded camera info, if any.
    pub async fn complete(
        &mut self,
        pipeline: &FramePipeline,
        mut frame: Frame,
    ) -> Result<(), IngestError> {
        let result = async {
            let (lookup_id, credential) = match self.params.lookup_identity() {
                Some((camera_id, credential)) => (camera_id.to_string(), Some(credential)),
                None => (frame.camera_id.clone(), None),
            };
            pipeline.enrich(&mut frame, &lookup_id, credential).await?;
            pipeline
                .commit(frame, FrameOrigin::Device, self.params.source_id.clone())
                .await?;
            Ok::<(), IngestError>(())
        }
        .await;

        match &result {
            Ok(()) => self.counters.frames_completed += 1,
            Err(e) => {
                self.counters.frames_failed += 1;
                tracing::warn!(source_id = %self.source(), error = %e, "Device frame dropped");
            }
        }
        result
    }

    /// Handle one inbound message end to end
    pub async fn process(&mut self, pipeline: &FramePipeline, bytes: Vec<u8>) {
        if let SessionEvent::FrameReady(frame) = self.handle_message(bytes) {
            // Failures are logged and counted in complete()
            let _ = self.complete(pipeline, frame).await;
        }
    }

    /// End the session; pending metadata is discarded
    pub fn close(mut self) -> SessionCounters {
        if let Some(frame) = self.pending.take() {
            tracing::debug!(
                source_id = %self.source(),
                frame_id = %frame.frame_id,
                "Pending metadata discarded at close"
            );
        }
        tracing::info!(
            source_id = %self.source(),
            frames_completed = self.counters.frames_completed,
            frames_failed = self.counters.frames_failed,
            images_discarded = self.counters.images_discarded,
            metadata_replaced = self.counters.metadata_replaced,
            "Device session closed"
        );
        self.counters
    }
}
