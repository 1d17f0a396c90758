//! ReprocessOperator - Offline repair of logged raw messages
//!
//! ## Responsibilities
//!
//! - Load a raw message by id and parse its stored payload
//! - Apply an optional shallow field patch
//! - Re-validate and persist the result as a new frame
//!
//! Reprocessing never broadcasts and never modifies the raw message. Replaying the
//! same message twice stores two frames.

use crate::frame_schema::{self, ValidationError};
use crate::frame_store::{FrameId, FrameStore, StoreError};
use crate::raw_message_log::RawMessageId;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Reprocess errors
#[derive(Debug, thiserror::Error)]
pub enum ReprocessError {
    #[error("raw message {0} not found")]
    NotFound(RawMessageId),

    #[error("stored payload is not valid JSON: {0}")]
    MalformedRaw(String),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("persistence failed: {0}")]
    Store(#[from] StoreError),
}

/// Overwrite top-level keys of `doc` with those in `patch`
///
/// Nested values are replaced wholesale. Other spellings of a patched field are
/// removed, so `cameraId` replaces a stored `cam_id`. A non-object document is replaced
/// by the patch itself.
pub fn apply_field_patch(doc: Value, patch: &Map<String, Value>) -> Value {
    match doc {
        Value::Object(mut fields) => {
            for (key, value) in patch {
                for alias in frame_schema::field_aliases(key) {
                    fields.remove(*alias);
                }
                fields.insert(key.clone(), value.clone());
            }
            Value::Object(fields)
        }
        other if patch.is_empty() => other,
        _ => Value::Object(patch.clone()),
    }
}

/// Reprocess operator
pub struct ReprocessOperator {
    store: Arc<dyn FrameStore>,
}

impl ReprocessOperator {
    pub fn new(store: Arc<dyn FrameStore>) -> Self {
        Self { store }
    }

    /// Replay a raw message; returns the new frame's storage id
    pub async fn reprocess(
        &self,
        raw_id: RawMessageId,
        patch: Option<&Map<String, Value>>,
    ) -> Result<FrameId, ReprocessError> {
        let raw = self
            .store
            .get_raw_by_id(raw_id)
            .await?
            .ok_or(ReprocessError::NotFound(raw_id))?;

        let doc: Value = serde_json::from_slice(&raw.payload)
            .map_err(|e| ReprocessError::MalformedRaw(e.to_string()))?;

        let doc = match patch {
            Some(patch) => apply_field_patch(doc, patch),
            None => doc,
        };

        let frame = frame_schema::validate(&doc).map_err(|e| {
            tracing::warn!(raw_id = raw_id, error = %e, "Reprocess validation failed");
            e
        })?;

        let frame_id = self.store.persist_frame(&frame).await?;

        tracing::info!(
            raw_id = raw_id,
            id = frame_id,
            patched_fields = patch.map_or(0, |p| p.len()),
            camera_id = %frame.camera_id,
            "Raw message reprocessed"
        );

        Ok(frame_id)
    }
}
