//! In-memory FrameStore

use super::{clamp_limit, FrameId, FrameQuery, FrameStore, StoreError, StoredFrame, StoredObject};
use crate::frame_schema::Frame;
use crate::raw_message_log::{ParseOutcome, RawMessage, RawMessageFilter, RawMessageId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryTables {
    frames: BTreeMap<FrameId, (Frame, DateTime<Utc>)>,
    raw_messages: BTreeMap<RawMessageId, RawMessage>,
    next_frame_id: FrameId,
    next_raw_id: RawMessageId,
}

/// Process-local store; contents are lost on restart
#[derive(Default)]
pub struct InMemoryFrameStore {
    tables: RwLock<MemoryTables>,
}

impl InMemoryFrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full stored frame including image bytes
    pub async fn get_frame(&self, id: FrameId) -> Option<Frame> {
        let tables = self.tables.read().await;
        tables.frames.get(&id).map(|(frame, _)| frame.clone())
    }

    pub async fn frame_count(&self) -> usize {
        self.tables.read().await.frames.len()
    }
}

#[async_trait]
impl FrameStore for InMemoryFrameStore {
    async fn persist_frame(&self, frame: &Frame) -> Result<FrameId, StoreError> {
        let mut tables = self.tables.write().await;
        tables.next_frame_id += 1;
        let id = tables.next_frame_id;
        tables.frames.insert(id, (frame.clone(), Utc::now()));
        Ok(id)
    }

    async fn persist_raw(&self, source: &str, payload: &[u8]) -> Result<RawMessageId, StoreError> {
        let mut tables = self.tables.write().await;
        tables.next_raw_id += 1;
        let id = tables.next_raw_id;
        tables.raw_messages.insert(
            id,
            RawMessage {
                id,
                source: source.to_string(),
                payload: payload.to_vec(),
                received_at: Utc::now(),
                outcome: ParseOutcome::Pending,
                processed_at: None,
            },
        );
        Ok(id)
    }

    async fn update_raw_outcome(
        &self,
        raw_id: RawMessageId,
        outcome: &ParseOutcome,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.raw_messages.get_mut(&raw_id) {
            Some(raw) if !raw.outcome.is_terminal() && outcome.is_terminal() => {
                raw.outcome = outcome.clone();
                raw.processed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_raw_by_id(&self, raw_id: RawMessageId) -> Result<Option<RawMessage>, StoreError> {
        Ok(self.tables.read().await.raw_messages.get(&raw_id).cloned())
    }

    async fn list_raw(&self, filter: &RawMessageFilter) -> Result<Vec<RawMessage>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .raw_messages
            .values()
            .rev()
            .filter(|raw| filter.outcome.map_or(true, |status| status.matches(&raw.outcome)))
            .take(clamp_limit(filter.limit) as usize)
            .cloned()
            .collect())
    }

    async fn list_frames(&self, query: &FrameQuery) -> Result<Vec<StoredFrame>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .frames
            .iter()
            .rev()
            .filter(|(_, (frame, _))| {
                query
                    .camera_id
                    .as_deref()
                    .map_or(true, |camera_id| frame.camera_id == camera_id)
            })
            .take(query.effective_limit() as usize)
            .map(|(id, (frame, stored_at))| StoredFrame {
                id: *id,
                frame_id: frame.frame_id.clone(),
                camera_id: frame.camera_id.clone(),
                camera_info: frame.camera_info.clone(),
                captured_at: frame.captured_at,
                image_dimensions: frame.image_dimensions,
                objects: frame.objects.iter().map(StoredObject::from).collect(),
                has_image: frame.has_image(),
                stored_at: *stored_at,
            })
            .collect())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
