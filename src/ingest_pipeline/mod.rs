//! FramePipeline - Shared completion path for both ingress paths
//!
//! ## Responsibilities
//!
//! - Camera info enrichment with the embedded-value fallback
//! - Persist the assembled frame
//! - Broadcast it to viewers once persisted
//!
//! A frame that fails to persist is never broadcast.

use crate::camera_info_client::{resolve_camera_info, CameraInfoProvider, EnrichmentError};
use crate::frame_schema::{Frame, ValidationError};
use crate::frame_store::{FrameId, FrameStore, StoreError};
use crate::realtime_hub::{FrameEventMessage, FrameOrigin, HubMessage, RealtimeHub};
use std::sync::Arc;

/// Per-message ingest failure
///
/// The Display text is what gets recorded as the raw message failure reason.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("enrichment failed: {0}")]
    Enrichment(#[from] EnrichmentError),

    #[error("persistence failed: {0}")]
    Store(#[from] StoreError),
}

/// Frame completion pipeline
#[derive(Clone)]
pub struct FramePipeline {
    store: Arc<dyn FrameStore>,
    camera_info: Arc<dyn CameraInfoProvider>,
    hub: Arc<RealtimeHub>,
}

impl FramePipeline {
    pub fn new(
        store: Arc<dyn FrameStore>,
        camera_info: Arc<dyn CameraInfoProvider>,
        hub: Arc<RealtimeHub>,
    ) -> Self {
        Self {
            store,
            camera_info,
            hub,
        }
    }

    /// Resolve camera info for `lookup_camera_id` and set it on the frame
    ///
    /// Without a credential the frame keeps its embedded camera info, if any. A failed
    /// lookup falls back to the embedded value.
    pub async fn enrich(
        &self,
        frame: &mut Frame,
        lookup_camera_id: &str,
        credential: Option<&str>,
    ) -> Result<(), EnrichmentError> {
        let embedded = frame.camera_info.take();
        let info = resolve_camera_info(
            self.camera_info.as_ref(),
            lookup_camera_id,
            credential,
            embedded,
        )
        .await?;
        frame.camera_info = info;
        Ok(())
    }

    /// Persist and broadcast a completed frame
    pub async fn commit(
        &self,
        frame: Frame,
        origin: FrameOrigin,
        source_id: Option<String>,
    ) -> Result<FrameId, StoreError> {
        let id = self.store.persist_frame(&frame).await?;

        let event = FrameEventMessage::from_frame(&frame, origin, source_id);
        let report = self.hub.broadcast(&HubMessage::Frame(event)).await;

        tracing::info!(
            id = id,
            frame_id = %frame.frame_id,
            camera_id = %frame.camera_id,
            objects = frame.object_count(),
            viewers = report.delivered,
            "Frame stored and broadcast"
        );

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_info_client::StaticCameraInfoProvider;
    use crate::frame_schema::CameraInfo;
    use crate::frame_store::InMemoryFrameStore;
    use chrono::Utc;

    fn frame(embedded: Option<&str>) -> Frame {
        Frame {
            frame_id: "7".to_string(),
            camera_id: "CAM1".to_string(),
            camera_info: embedded.map(|name| CameraInfo {
                name: name.to_string(),
                ..Default::default()
            }),
            captured_at: Utc::now(),
            image_dimensions: None,
            objects: Vec::new(),
            image: None,
        }
    }

    #[tokio::test]
    async fn test_enrich_uses_lookup_camera_id() {
        let provider = StaticCameraInfoProvider::new().with_camera(
            "CONN-CAM",
            CameraInfo {
                name: "Resolved".to_string(),
                ..Default::default()
            },
        );
        let pipeline = FramePipeline::new(
            Arc::new(InMemoryFrameStore::new()),
            Arc::new(provider),
            Arc::new(RealtimeHub::new()),
        );

        let mut f = frame(Some("Embedded"));
        pipeline.enrich(&mut f, "CONN-CAM", Some("t")).await.unwrap();
        assert_eq!(f.camera_info.unwrap().name, "Resolved");

        let mut f = frame(None);
        let err = pipeline.enrich(&mut f, "OTHER", Some("t")).await.unwrap_err();
        assert!(matches!(err, EnrichmentError::UnknownCamera(_)));
        assert!(f.camera_info.is_none());
    }

    #[tokio::test]
    async fn test_enrich_without_credential_keeps_frame_as_is() {
        let provider = StaticCameraInfoProvider::new().with_camera(
            "CAM1",
            CameraInfo {
                name: "Resolved".to_string(),
                ..Default::default()
            },
        );
        let pipeline = FramePipeline::new(
            Arc::new(InMemoryFrameStore::new()),
            Arc::new(provider),
            Arc::new(RealtimeHub::new()),
        );

        let mut f = frame(None);
        pipeline.enrich(&mut f, "CAM1", None).await.unwrap();
        assert!(f.camera_info.is_none());

        let mut f = frame(Some("Embedded"));
        pipeline.enrich(&mut f, "CAM1", None).await.unwrap();
        assert_eq!(f.camera_info.unwrap().name, "Embedded");
    }

    #[tokio::test]
    async fn test_commit_persists_then_broadcasts() {
        let store = Arc::new(InMemoryFrameStore::new());
        let hub = Arc::new(RealtimeHub::new());
        let pipeline = FramePipeline::new(
            store.clone(),
            Arc::new(StaticCameraInfoProvider::new()),
            hub.clone(),
        );
        let (_id, mut rx) = hub.register().await;

        let id = pipeline
            .commit(frame(Some("Embedded")), FrameOrigin::Bus, Some("frames".into()))
            .await
            .unwrap();

        assert_eq!(store.get_frame(id).await.unwrap().frame_id, "7");
        let text = rx.recv().await.unwrap();
        assert!(text.contains("\"origin\":\"bus\""));
    }
}
