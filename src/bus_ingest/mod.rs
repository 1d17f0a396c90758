//! BusIngestWorker - Message bus ingestion
//!
//! ## Responsibilities
//!
//! - Consume the frame topic, one message at a time, in delivery order
//! - Record every payload in the raw message log before interpreting it
//! - Validate, enrich, persist and broadcast each frame
//! - Record the outcome (ok, or failed with the reason) on the raw message
//!
//! ## Lifecycle
//!
//! received → raw-logged → validated → enriched → persisted → broadcast → raw ok.
//! Any failing step ends in raw failed. There is no automatic retry; failed messages
//! are repaired through the reprocess operator.

mod subscriber;

pub use subscriber::*;

use crate::frame_schema::{self, Frame};
use crate::ingest_pipeline::{FramePipeline, IngestError};
use crate::raw_message_log::{RawMessageId, RawMessageLog};
use crate::realtime_hub::FrameOrigin;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Worker counters
#[derive(Debug, Default)]
pub struct BusIngestStats {
    received: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`BusIngestStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusIngestSnapshot {
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl BusIngestStats {
    pub fn snapshot(&self) -> BusIngestSnapshot {
        BusIngestSnapshot {
            received: self.received.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Sequential topic consumer
pub struct BusIngestWorker {
    raw_log: RawMessageLog,
    pipeline: FramePipeline,
    stats: Arc<BusIngestStats>,
}

impl BusIngestWorker {
    pub fn new(raw_log: RawMessageLog, pipeline: FramePipeline) -> Self {
        Self {
            raw_log,
            pipeline,
            stats: Arc::new(BusIngestStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<BusIngestStats> {
        Arc::clone(&self.stats)
    }

    /// Start the worker task
    pub fn spawn(self, subscription: BusSubscription) -> JoinHandle<()> {
        tokio::spawn(self.run(subscription))
    }

    /// Process messages until the subscription closes
    pub async fn run(self, mut subscription: BusSubscription) {
        tracing::info!(topic = %subscription.topic(), "Bus ingest worker started");

        while let Some(message) = subscription.recv().await {
            self.handle_message(message).await;
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            topic = %subscription.topic(),
            received = stats.received,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Bus ingest worker stopped"
        );
    }

    /// Process one message to completion
    pub async fn handle_message(&self, message: BusMessage) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let raw_id = match self
            .raw_log
            .record_received(&message.topic, &message.payload)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(
                    topic = %message.topic,
                    message_id = ?message.message_id,
                    error = %e,
                    "Failed to record raw message, processing without raw log entry"
                );
                None
            }
        };

        match self.ingest(&message).await {
            Ok(frame) => {
                tracing::debug!(
                    raw_id = ?raw_id,
                    frame_id = %frame.frame_id,
                    camera_id = %frame.camera_id,
                    "Bus message ingested"
                );
                if let Some(id) = raw_id {
                    self.finish(id, None).await;
                }
                self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(
                    raw_id = ?raw_id,
                    topic = %message.topic,
                    message_id = ?message.message_id,
                    error = %e,
                    "Bus message rejected"
                );
                if let Some(id) = raw_id {
                    self.finish(id, Some(e.to_string())).await;
                }
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn ingest(&self, message: &BusMessage) -> Result<Frame, IngestError> {
        let raw: serde_json::Value = serde_json::from_slice(&message.payload)
            .map_err(|e| IngestError::MalformedJson(e.to_string()))?;

        let mut frame = frame_schema::validate(&raw)?;
        let credential = frame_schema::embedded_credential(&raw);
        let camera_id = frame.camera_id.clone();

        self.pipeline
            .enrich(&mut frame, &camera_id, credential.as_deref())
            .await?;

        self.pipeline
            .commit(frame.clone(), FrameOrigin::Bus, Some(message.topic.clone()))
            .await?;

        Ok(frame)
    }

    async fn finish(&self, raw_id: RawMessageId, failure: Option<String>) {
        let result = match failure {
            None => self.raw_log.mark_ok(raw_id).await,
            Some(reason) => self.raw_log.mark_failed(raw_id, &reason).await,
        };
        if let Err(e) = result {
            tracing::error!(raw_id = raw_id, error = %e, "Failed to record raw message outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera_info_client::{
        CameraInfoProvider, EnrichmentError, StaticCameraInfoProvider,
    };
    use crate::frame_schema::CameraInfo;
    use crate::frame_store::{FrameQuery, FrameStore, InMemoryFrameStore};
    use crate::raw_message_log::{ParseOutcome, RawMessageFilter};
    use crate::realtime_hub::RealtimeHub;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct TimingOutProvider;

    #[async_trait]
    impl CameraInfoProvider for TimingOutProvider {
        async fn resolve(&self, _: &str, _: &str) -> Result<CameraInfo, EnrichmentError> {
            Err(EnrichmentError::Timeout(Duration::from_millis(100)))
        }
    }

    struct Harness {
        store: Arc<InMemoryFrameStore>,
        hub: Arc<RealtimeHub>,
        worker: BusIngestWorker,
    }

    fn harness(provider: Arc<dyn CameraInfoProvider>) -> Harness {
        let store = Arc::new(InMemoryFrameStore::new());
        let hub = Arc::new(RealtimeHub::new());
        let pipeline = FramePipeline::new(store.clone(), provider, hub.clone());
        let worker = BusIngestWorker::new(RawMessageLog::new(store.clone()), pipeline);
        Harness { store, hub, worker }
    }

    fn resolving_provider() -> Arc<dyn CameraInfoProvider> {
        Arc::new(StaticCameraInfoProvider::new().with_camera(
            "CAM1",
            CameraInfo {
                name: "North Gate".to_string(),
                category: "fixed".to_string(),
                location: "Bangkok".to_string(),
                institute: "Airport".to_string(),
            },
        ))
    }

    fn message(payload: Value) -> BusMessage {
        BusMessage {
            message_id: None,
            topic: "frames".to_string(),
            payload: serde_json::to_vec(&payload).unwrap(),
            received_at: Utc::now(),
        }
    }

    fn payload(frame_id: &str, lat: Value) -> Value {
        json!({
            "frameId": frame_id,
            "cameraId": "CAM1",
            "token": "device-token",
            "capturedAt": "2024-01-01T00:00:00Z",
            "objects": [
                {"objectId": "O1", "lat": lat, "lng": "100.50", "altitude": "50", "speed": "15"}
            ]
        })
    }

    async fn raw_outcomes(store: &InMemoryFrameStore) -> Vec<ParseOutcome> {
        let mut raws = store.list_raw(&RawMessageFilter::default()).await.unwrap();
        raws.reverse();
        raws.into_iter().map(|r| r.outcome).collect()
    }

    #[tokio::test]
    async fn test_valid_message_is_stored_and_broadcast_once() {
        let h = harness(resolving_provider());
        let (_id, mut rx) = h.hub.register().await;

        h.worker.handle_message(message(payload("1", json!("13.75")))).await;

        assert_eq!(raw_outcomes(&h.store).await, vec![ParseOutcome::Ok]);

        let frames = h.store.list_frames(&FrameQuery::default()).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].objects[0].lat, 13.75);
        assert_eq!(frames[0].camera_info.as_ref().unwrap().name, "North Gate");

        let event: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(event["meta"]["fram_id"], "1");
        assert_eq!(event["meta"]["camera_info"]["name"], "North Gate");
        assert_eq!(event["meta"]["origin"], "bus");
        assert!(rx.try_recv().is_err());

        assert_eq!(
            h.worker.stats().snapshot(),
            BusIngestSnapshot {
                received: 1,
                succeeded: 1,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_coordinate_marks_failed() {
        let h = harness(resolving_provider());
        let (_id, mut rx) = h.hub.register().await;

        h.worker.handle_message(message(payload("1", json!("north")))).await;

        let outcomes = raw_outcomes(&h.store).await;
        match &outcomes[0] {
            ParseOutcome::Failed(reason) => assert!(reason.contains("objects[0].lat"), "{}", reason),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(h.store.frame_count().await, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_enrichment_timeout_without_embedded_info_fails() {
        let h = harness(Arc::new(TimingOutProvider));
        h.worker.handle_message(message(payload("1", json!(13.75)))).await;

        match &raw_outcomes(&h.store).await[0] {
            ParseOutcome::Failed(reason) => assert!(reason.contains("timed out"), "{}", reason),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(h.store.frame_count().await, 0);
    }

    #[tokio::test]
    async fn test_enrichment_timeout_keeps_embedded_info() {
        let h = harness(Arc::new(TimingOutProvider));
        let mut body = payload("1", json!(13.75));
        body["camera_info"] = json!({"name": "Embedded", "category": "", "location": "", "institute": ""});

        h.worker.handle_message(message(body)).await;

        assert_eq!(raw_outcomes(&h.store).await, vec![ParseOutcome::Ok]);
        let frames = h.store.list_frames(&FrameQuery::default()).await.unwrap();
        assert_eq!(frames[0].camera_info.as_ref().unwrap().name, "Embedded");
    }

    #[tokio::test]
    async fn test_payload_without_credential_is_ingested() {
        let h = harness(Arc::new(StaticCameraInfoProvider::new()));
        let (_id, mut rx) = h.hub.register().await;

        h.worker
            .handle_message(message(json!({
                "frameId": "1",
                "cameraId": "CAM1",
                "capturedAt": "2024-01-01T00:00:00Z",
                "objects": [
                    {"objectId": "O1", "lat": "13.75", "lng": "100.50", "altitude": "50", "speed": "15"}
                ]
            })))
            .await;

        assert_eq!(raw_outcomes(&h.store).await, vec![ParseOutcome::Ok]);

        let frames = h.store.list_frames(&FrameQuery::default()).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].camera_info.is_none());
        let object = &frames[0].objects[0];
        assert_eq!(object.object_id, "O1");
        assert_eq!(object.lat, 13.75);
        assert_eq!(object.lng, 100.5);
        assert_eq!(object.altitude, 50.0);
        assert_eq!(object.speed_kt, 15.0);

        let event: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(event["meta"]["objects"].as_array().unwrap().len(), 1);
        assert_eq!(event["meta"]["objects"][0]["lat"], 13.75);
        assert_eq!(event["meta"]["objects"][0]["speed_kt"], 15.0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_json_is_recorded() {
        let h = harness(resolving_provider());
        h.worker
            .handle_message(BusMessage {
                message_id: Some("m-1".to_string()),
                topic: "frames".to_string(),
                payload: b"{not json".to_vec(),
                received_at: Utc::now(),
            })
            .await;

        let raws = h.store.list_raw(&RawMessageFilter::default()).await.unwrap();
        assert_eq!(raws.len(), 1);
        assert_eq!(raws[0].payload, b"{not json");
        assert!(matches!(&raws[0].outcome, ParseOutcome::Failed(r) if r.starts_with("malformed JSON")));
    }

    #[tokio::test]
    async fn test_worker_preserves_delivery_order() {
        let h = harness(resolving_provider());
        let store = h.store.clone();
        let (_id, mut rx) = h.hub.register().await;

        let (publisher, subscription) = bus_channel("frames", 16);
        let handle = h.worker.spawn(subscription);

        for i in 1..=5 {
            publisher
                .publish(serde_json::to_vec(&payload(&i.to_string(), json!(13.75))).unwrap(), None)
                .await
                .unwrap();
        }
        drop(publisher);
        handle.await.unwrap();

        let mut order = Vec::new();
        while let Ok(text) = rx.try_recv() {
            let event: Value = serde_json::from_str(&text).unwrap();
            order.push(event["meta"]["fram_id"].as_str().unwrap().to_string());
        }
        assert_eq!(order, vec!["1", "2", "3", "4", "5"]);
        assert_eq!(store.frame_count().await, 5);
    }
}
