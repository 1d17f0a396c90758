//! RealtimeHub - WebSocket viewer distribution
//!
//! ## Responsibilities
//!
//! - Viewer connection management (register/unregister)
//! - Frame event fan-out to every connected viewer
//!
//! Each viewer owns a bounded outbound queue. A full queue drops the frame for that
//! viewer only; a closed queue removes the viewer. A slow or dead viewer never blocks
//! the others or the ingest paths.

use crate::frame_schema::{CameraInfo, Frame, ImageDimensions};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Default outbound queue depth per viewer
pub const DEFAULT_VIEWER_QUEUE_CAPACITY: usize = 32;

/// Hub message types
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    /// A stored frame, as sent to viewers
    Frame(FrameEventMessage),
}

impl HubMessage {
    fn kind(&self) -> &'static str {
        match self {
            HubMessage::Frame(_) => "frame",
        }
    }
}

/// Where a frame entered the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameOrigin {
    Bus,
    Device,
}

/// Frame event
#[derive(Debug, Clone, Serialize)]
pub struct FrameEventMessage {
    pub meta: FrameMeta,
    /// Device frames only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_jpeg_base64: Option<String>,
}

/// Frame metadata in the device wire shape
#[derive(Debug, Clone, Serialize)]
pub struct FrameMeta {
    pub fram_id: String,
    pub cam_id: String,
    /// RFC 3339
    pub timestamp: String,
    pub image_info: Option<ImageDimensions>,
    pub camera_info: Option<CameraInfo>,
    pub objects: Vec<ObjectMeta>,
    pub origin: FrameOrigin,
    /// Bus topic or device source id
    pub source_id: Option<String>,
}

/// Detected object in the device wire shape
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectMeta {
    pub obj_id: String,
    #[serde(rename = "type")]
    pub object_type: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub alt: f64,
    pub speed_kt: f64,
}

impl FrameEventMessage {
    pub fn from_frame(frame: &Frame, origin: FrameOrigin, source_id: Option<String>) -> Self {
        let objects = frame
            .objects
            .iter()
            .map(|o| ObjectMeta {
                obj_id: o.object_id.clone(),
                object_type: o.object_type.clone(),
                lat: o.lat,
                lng: o.lng,
                alt: o.altitude,
                speed_kt: o.speed,
            })
            .collect();

        Self {
            meta: FrameMeta {
                fram_id: frame.frame_id.clone(),
                cam_id: frame.camera_id.clone(),
                timestamp: frame.captured_at.to_rfc3339(),
                image_info: frame.image_dimensions,
                camera_info: frame.camera_info.clone(),
                objects,
                origin,
                source_id,
            },
            image_jpeg_base64: frame.image.as_deref().map(|bytes| BASE64.encode(bytes)),
        }
    }
}

/// Result of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Viewer queue was full
    pub skipped: usize,
    /// Viewer had disconnected and was unregistered
    pub removed: usize,
}

/// Viewer connection
struct ViewerConnection {
    tx: mpsc::Sender<Arc<str>>,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    connections: RwLock<HashMap<Uuid, ViewerConnection>>,
    connection_count: AtomicU64,
    queue_capacity: usize,
}

impl RealtimeHub {
    /// Create new RealtimeHub
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_VIEWER_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new viewer
    pub async fn register(&self) -> (Uuid, mpsc::Receiver<Arc<str>>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, ViewerConnection { tx });
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %id, "Viewer connected");

        (id, rx)
    }

    /// Unregister a viewer; returns false if it was already gone
    pub async fn unregister(&self, id: &Uuid) -> bool {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Viewer disconnected");
            true
        } else {
            false
        }
    }

    /// Broadcast message to all viewers
    pub async fn broadcast(&self, message: &HubMessage) -> BroadcastReport {
        let json: Arc<str> = match serde_json::to_string(message) {
            Ok(j) => j.into(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        let mut closed = Vec::new();

        {
            let connections = self.connections.read().await;
            tracing::debug!(
                message_kind = message.kind(),
                client_count = connections.len(),
                "Broadcasting message to viewers"
            );

            for (id, conn) in connections.iter() {
                match conn.tx.try_send(Arc::clone(&json)) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(connection_id = %id, "Viewer queue full, frame skipped");
                        report.skipped += 1;
                    }
                    Err(TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }

        for id in closed {
            if self.unregister(&id).await {
                report.removed += 1;
            }
        }

        report
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_schema::DetectedObject;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    fn frame() -> Frame {
        Frame {
            frame_id: "1".to_string(),
            camera_id: "CAM1".to_string(),
            camera_info: None,
            captured_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            image_dimensions: Some(ImageDimensions {
                width: 640,
                height: 480,
            }),
            objects: vec![DetectedObject {
                object_id: "O1".to_string(),
                object_type: Some("drone".to_string()),
                lat: 13.75,
                lng: 100.5,
                altitude: 50.0,
                speed: 15.0,
            }],
            image: None,
        }
    }

    fn frame_message() -> HubMessage {
        HubMessage::Frame(FrameEventMessage::from_frame(
            &frame(),
            FrameOrigin::Bus,
            Some("frames".to_string()),
        ))
    }

    #[tokio::test]
    async fn test_every_viewer_receives_once() {
        let hub = RealtimeHub::new();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            receivers.push(hub.register().await.1);
        }

        let report = hub.broadcast(&frame_message()).await;
        assert_eq!(report.delivered, 3);

        for rx in receivers.iter_mut() {
            let text = rx.recv().await.unwrap();
            let json: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(json["kind"], "frame");
            assert_eq!(json["meta"]["cam_id"], "CAM1");
            assert_eq!(json["meta"]["objects"][0]["speed_kt"], 15.0);
            assert!(json.get("image_jpeg_base64").is_none());
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_dropped_viewer_is_removed() {
        let hub = RealtimeHub::new();
        let (_a, mut rx_a) = hub.register().await;
        let (_b, rx_b) = hub.register().await;
        let (_c, mut rx_c) = hub.register().await;
        drop(rx_b);

        let report = hub.broadcast(&frame_message()).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(report.removed, 1);
        assert_eq!(hub.connection_count(), 2);

        assert!(rx_a.recv().await.is_some());
        assert!(rx_c.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_full_queue_skips_frame() {
        let hub = RealtimeHub::with_queue_capacity(1);
        let (_slow, mut rx_slow) = hub.register().await;

        hub.broadcast(&frame_message()).await;
        let report = hub.broadcast(&frame_message()).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(hub.connection_count(), 1);

        assert!(rx_slow.recv().await.is_some());
        assert!(rx_slow.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = RealtimeHub::new();
        let (id, _rx) = hub.register().await;
        assert!(hub.unregister(&id).await);
        assert!(!hub.unregister(&id).await);
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unregister_during_broadcast() {
        const FRAMES: usize = 50;
        let hub = Arc::new(RealtimeHub::with_queue_capacity(FRAMES));
        let (_a, mut rx_a) = hub.register().await;
        let (b, _rx_b) = hub.register().await;
        let (_c, mut rx_c) = hub.register().await;

        let broadcaster = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                let mut delivered = 0;
                for _ in 0..FRAMES {
                    delivered += hub.broadcast(&frame_message()).await.delivered;
                    tokio::task::yield_now().await;
                }
                delivered
            })
        };
        let leaver = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                hub.unregister(&b).await
            })
        };

        assert!(leaver.await.unwrap());
        let delivered = broadcaster.await.unwrap();
        assert!(delivered >= 2 * FRAMES);
        assert_eq!(hub.connection_count(), 2);

        for rx in [&mut rx_a, &mut rx_c] {
            let mut received = 0;
            while rx.try_recv().is_ok() {
                received += 1;
            }
            assert_eq!(received, FRAMES);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_membership_changes() {
        let hub = Arc::new(RealtimeHub::new());
        let mut tasks = Vec::new();

        for i in 0..64 {
            let hub = Arc::clone(&hub);
            tasks.push(tokio::spawn(async move {
                let (id, rx) = hub.register().await;
                hub.broadcast(&frame_message()).await;
                if i % 2 == 0 {
                    assert!(hub.unregister(&id).await);
                    None
                } else {
                    Some(rx)
                }
            }));
        }

        let mut kept = Vec::new();
        for task in tasks {
            if let Some(rx) = task.await.unwrap() {
                kept.push(rx);
            }
        }

        assert_eq!(kept.len(), 32);
        assert_eq!(hub.connection_count(), 32);
        assert_eq!(hub.connections.read().await.len(), 32);

        let report = hub.broadcast(&frame_message()).await;
        assert_eq!(report.removed, 0);
        assert_eq!(report.delivered + report.skipped, 32);
    }

    #[test]
    fn test_device_frame_carries_image() {
        let mut f = frame();
        f.image = Some(vec![0xFF, 0xD8, 0xFF]);
        let event = FrameEventMessage::from_frame(&f, FrameOrigin::Device, Some("pi-1".into()));
        assert_eq!(event.image_jpeg_base64.as_deref(), Some("/9j/"));
        assert_eq!(event.meta.origin, FrameOrigin::Device);
    }
}
