//! Bus subscription
//!
//! ## Delivery
//! - Push: Google Cloud Pub/Sub push envelope on `POST /api/bus/push`
//! - Direct: raw JSON body on `POST /api/bus/publish` (tests, internal tools)
//!
//! Both feed one bounded in-process queue consumed by the single ingest worker, so
//! messages are processed in the order they were enqueued.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Default queue depth between the HTTP edge and the worker
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Google Cloud Pub/Sub push wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubPushMessage {
    pub message: PubSubMessage,
    #[serde(default)]
    pub subscription: String,
}

/// Pub/Sub message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSubMessage {
    /// Base64-encoded payload
    pub data: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub publish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl PubSubMessage {
    /// Payload bytes
    ///
    /// Undecodable base64 is passed through as-is so the raw log still keeps what
    /// arrived; it will then fail as malformed JSON.
    pub fn decode_data(&self) -> Vec<u8> {
        match BASE64.decode(self.data.as_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(
                    message_id = ?self.message_id,
                    error = %e,
                    "Pub/Sub data is not valid base64, keeping raw bytes"
                );
                self.data.clone().into_bytes()
            }
        }
    }
}

/// One message taken off the topic
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub message_id: Option<String>,
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

/// The worker has stopped
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("bus ingest worker is not running")]
pub struct BusClosed;

/// Enqueue side, cloned into the HTTP layer
#[derive(Clone)]
pub struct BusPublisher {
    topic: String,
    tx: mpsc::Sender<BusMessage>,
}

impl BusPublisher {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Enqueue a payload; waits while the queue is full
    pub async fn publish(
        &self,
        payload: Vec<u8>,
        message_id: Option<String>,
    ) -> Result<(), BusClosed> {
        let message = BusMessage {
            message_id,
            topic: self.topic.clone(),
            payload,
            received_at: Utc::now(),
        };
        self.tx.send(message).await.map_err(|_| BusClosed)
    }

    pub async fn publish_push(&self, push: PubSubPushMessage) -> Result<(), BusClosed> {
        tracing::debug!(
            message_id = ?push.message.message_id,
            subscription = %push.subscription,
            "Received Pub/Sub push message"
        );
        let payload = push.message.decode_data();
        self.publish(payload, push.message.message_id).await
    }
}

/// Consume side, owned by the worker
pub struct BusSubscription {
    topic: String,
    rx: mpsc::Receiver<BusMessage>,
}

impl BusSubscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message; `None` once every publisher is dropped and the queue is drained
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

/// Create the topic queue
pub fn bus_channel(topic: impl Into<String>, capacity: usize) -> (BusPublisher, BusSubscription) {
    let topic = topic.into();
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        BusPublisher {
            topic: topic.clone(),
            tx,
        },
        BusSubscription { topic, rx },
    )
}
