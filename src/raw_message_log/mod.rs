//! RawMessageLog - Durable record of inbound bus messages
//!
//! ## Responsibilities
//!
//! - Record every inbound payload before it is interpreted (outcome = pending)
//! - Move the record to ok/failed exactly once when processing completes
//! - Serve the stored payload to the reprocess operator
//!
//! Nothing else mutates a raw message.

mod types;

pub use types::*;

use crate::frame_store::{FrameStore, StoreError};
use std::sync::Arc;

/// Raw message log over the frame store
#[derive(Clone)]
pub struct RawMessageLog {
    store: Arc<dyn FrameStore>,
}

impl RawMessageLog {
    pub fn new(store: Arc<dyn FrameStore>) -> Self {
        Self { store }
    }

    /// Record a payload as received (pending)
    pub async fn record_received(
        &self,
        source: &str,
        payload: &[u8],
    ) -> Result<RawMessageId, StoreError> {
        let raw_id = self.store.persist_raw(source, payload).await?;
        tracing::debug!(raw_id = raw_id, source = %source, bytes = payload.len(), "Raw message recorded");
        Ok(raw_id)
    }

    pub async fn mark_ok(&self, raw_id: RawMessageId) -> Result<(), StoreError> {
        self.finish(raw_id, ParseOutcome::Ok).await
    }

    pub async fn mark_failed(&self, raw_id: RawMessageId, reason: &str) -> Result<(), StoreError> {
        self.finish(raw_id, ParseOutcome::Failed(reason.to_string())).await
    }

    async fn finish(&self, raw_id: RawMessageId, outcome: ParseOutcome) -> Result<(), StoreError> {
        let updated = self.store.update_raw_outcome(raw_id, &outcome).await?;
        if !updated {
            // Already terminal or unknown id; the first outcome wins
            tracing::warn!(
                raw_id = raw_id,
                outcome = outcome.as_str(),
                "Raw message outcome not updated (already finalized or missing)"
            );
        }
        Ok(())
    }

    pub async fn get(&self, raw_id: RawMessageId) -> Result<Option<RawMessage>, StoreError> {
        self.store.get_raw_by_id(raw_id).await
    }

    pub async fn list(&self, filter: &RawMessageFilter) -> Result<Vec<RawMessage>, StoreError> {
        self.store.list_raw(filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_store::InMemoryFrameStore;

    #[tokio::test]
    async fn test_outcome_updated_at_most_once() {
        let log = RawMessageLog::new(Arc::new(InMemoryFrameStore::new()));

        let id = log.record_received("frames", b"{}").await.unwrap();
        assert_eq!(log.get(id).await.unwrap().unwrap().outcome, ParseOutcome::Pending);

        log.mark_failed(id, "field `cam_id`: required field is missing").await.unwrap();
        log.mark_ok(id).await.unwrap();

        let raw = log.get(id).await.unwrap().unwrap();
        assert_eq!(
            raw.outcome,
            ParseOutcome::Failed("field `cam_id`: required field is missing".to_string())
        );
        assert!(raw.processed_at.is_some());
        assert_eq!(raw.payload, b"{}");
    }

    #[tokio::test]
    async fn test_list_by_outcome() {
        let log = RawMessageLog::new(Arc::new(InMemoryFrameStore::new()));
        let a = log.record_received("frames", b"a").await.unwrap();
        let b = log.record_received("frames", b"b").await.unwrap();
        let _c = log.record_received("frames", b"c").await.unwrap();
        log.mark_ok(a).await.unwrap();
        log.mark_failed(b, "bad").await.unwrap();

        let failed = log
            .list(&RawMessageFilter {
                outcome: Some(OutcomeStatus::Failed),
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, b);

        let all = log.list(&RawMessageFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(ParseOutcome::Failed("bad".into())).unwrap();
        assert_eq!(json, serde_json::json!({"status": "failed", "reason": "bad"}));
        assert_eq!(
            serde_json::to_value(ParseOutcome::Ok).unwrap(),
            serde_json::json!({"status": "ok"})
        );
        assert_eq!(ParseOutcome::from_parts("failed", None), ParseOutcome::Failed(String::new()));
    }
}
