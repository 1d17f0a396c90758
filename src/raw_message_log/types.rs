//! Raw message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw message identifier (raw_messages.raw_id)
pub type RawMessageId = u64;

/// Processing outcome recorded against a raw message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ParseOutcome {
    Pending,
    Ok,
    Failed(String),
}

impl ParseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ok => "ok",
            Self::Failed(_) => "failed",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Rebuild from the stored status column and reason
    pub fn from_parts(status: &str, reason: Option<String>) -> Self {
        match status {
            "ok" => Self::Ok,
            "failed" => Self::Failed(reason.unwrap_or_default()),
            _ => Self::Pending,
        }
    }
}

/// Exactly what was received, plus its outcome
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub id: RawMessageId,
    /// Bus topic or device source
    pub source: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
    pub outcome: ParseOutcome,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Outcome filter for raw message listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Pending,
    Ok,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ok => "ok",
            Self::Failed => "failed",
        }
    }

    pub fn matches(&self, outcome: &ParseOutcome) -> bool {
        self.as_str() == outcome.as_str()
    }
}

/// Raw message listing query
#[derive(Debug, Clone, Default)]
pub struct RawMessageFilter {
    pub outcome: Option<OutcomeStatus>,
    pub limit: Option<u32>,
}
