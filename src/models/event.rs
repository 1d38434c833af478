//! IntegrationEvent entity model
//!
//! A discrete unit of ingested change flowing through the event pipeline.
//! Created by webhook ingress or the sync orchestrator, mutated only by the
//! pipeline. Once `dead_letter_queue` is set the row is terminal pending
//! manual intervention.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Event lifecycle: `Pending -> Processing -> {Completed, Failed, Retry, DeadLetter}`
/// with `Retry -> Pending` re-entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retry,
    DeadLetter,
}

impl EventStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
            EventStatus::Retry => "retry",
            EventStatus::DeadLetter => "dead_letter",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            EventStatus::Completed | EventStatus::Failed | EventStatus::DeadLetter
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discrete change record flowing through the event pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationEvent {
    /// Unique identifier
    pub id: Uuid,
    /// Event kind (e.g. "user.updated", "device.enrolled")
    pub event_type: String,
    /// Coarse grouping used by policies and metrics
    pub category: Option<String>,
    /// Origin system or ingress path
    pub source: String,
    /// Owning connector, when the event came through one
    pub connector_id: Option<Uuid>,
    /// Raw change payload
    pub payload: JsonValue,
    /// Transport metadata (headers, delivery ids, ...)
    pub metadata: Option<JsonValue>,
    /// Idempotency and per-entity ordering key
    pub correlation_id: String,
    /// Current lifecycle state
    pub status: EventStatus,
    /// Failed processing attempts so far
    pub retry_count: u32,
    /// Retry ceiling; reaching it on a fresh failure dead-letters the event
    pub max_retries: u32,
    /// Human-readable failure summary
    pub error_message: Option<String>,
    /// Structured failure payload for operators
    pub error_details: Option<JsonValue>,
    /// Set when the event exhausted retries or was quarantined
    pub dead_letter_queue: bool,
    /// Earliest time the next attempt may run (backoff)
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// When the change happened at the source
    pub occurred_at: DateTime<Utc>,
    /// Events past this instant are dropped without consuming a retry
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntegrationEvent {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

/// Ingress-side description of an event before it gets a row.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEvent {
    pub event_type: String,
    #[serde(default)]
    pub category: Option<String>,
    pub source: String,
    #[serde(default)]
    pub connector_id: Option<Uuid>,
    pub payload: JsonValue,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
    /// Caller-supplied idempotency key; generated when absent
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}
