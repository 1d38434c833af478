//! SyncJob entity model
//!
//! One execution attempt of data synchronization for a connector. Jobs are
//! created by the orchestrator (or the webhook ingress) and mutated only by
//! the orchestrator's execution loop; terminal rows are retained for audit.
//! A retry is a successor row with `attempt + 1`, never a rewound row.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::connector::SyncStrategy;

/// Kind of work a sync job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Full,
    Incremental,
    Delta,
    Validation,
    HealthCheck,
}

impl JobType {
    pub const fn as_str(self) -> &'static str {
        match self {
            JobType::Full => "full",
            JobType::Incremental => "incremental",
            JobType::Delta => "delta",
            JobType::Validation => "validation",
            JobType::HealthCheck => "health_check",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle: `Pending -> Running -> {Completed, Failed, Cancelled, Timeout}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl JobStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Timeout => "timeout",
        }
    }

    /// Terminal states accept no further automatic transitions.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Timeout
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a job to be enqueued. Determines queue priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Scheduled,
    Manual,
    Webhook,
    EventDriven,
    Dependency,
}

impl TriggerType {
    pub const fn as_str(self) -> &'static str {
        match self {
            TriggerType::Scheduled => "scheduled",
            TriggerType::Manual => "manual",
            TriggerType::Webhook => "webhook",
            TriggerType::EventDriven => "event_driven",
            TriggerType::Dependency => "dependency",
        }
    }

    /// Claim priority; higher runs first. Manual and webhook triggers preempt
    /// scheduled work.
    pub const fn priority(self) -> i16 {
        match self {
            TriggerType::Manual => 100,
            TriggerType::Webhook => 90,
            TriggerType::EventDriven => 60,
            TriggerType::Dependency => 50,
            TriggerType::Scheduled => 30,
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution attempt of data synchronization for a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJob {
    /// Unique identifier
    pub id: Uuid,
    /// Owning connector
    pub connector_id: Uuid,
    /// Kind of work performed
    pub job_type: JobType,
    /// Strategy snapshot taken at enqueue time
    pub strategy: SyncStrategy,
    /// Free-form execution options (batch sizes, filters, ...)
    pub options: Option<JsonValue>,
    /// Current lifecycle state
    pub status: JobStatus,
    /// What caused this job
    pub trigger: TriggerType,
    /// Operator or system identifier behind the trigger, when known
    pub triggered_by: Option<String>,
    /// Correlation id shared across retries of the same logical sync
    pub correlation_id: String,
    /// 1-based attempt counter across the retry chain
    pub attempt: u32,
    /// When the job becomes eligible to run
    pub scheduled_at: DateTime<Utc>,
    /// Stamped on the Pending -> Running transition
    pub started_at: Option<DateTime<Utc>>,
    /// Stamped on any terminal transition
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration of the run
    pub duration_ms: Option<i64>,
    /// Records pulled from the adapter
    pub records_processed: u64,
    /// Records that made it through the pipeline
    pub records_succeeded: u64,
    /// Records rejected by the pipeline or adapter
    pub records_failed: u64,
    /// Human-readable failure summary
    pub error_message: Option<String>,
    /// Structured failure payload for operators
    pub error_details: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncJob {
    /// Counter conservation holds on every terminal row.
    pub fn counters_consistent(&self) -> bool {
        self.records_processed == self.records_succeeded + self.records_failed
    }
}
