//! IdentityMapping entity model
//!
//! Reconciliation record tying a canonical Nova user to the identities the
//! external systems report for them. Confidence grows with corroborating
//! sources; disagreement above the conflict threshold flips the row to
//! `Conflicted` with both candidates preserved for manual resolution.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mapping lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    Active,
    Inactive,
    Conflicted,
    PendingReview,
}

impl MappingStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            MappingStatus::Active => "active",
            MappingStatus::Inactive => "inactive",
            MappingStatus::Conflicted => "conflicted",
            MappingStatus::PendingReview => "pending_review",
        }
    }
}

impl fmt::Display for MappingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of a disputed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictCandidate {
    /// External system that reported the value
    pub external_system: String,
    /// The disputed value (external id or canonical email)
    pub value: String,
    /// When this candidate was observed
    pub observed_at: DateTime<Utc>,
}

/// Payload recorded when two sources disagree; never auto-resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// What is disputed: "external_id" or "email"
    pub field: String,
    /// The value the mapping currently holds
    pub existing: ConflictCandidate,
    /// The value the newer source reported
    pub incoming: ConflictCandidate,
    pub detected_at: DateTime<Utc>,
}

/// Canonical-user to external-identity reconciliation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityMapping {
    /// Unique identifier
    pub id: Uuid,
    /// Canonical Nova user this mapping belongs to
    pub nova_user_id: Uuid,
    /// Email exactly as first observed
    pub email_raw: String,
    /// Canonicalized email; unique across mappings
    pub email_canonical: String,
    /// external system name -> external id
    pub external_mappings: BTreeMap<String, String>,
    /// Corroboration confidence in [0, 1]
    pub confidence: f64,
    /// Mapping lifecycle state
    pub status: MappingStatus,
    /// Last time any source re-confirmed this mapping
    pub last_verified_at: Option<DateTime<Utc>>,
    /// How the last verification happened (e.g. "connector_sync")
    pub verification_method: Option<String>,
    /// Populated when the mapping is conflicted
    pub conflict_resolution: Option<ConflictResolution>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
