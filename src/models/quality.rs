//! Data-quality check models
//!
//! `QualityCheckSpec` describes a named check to run; `DataQualityCheck` is
//! the append-only record of one execution.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Dimension of quality a check measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityCheckType {
    Completeness,
    Accuracy,
    Consistency,
    Validity,
    Uniqueness,
    Timeliness,
}

impl QualityCheckType {
    pub const fn as_str(self) -> &'static str {
        match self {
            QualityCheckType::Completeness => "completeness",
            QualityCheckType::Accuracy => "accuracy",
            QualityCheckType::Consistency => "consistency",
            QualityCheckType::Validity => "validity",
            QualityCheckType::Uniqueness => "uniqueness",
            QualityCheckType::Timeliness => "timeliness",
        }
    }
}

impl fmt::Display for QualityCheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a check execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    Warning,
}

impl CheckStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Passed => "passed",
            CheckStatus::Failed => "failed",
            CheckStatus::Warning => "warning",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How failures of a check affect the pipeline. Critical failures halt the
/// batch; low/medium are recorded but non-blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl CheckSeverity {
    pub const fn as_str(self) -> &'static str {
        match self {
            CheckSeverity::Low => "low",
            CheckSeverity::Medium => "medium",
            CheckSeverity::High => "high",
            CheckSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for CheckSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rule inside a check. Parameters depend on the check type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRule {
    /// Field the rule inspects
    pub field: String,
    /// Type-specific parameters (pattern, min/max, max_age_seconds, ...)
    #[serde(default)]
    pub params: JsonValue,
}

/// A named check to execute against a batch of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheckSpec {
    pub name: String,
    pub check_type: QualityCheckType,
    /// Data source label recorded on the result (connector name, table, ...)
    pub data_source: String,
    pub rules: Vec<QualityRule>,
    pub severity: CheckSeverity,
    pub enabled: bool,
}

/// A structured issue found while executing a check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    /// Field the issue concerns
    pub field: String,
    /// Short machine-readable code ("missing", "pattern_mismatch", ...)
    pub code: String,
    /// Records affected
    pub count: u64,
}

/// Append-only record of one check execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityCheck {
    pub id: Uuid,
    pub name: String,
    pub check_type: QualityCheckType,
    pub data_source: String,
    /// Field under test, when the check is field-scoped
    pub field: Option<String>,
    pub status: CheckStatus,
    /// Pass ratio in [0, 1]
    pub score: f64,
    pub records_checked: u64,
    pub records_passed: u64,
    pub records_failed: u64,
    pub issues: Vec<QualityIssue>,
    pub severity: CheckSeverity,
    pub executed_at: DateTime<Utc>,
}
