//! TransformationRule entity model
//!
//! Declarative field mapping from one connector's source field to a canonical
//! target field. Unique on (source_connector_id, source_field, target_field);
//! when several enabled rules target the same field the highest priority wins.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// How a rule derives the target value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformType {
    Direct,
    FormatConversion,
    Enrichment,
    Aggregation,
    Validation,
    Custom,
}

impl TransformType {
    pub const fn as_str(self) -> &'static str {
        match self {
            TransformType::Direct => "direct",
            TransformType::FormatConversion => "format_conversion",
            TransformType::Enrichment => "enrichment",
            TransformType::Aggregation => "aggregation",
            TransformType::Validation => "validation",
            TransformType::Custom => "custom",
        }
    }
}

impl fmt::Display for TransformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative checks applied to the transformed value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationRules {
    /// Reject null/absent values
    #[serde(default)]
    pub required: bool,
    /// Regex the string form must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

/// Declarative field-level mapping between a source and target schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationRule {
    /// Unique identifier
    pub id: Uuid,
    /// Connector whose records this rule applies to
    pub source_connector_id: Uuid,
    /// Field name in the source record
    pub source_field: String,
    /// Canonical field the value lands in
    pub target_field: String,
    /// How the target value is derived
    pub transform_type: TransformType,
    /// Type-specific configuration, validated by the transformation engine
    pub transform_config: JsonValue,
    /// Optional post-transform validation
    pub validation_rules: Option<ValidationRules>,
    /// Fallback when the transform fails non-fatally
    pub default_value: Option<JsonValue>,
    /// Disabled rules never match
    pub enabled: bool,
    /// Tie-break when multiple rules target the same field; higher wins
    pub priority: i32,
    /// Running count of successful applications
    pub success_count: u64,
    /// Running count of failed applications
    pub error_count: u64,
    /// Last successful application
    pub last_applied: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
