//! ConnectorTemplate entity model
//!
//! Read-mostly starter configuration the registry uses when provisioning new
//! connectors of a given type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::connector::{ConnectorCapabilities, ConnectorType};

/// Reusable starter configuration for a connector type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorTemplate {
    pub id: Uuid,
    /// Unique template name
    pub name: String,
    pub connector_type: ConnectorType,
    pub provider: String,
    /// Settings seed copied into provisioned connectors
    pub config_template: JsonValue,
    /// Schema the provisioned settings must satisfy, when present
    pub validation_schema: Option<JsonValue>,
    pub capabilities: ConnectorCapabilities,
    pub documentation_url: Option<String>,
    /// Config schema version bounds this template supports
    pub min_version: Option<String>,
    pub max_version: Option<String>,
    /// Times this template provisioned a connector
    pub usage_count: u64,
    /// Operator rating in [0, 5], when rated
    pub rating: Option<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
