//! Connector entity model
//!
//! A connector is a configured integration endpoint to one external system
//! (identity provider, device management, security platform, ...). The
//! registry owns creation and health; the orchestrator owns sync cadence.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Category of external system a connector integrates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorType {
    IdentityProvider,
    DeviceManagement,
    SecurityPlatform,
    HrSystem,
    Itsm,
    Collaboration,
    CloudPlatform,
    Directory,
    Custom,
}

impl ConnectorType {
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectorType::IdentityProvider => "identity_provider",
            ConnectorType::DeviceManagement => "device_management",
            ConnectorType::SecurityPlatform => "security_platform",
            ConnectorType::HrSystem => "hr_system",
            ConnectorType::Itsm => "itsm",
            ConnectorType::Collaboration => "collaboration",
            ConnectorType::CloudPlatform => "cloud_platform",
            ConnectorType::Directory => "directory",
            ConnectorType::Custom => "custom",
        }
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational status of a connector. Only operator or orchestrator actions
/// with a documented reason may change this; health checks never touch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorStatus {
    Active,
    Inactive,
    Error,
    Maintenance,
    Deprecated,
}

impl ConnectorStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectorStatus::Active => "active",
            ConnectorStatus::Inactive => "inactive",
            ConnectorStatus::Error => "error",
            ConnectorStatus::Maintenance => "maintenance",
            ConnectorStatus::Deprecated => "deprecated",
        }
    }
}

impl fmt::Display for ConnectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health as observed by health-check jobs, independent of status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How scheduled syncs pull data from the external system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    Full,
    Incremental,
    Delta,
}

impl SyncStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            SyncStrategy::Full => "full",
            SyncStrategy::Incremental => "incremental",
            SyncStrategy::Delta => "delta",
        }
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic-versioned connector configuration blob. The registry validates
/// the shape at registration time; components treat `settings` as opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Semantic version of the config schema (e.g. "1.2.0")
    pub version: String,
    /// Base endpoint of the external system, when applicable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Provider-specific settings, validated by the owning adapter
    #[serde(default)]
    pub settings: JsonValue,
}

/// Capability descriptor advertised by a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectorCapabilities {
    /// Supports incremental/delta pulls with a `since` watermark
    pub supports_incremental: bool,
    /// Can receive inbound webhooks for event-driven sync
    pub supports_webhooks: bool,
    /// Supports pushing changes back to the external system
    pub supports_push: bool,
}

/// A configured integration endpoint to an external system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    /// Stable identifier
    pub id: Uuid,
    /// Unique, human-chosen name
    pub name: String,
    /// Category of external system
    pub connector_type: ConnectorType,
    /// Vendor/product identifier (e.g. "okta", "intune")
    pub provider: String,
    /// Versioned configuration blob
    pub config: ConnectorConfig,
    /// Advertised capabilities
    pub capabilities: ConnectorCapabilities,
    /// Operational status
    pub status: ConnectorStatus,
    /// Last observed health
    pub health: HealthStatus,
    /// Whether scheduled syncs are enabled
    pub sync_enabled: bool,
    /// Seconds between scheduled syncs
    pub sync_interval_seconds: u64,
    /// Strategy applied to scheduled syncs
    pub sync_strategy: SyncStrategy,
    /// Completion time of the last successful sync
    pub last_sync: Option<DateTime<Utc>>,
    /// Next scheduled sync; only meaningful while `sync_enabled`
    pub next_sync: Option<DateTime<Utc>>,
    /// Timestamp of the last health probe, updated even on no-op transitions
    pub last_health_check: Option<DateTime<Utc>>,
    /// Per-minute request budget against the external system
    pub rate_limit_per_minute: u32,
    /// Per-hour request budget against the external system
    pub rate_limit_per_hour: u32,
    /// Reference to the key encrypting stored credentials, if any
    pub encryption_key_id: Option<String>,
    /// Client certificate reference, if the provider requires mTLS
    pub certificate_id: Option<String>,
    /// Owning tenant, when scoped
    pub tenant_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connector {
    /// True when the connector should be picked up by the scheduler at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.sync_enabled
            && self.status == ConnectorStatus::Active
            && self.next_sync.is_none_or(|next| next <= now)
    }
}
