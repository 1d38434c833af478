//! Connector adapter seam
//!
//! Defines the interface every external-system adapter implements, plus an
//! in-memory registry keyed by connector type. Vendor protocol work (OAuth,
//! SDKs) lives behind this trait and outside this crate; the scriptable
//! [`StaticAdapter`] serves the binary and tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::models::{Connector, ConnectorType};

/// Adapter-level error classification. Network and rate-limit failures are
/// retryable; configuration and authorization failures are not.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("network error: {details}")]
    Network { details: String, retryable: bool },

    #[error("rate limited by provider (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("authorization failed: {details}")]
    Unauthorized { details: String },

    #[error("malformed provider response: {details}")]
    MalformedResponse { details: String },

    #[error("adapter configuration error: {details}")]
    Configuration { details: String },
}

impl AdapterError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::Network { retryable, .. } => *retryable,
            AdapterError::RateLimited { .. } => true,
            AdapterError::MalformedResponse { .. } => true,
            AdapterError::Unauthorized { .. } | AdapterError::Configuration { .. } => false,
        }
    }
}

/// One raw record pulled from an external system, before transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Stable identifier within the external system
    pub external_id: String,
    /// Record kind as the provider names it ("user", "device", ...)
    pub kind: String,
    pub payload: JsonValue,
    pub observed_at: DateTime<Utc>,
}

/// Acknowledgement of a pushed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushAck {
    pub external_id: String,
    pub accepted: bool,
}

/// Interface to one category of external system.
#[async_trait]
pub trait ConnectorAdapter: Send + Sync {
    /// Pull changes observed since the given watermark. `None` means a full
    /// extract.
    async fn fetch_changes(
        &self,
        connector: &Connector,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawRecord>, AdapterError>;

    /// Push one canonical change back to the external system.
    async fn push_change(
        &self,
        connector: &Connector,
        record: &RawRecord,
    ) -> Result<PushAck, AdapterError>;

    /// Lightweight liveness probe used by health-check jobs.
    async fn probe(&self, connector: &Connector) -> Result<(), AdapterError> {
        self.fetch_changes(connector, Some(Utc::now())).await?;
        Ok(())
    }
}

/// Error type for adapter registry lookups.
#[derive(Debug, Clone, Error)]
pub enum AdapterRegistryError {
    #[error("no adapter registered for connector type '{0}'")]
    NotRegistered(ConnectorType),
}

/// Registry of adapters keyed by connector type.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: Arc<RwLock<HashMap<ConnectorType, Arc<dyn ConnectorAdapter>>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connector_type: ConnectorType, adapter: Arc<dyn ConnectorAdapter>) {
        self.adapters
            .write()
            .expect("adapter registry poisoned")
            .insert(connector_type, adapter);
    }

    pub fn get(
        &self,
        connector_type: ConnectorType,
    ) -> Result<Arc<dyn ConnectorAdapter>, AdapterRegistryError> {
        self.adapters
            .read()
            .expect("adapter registry poisoned")
            .get(&connector_type)
            .cloned()
            .ok_or(AdapterRegistryError::NotRegistered(connector_type))
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<ConnectorType> = self
            .adapters
            .read()
            .expect("adapter registry poisoned")
            .keys()
            .copied()
            .collect();
        f.debug_struct("AdapterRegistry").field("types", &keys).finish()
    }
}

/// Scriptable adapter backed by a fixed record set. Used by the binary's
/// bootstrap wiring and by tests that need deterministic adapter behavior.
pub struct StaticAdapter {
    records: RwLock<Vec<RawRecord>>,
    /// Records accepted through `push_change`, in arrival order
    pushed: RwLock<Vec<RawRecord>>,
    /// When set, every call fails with a clone of this error
    failure: RwLock<Option<AdapterError>>,
}

impl StaticAdapter {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            pushed: RwLock::new(Vec::new()),
            failure: RwLock::new(None),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Make subsequent calls fail until cleared.
    pub fn set_failure(&self, error: Option<AdapterError>) {
        *self.failure.write().expect("static adapter poisoned") = error;
    }

    pub fn set_records(&self, records: Vec<RawRecord>) {
        *self.records.write().expect("static adapter poisoned") = records;
    }

    /// Everything accepted through `push_change` so far.
    pub fn pushed(&self) -> Vec<RawRecord> {
        self.pushed.read().expect("static adapter poisoned").clone()
    }
}

#[async_trait]
impl ConnectorAdapter for StaticAdapter {
    async fn fetch_changes(
        &self,
        _connector: &Connector,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawRecord>, AdapterError> {
        if let Some(err) = self.failure.read().expect("static adapter poisoned").clone() {
            return Err(err);
        }
        let records = self.records.read().expect("static adapter poisoned");
        Ok(records
            .iter()
            .filter(|record| since.is_none_or(|watermark| record.observed_at > watermark))
            .cloned()
            .collect())
    }

    async fn push_change(
        &self,
        _connector: &Connector,
        record: &RawRecord,
    ) -> Result<PushAck, AdapterError> {
        if let Some(err) = self.failure.read().expect("static adapter poisoned").clone() {
            return Err(err);
        }
        self.pushed
            .write()
            .expect("static adapter poisoned")
            .push(record.clone());
        Ok(PushAck {
            external_id: record.external_id.clone(),
            accepted: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str, observed_at: DateTime<Utc>) -> RawRecord {
        RawRecord {
            external_id: id.to_string(),
            kind: "user".to_string(),
            payload: serde_json::json!({"id": id}),
            observed_at,
        }
    }

    fn connector() -> Connector {
        use crate::models::{
            ConnectorCapabilities, ConnectorConfig, ConnectorStatus, HealthStatus, SyncStrategy,
        };
        let now = Utc::now();
        Connector {
            id: uuid::Uuid::new_v4(),
            name: "adapter-test".to_string(),
            connector_type: ConnectorType::IdentityProvider,
            provider: "okta".to_string(),
            config: ConnectorConfig {
                version: "1.0.0".to_string(),
                endpoint: None,
                settings: serde_json::json!({}),
            },
            capabilities: ConnectorCapabilities::default(),
            status: ConnectorStatus::Active,
            health: HealthStatus::Unknown,
            sync_enabled: true,
            sync_interval_seconds: 900,
            sync_strategy: SyncStrategy::Incremental,
            last_sync: None,
            next_sync: None,
            last_health_check: None,
            rate_limit_per_minute: 60,
            rate_limit_per_hour: 3600,
            encryption_key_id: None,
            certificate_id: None,
            tenant_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn static_adapter_filters_by_watermark() {
        let now = Utc::now();
        let adapter = StaticAdapter::new(vec![
            record("old", now - Duration::hours(2)),
            record("new", now),
        ]);

        let all = adapter.fetch_changes(&connector(), None).await.unwrap();
        assert_eq!(all.len(), 2);

        let recent = adapter
            .fetch_changes(&connector(), Some(now - Duration::hours(1)))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].external_id, "new");
    }

    #[tokio::test]
    async fn registry_rejects_unknown_type() {
        let registry = AdapterRegistry::new();
        assert!(registry.get(ConnectorType::Itsm).is_err());

        registry.register(ConnectorType::Itsm, Arc::new(StaticAdapter::empty()));
        assert!(registry.get(ConnectorType::Itsm).is_ok());
    }
}
