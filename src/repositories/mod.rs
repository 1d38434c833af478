//! # Repositories
//!
//! Storage seam for the engine. Each entity gets a trait with the filtered
//! list/count operations the components need; implementations must provide
//! atomic single-row updates and enforce the stated unique constraints. The
//! engine assumes nothing else about the persistence technology.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Connector, ConnectorMetric, ConnectorTemplate, DataQualityCheck, EventStatus, IdentityMapping,
    IntegrationEvent, IntegrationPolicy, JobStatus, SyncJob, TransformationRule,
};

pub use memory::InMemoryStore;

/// Errors surfaced by storage implementations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("unique constraint violated on {entity}.{field} = '{value}'")]
    Duplicate {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("referential integrity violated: {reason}")]
    ForeignKey { reason: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Connector persistence. Unique on `name`.
#[async_trait]
pub trait ConnectorStore: Send + Sync {
    async fn insert(&self, connector: Connector) -> Result<Connector, StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<Connector>, StoreError>;
    async fn get_by_name(&self, name: &str) -> Result<Option<Connector>, StoreError>;
    async fn update(&self, connector: Connector) -> Result<Connector, StoreError>;
    async fn list(&self) -> Result<Vec<Connector>, StoreError>;
    /// Connectors with `sync_enabled`, ACTIVE status, and `next_sync <= now`.
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Connector>, StoreError>;
}

/// SyncJob persistence. Rows are retained indefinitely for audit.
#[async_trait]
pub trait SyncJobStore: Send + Sync {
    async fn insert(&self, job: SyncJob) -> Result<SyncJob, StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<SyncJob>, StoreError>;
    async fn update(&self, job: SyncJob) -> Result<SyncJob, StoreError>;
    async fn list_by_connector(
        &self,
        connector_id: Uuid,
        status: Option<JobStatus>,
    ) -> Result<Vec<SyncJob>, StoreError>;
    /// PENDING jobs with `scheduled_at <= now`, ordered by trigger priority
    /// (descending) then scheduled time (FIFO).
    async fn list_claimable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SyncJob>, StoreError>;
    /// True when the connector has any PENDING or RUNNING job.
    async fn has_active(&self, connector_id: Uuid) -> Result<bool, StoreError>;
}

/// IntegrationEvent persistence.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert(&self, event: IntegrationEvent) -> Result<IntegrationEvent, StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<IntegrationEvent>, StoreError>;
    async fn update(&self, event: IntegrationEvent) -> Result<IntegrationEvent, StoreError>;
    /// PENDING events whose backoff window has elapsed, in arrival order.
    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IntegrationEvent>, StoreError>;
    /// A COMPLETED event sharing the correlation id, if one exists.
    async fn find_completed_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Option<IntegrationEvent>, StoreError>;
    async fn list_by_status(&self, status: EventStatus)
    -> Result<Vec<IntegrationEvent>, StoreError>;
}

/// IdentityMapping persistence. Unique on `email_canonical` and `nova_user_id`.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn insert(&self, mapping: IdentityMapping) -> Result<IdentityMapping, StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<IdentityMapping>, StoreError>;
    async fn update(&self, mapping: IdentityMapping) -> Result<IdentityMapping, StoreError>;
    async fn get_by_canonical_email(
        &self,
        email_canonical: &str,
    ) -> Result<Option<IdentityMapping>, StoreError>;
    /// Mapping holding the given (system, external id) pair, if any.
    async fn find_by_external(
        &self,
        external_system: &str,
        external_id: &str,
    ) -> Result<Option<IdentityMapping>, StoreError>;
}

/// TransformationRule persistence. Unique on
/// (source_connector_id, source_field, target_field).
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn insert(&self, rule: TransformationRule) -> Result<TransformationRule, StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<TransformationRule>, StoreError>;
    async fn update(&self, rule: TransformationRule) -> Result<TransformationRule, StoreError>;
    /// Enabled rules matching (source connector, source field).
    async fn list_for_source(
        &self,
        source_connector_id: Uuid,
        source_field: &str,
    ) -> Result<Vec<TransformationRule>, StoreError>;
    async fn list_for_connector(
        &self,
        source_connector_id: Uuid,
    ) -> Result<Vec<TransformationRule>, StoreError>;
}

/// Append-only data-quality check results.
#[async_trait]
pub trait QualityStore: Send + Sync {
    async fn append(&self, check: DataQualityCheck) -> Result<DataQualityCheck, StoreError>;
    async fn list_by_name(&self, name: &str) -> Result<Vec<DataQualityCheck>, StoreError>;
}

/// IntegrationPolicy persistence. Unique on `name`.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn insert(&self, policy: IntegrationPolicy) -> Result<IntegrationPolicy, StoreError>;
    async fn update(&self, policy: IntegrationPolicy) -> Result<IntegrationPolicy, StoreError>;
    async fn list_enabled(&self) -> Result<Vec<IntegrationPolicy>, StoreError>;
}

/// Append-only connector metric samples.
#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn append(&self, metric: ConnectorMetric) -> Result<ConnectorMetric, StoreError>;
    async fn list_for_connector(
        &self,
        connector_id: Uuid,
    ) -> Result<Vec<ConnectorMetric>, StoreError>;
}

/// ConnectorTemplate persistence. Unique on `name`.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn insert(&self, template: ConnectorTemplate) -> Result<ConnectorTemplate, StoreError>;
    async fn get_by_name(&self, name: &str) -> Result<Option<ConnectorTemplate>, StoreError>;
    async fn update(&self, template: ConnectorTemplate) -> Result<ConnectorTemplate, StoreError>;
}

/// Bundle of store handles threaded through the engine components.
#[derive(Clone)]
pub struct Stores {
    pub connectors: Arc<dyn ConnectorStore>,
    pub jobs: Arc<dyn SyncJobStore>,
    pub events: Arc<dyn EventStore>,
    pub identities: Arc<dyn IdentityStore>,
    pub rules: Arc<dyn RuleStore>,
    pub quality: Arc<dyn QualityStore>,
    pub policies: Arc<dyn PolicyStore>,
    pub metrics: Arc<dyn MetricStore>,
    pub templates: Arc<dyn TemplateStore>,
}

impl Stores {
    /// Wire every store to one shared in-memory backend.
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            connectors: store.clone(),
            jobs: store.clone(),
            events: store.clone(),
            identities: store.clone(),
            rules: store.clone(),
            quality: store.clone(),
            policies: store.clone(),
            metrics: store.clone(),
            templates: store,
        }
    }
}
