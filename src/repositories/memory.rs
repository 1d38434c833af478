//! In-memory store
//!
//! Reference implementation of the repository traits backed by `tokio`
//! RwLock-guarded maps. Provides the same atomic single-row update and
//! unique-constraint semantics a database backend must, which makes it the
//! substrate for the engine's test suite and the demo binary.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ConnectorStore, EventStore, IdentityStore, MetricStore, PolicyStore, QualityStore, RuleStore,
    StoreError, SyncJobStore, TemplateStore,
};
use crate::models::{
    Connector, ConnectorMetric, ConnectorTemplate, DataQualityCheck, EventStatus, IdentityMapping,
    IntegrationEvent, IntegrationPolicy, JobStatus, SyncJob, TransformationRule,
};

/// Shared in-memory backend implementing every store trait.
#[derive(Default)]
pub struct InMemoryStore {
    connectors: RwLock<HashMap<Uuid, Connector>>,
    jobs: RwLock<HashMap<Uuid, SyncJob>>,
    events: RwLock<HashMap<Uuid, IntegrationEvent>>,
    identities: RwLock<HashMap<Uuid, IdentityMapping>>,
    rules: RwLock<HashMap<Uuid, TransformationRule>>,
    quality: RwLock<Vec<DataQualityCheck>>,
    policies: RwLock<HashMap<Uuid, IntegrationPolicy>>,
    metrics: RwLock<Vec<ConnectorMetric>>,
    templates: RwLock<HashMap<Uuid, ConnectorTemplate>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectorStore for InMemoryStore {
    async fn insert(&self, connector: Connector) -> Result<Connector, StoreError> {
        let mut connectors = self.connectors.write().await;
        if connectors.values().any(|c| c.name == connector.name) {
            return Err(StoreError::Duplicate {
                entity: "connector",
                field: "name",
                value: connector.name,
            });
        }
        connectors.insert(connector.id, connector.clone());
        Ok(connector)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Connector>, StoreError> {
        Ok(self.connectors.read().await.get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Connector>, StoreError> {
        Ok(self
            .connectors
            .read()
            .await
            .values()
            .find(|c| c.name == name)
            .cloned())
    }

    async fn update(&self, connector: Connector) -> Result<Connector, StoreError> {
        let mut connectors = self.connectors.write().await;
        if !connectors.contains_key(&connector.id) {
            return Err(StoreError::NotFound {
                entity: "connector",
            });
        }
        connectors.insert(connector.id, connector.clone());
        Ok(connector)
    }

    async fn list(&self) -> Result<Vec<Connector>, StoreError> {
        let mut all: Vec<Connector> = self.connectors.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Connector>, StoreError> {
        let mut due: Vec<Connector> = self
            .connectors
            .read()
            .await
            .values()
            .filter(|c| c.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|c| c.next_sync.unwrap_or(c.created_at));
        Ok(due)
    }
}

#[async_trait]
impl SyncJobStore for InMemoryStore {
    async fn insert(&self, job: SyncJob) -> Result<SyncJob, StoreError> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<SyncJob>, StoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn update(&self, job: SyncJob) -> Result<SyncJob, StoreError> {
        let mut jobs = self.jobs.write().await;
        if !jobs.contains_key(&job.id) {
            return Err(StoreError::NotFound { entity: "sync_job" });
        }
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn list_by_connector(
        &self,
        connector_id: Uuid,
        status: Option<JobStatus>,
    ) -> Result<Vec<SyncJob>, StoreError> {
        let mut matching: Vec<SyncJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.connector_id == connector_id)
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        matching.sort_by_key(|j| j.created_at);
        Ok(matching)
    }

    async fn list_claimable(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SyncJob>, StoreError> {
        let mut claimable: Vec<SyncJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == JobStatus::Pending && j.scheduled_at <= now)
            .cloned()
            .collect();
        // Trigger priority first, then FIFO on scheduled time.
        claimable.sort_by(|a, b| {
            b.trigger
                .priority()
                .cmp(&a.trigger.priority())
                .then(a.scheduled_at.cmp(&b.scheduled_at))
                .then(a.created_at.cmp(&b.created_at))
        });
        claimable.truncate(limit);
        Ok(claimable)
    }

    async fn has_active(&self, connector_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.jobs.read().await.values().any(|j| {
            j.connector_id == connector_id
                && matches!(j.status, JobStatus::Pending | JobStatus::Running)
        }))
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn insert(&self, event: IntegrationEvent) -> Result<IntegrationEvent, StoreError> {
        self.events.write().await.insert(event.id, event.clone());
        Ok(event)
    }

    async fn get(&self, id: Uuid) -> Result<Option<IntegrationEvent>, StoreError> {
        Ok(self.events.read().await.get(&id).cloned())
    }

    async fn update(&self, event: IntegrationEvent) -> Result<IntegrationEvent, StoreError> {
        let mut events = self.events.write().await;
        if !events.contains_key(&event.id) {
            return Err(StoreError::NotFound {
                entity: "integration_event",
            });
        }
        events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<IntegrationEvent>, StoreError> {
        let mut due: Vec<IntegrationEvent> = self
            .events
            .read()
            .await
            .values()
            .filter(|e| e.status == EventStatus::Pending)
            .filter(|e| e.next_attempt_at.is_none_or(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|e| (e.occurred_at, e.created_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn find_completed_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Option<IntegrationEvent>, StoreError> {
        Ok(self
            .events
            .read()
            .await
            .values()
            .find(|e| e.correlation_id == correlation_id && e.status == EventStatus::Completed)
            .cloned())
    }

    async fn list_by_status(
        &self,
        status: EventStatus,
    ) -> Result<Vec<IntegrationEvent>, StoreError> {
        let mut matching: Vec<IntegrationEvent> = self
            .events
            .read()
            .await
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.created_at);
        Ok(matching)
    }
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn insert(&self, mapping: IdentityMapping) -> Result<IdentityMapping, StoreError> {
        let mut identities = self.identities.write().await;
        if identities
            .values()
            .any(|m| m.email_canonical == mapping.email_canonical)
        {
            return Err(StoreError::Duplicate {
                entity: "identity_mapping",
                field: "email_canonical",
                value: mapping.email_canonical,
            });
        }
        if identities.values().any(|m| m.nova_user_id == mapping.nova_user_id) {
            return Err(StoreError::Duplicate {
                entity: "identity_mapping",
                field: "nova_user_id",
                value: mapping.nova_user_id.to_string(),
            });
        }
        identities.insert(mapping.id, mapping.clone());
        Ok(mapping)
    }

    async fn get(&self, id: Uuid) -> Result<Option<IdentityMapping>, StoreError> {
        Ok(self.identities.read().await.get(&id).cloned())
    }

    async fn update(&self, mapping: IdentityMapping) -> Result<IdentityMapping, StoreError> {
        let mut identities = self.identities.write().await;
        if !identities.contains_key(&mapping.id) {
            return Err(StoreError::NotFound {
                entity: "identity_mapping",
            });
        }
        identities.insert(mapping.id, mapping.clone());
        Ok(mapping)
    }

    async fn get_by_canonical_email(
        &self,
        email_canonical: &str,
    ) -> Result<Option<IdentityMapping>, StoreError> {
        Ok(self
            .identities
            .read()
            .await
            .values()
            .find(|m| m.email_canonical == email_canonical)
            .cloned())
    }

    async fn find_by_external(
        &self,
        external_system: &str,
        external_id: &str,
    ) -> Result<Option<IdentityMapping>, StoreError> {
        Ok(self
            .identities
            .read()
            .await
            .values()
            .find(|m| {
                m.external_mappings
                    .get(external_system)
                    .is_some_and(|id| id == external_id)
            })
            .cloned())
    }
}

#[async_trait]
impl RuleStore for InMemoryStore {
    async fn insert(&self, rule: TransformationRule) -> Result<TransformationRule, StoreError> {
        let mut rules = self.rules.write().await;
        if rules.values().any(|r| {
            r.source_connector_id == rule.source_connector_id
                && r.source_field == rule.source_field
                && r.target_field == rule.target_field
        }) {
            return Err(StoreError::Duplicate {
                entity: "transformation_rule",
                field: "source_connector_id,source_field,target_field",
                value: format!(
                    "{}/{}/{}",
                    rule.source_connector_id, rule.source_field, rule.target_field
                ),
            });
        }
        rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn get(&self, id: Uuid) -> Result<Option<TransformationRule>, StoreError> {
        Ok(self.rules.read().await.get(&id).cloned())
    }

    async fn update(&self, rule: TransformationRule) -> Result<TransformationRule, StoreError> {
        let mut rules = self.rules.write().await;
        if !rules.contains_key(&rule.id) {
            return Err(StoreError::NotFound {
                entity: "transformation_rule",
            });
        }
        rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn list_for_source(
        &self,
        source_connector_id: Uuid,
        source_field: &str,
    ) -> Result<Vec<TransformationRule>, StoreError> {
        let mut matching: Vec<TransformationRule> = self
            .rules
            .read()
            .await
            .values()
            .filter(|r| {
                r.enabled
                    && r.source_connector_id == source_connector_id
                    && r.source_field == source_field
            })
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.id);
        Ok(matching)
    }

    async fn list_for_connector(
        &self,
        source_connector_id: Uuid,
    ) -> Result<Vec<TransformationRule>, StoreError> {
        let mut matching: Vec<TransformationRule> = self
            .rules
            .read()
            .await
            .values()
            .filter(|r| r.enabled && r.source_connector_id == source_connector_id)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.id);
        Ok(matching)
    }
}

#[async_trait]
impl QualityStore for InMemoryStore {
    async fn append(&self, check: DataQualityCheck) -> Result<DataQualityCheck, StoreError> {
        self.quality.write().await.push(check.clone());
        Ok(check)
    }

    async fn list_by_name(&self, name: &str) -> Result<Vec<DataQualityCheck>, StoreError> {
        Ok(self
            .quality
            .read()
            .await
            .iter()
            .filter(|c| c.name == name)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PolicyStore for InMemoryStore {
    async fn insert(&self, policy: IntegrationPolicy) -> Result<IntegrationPolicy, StoreError> {
        let mut policies = self.policies.write().await;
        if policies.values().any(|p| p.name == policy.name) {
            return Err(StoreError::Duplicate {
                entity: "integration_policy",
                field: "name",
                value: policy.name,
            });
        }
        policies.insert(policy.id, policy.clone());
        Ok(policy)
    }

    async fn update(&self, policy: IntegrationPolicy) -> Result<IntegrationPolicy, StoreError> {
        let mut policies = self.policies.write().await;
        if !policies.contains_key(&policy.id) {
            return Err(StoreError::NotFound {
                entity: "integration_policy",
            });
        }
        policies.insert(policy.id, policy.clone());
        Ok(policy)
    }

    async fn list_enabled(&self) -> Result<Vec<IntegrationPolicy>, StoreError> {
        let mut enabled: Vec<IntegrationPolicy> = self
            .policies
            .read()
            .await
            .values()
            .filter(|p| p.enabled)
            .cloned()
            .collect();
        enabled.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(enabled)
    }
}

#[async_trait]
impl MetricStore for InMemoryStore {
    async fn append(&self, metric: ConnectorMetric) -> Result<ConnectorMetric, StoreError> {
        self.metrics.write().await.push(metric.clone());
        Ok(metric)
    }

    async fn list_for_connector(
        &self,
        connector_id: Uuid,
    ) -> Result<Vec<ConnectorMetric>, StoreError> {
        Ok(self
            .metrics
            .read()
            .await
            .iter()
            .filter(|m| m.connector_id == connector_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TemplateStore for InMemoryStore {
    async fn insert(&self, template: ConnectorTemplate) -> Result<ConnectorTemplate, StoreError> {
        let mut templates = self.templates.write().await;
        if templates.values().any(|t| t.name == template.name) {
            return Err(StoreError::Duplicate {
                entity: "connector_template",
                field: "name",
                value: template.name,
            });
        }
        templates.insert(template.id, template.clone());
        Ok(template)
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<ConnectorTemplate>, StoreError> {
        Ok(self
            .templates
            .read()
            .await
            .values()
            .find(|t| t.name == name)
            .cloned())
    }

    async fn update(&self, template: ConnectorTemplate) -> Result<ConnectorTemplate, StoreError> {
        let mut templates = self.templates.write().await;
        if !templates.contains_key(&template.id) {
            return Err(StoreError::NotFound {
                entity: "connector_template",
            });
        }
        templates.insert(template.id, template.clone());
        Ok(template)
    }
}
