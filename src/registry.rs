//! # Connector Registry
//!
//! Owns connector definitions: registration, template provisioning, health
//! bookkeeping, and the due-connector query the orchestrator schedules from.
//! Health updates never mutate operational status; status changes are a
//! separate, reasoned operation.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::metrics_collector::MetricsCollector;
use crate::models::{
    Connector, ConnectorCapabilities, ConnectorConfig, ConnectorStatus, ConnectorType,
    HealthStatus, SyncStrategy,
};
use crate::repositories::{ConnectorStore, StoreError, TemplateStore};

/// Registration request for a new connector.
#[derive(Debug, Clone, Deserialize)]
pub struct NewConnector {
    pub name: String,
    pub connector_type: ConnectorType,
    pub provider: String,
    pub config: ConnectorConfig,
    #[serde(default)]
    pub capabilities: ConnectorCapabilities,
    #[serde(default = "default_sync_enabled")]
    pub sync_enabled: bool,
    pub sync_interval_seconds: u64,
    pub sync_strategy: SyncStrategy,
    pub rate_limit_per_minute: u32,
    pub rate_limit_per_hour: u32,
    #[serde(default)]
    pub encryption_key_id: Option<String>,
    #[serde(default)]
    pub certificate_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
}

fn default_sync_enabled() -> bool {
    true
}

/// Registry of configured connectors.
#[derive(Clone)]
pub struct ConnectorRegistry {
    connectors: Arc<dyn ConnectorStore>,
    templates: Arc<dyn TemplateStore>,
    metrics: MetricsCollector,
}

impl ConnectorRegistry {
    pub fn new(
        connectors: Arc<dyn ConnectorStore>,
        templates: Arc<dyn TemplateStore>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            connectors,
            templates,
            metrics,
        }
    }

    /// Validate and persist a new connector. Names are unique; the initial
    /// health is UNKNOWN until the first probe runs.
    pub async fn register(&self, request: NewConnector) -> Result<Connector, EngineError> {
        validate_request(&request)?;

        let now = Utc::now();
        let connector = Connector {
            id: Uuid::new_v4(),
            name: request.name,
            connector_type: request.connector_type,
            provider: request.provider,
            config: request.config,
            capabilities: request.capabilities,
            status: ConnectorStatus::Active,
            health: HealthStatus::Unknown,
            sync_enabled: request.sync_enabled,
            sync_interval_seconds: request.sync_interval_seconds,
            sync_strategy: request.sync_strategy,
            last_sync: None,
            next_sync: request.sync_enabled.then_some(now),
            last_health_check: None,
            rate_limit_per_minute: request.rate_limit_per_minute,
            rate_limit_per_hour: request.rate_limit_per_hour,
            encryption_key_id: request.encryption_key_id,
            certificate_id: request.certificate_id,
            tenant_id: request.tenant_id,
            created_at: now,
            updated_at: now,
        };

        let connector = self.connectors.insert(connector).await.map_err(|err| {
            match err {
                StoreError::Duplicate { field, value, .. } => EngineError::Duplicate { field, value },
                other => EngineError::Store(other),
            }
        })?;

        info!(
            connector_id = %connector.id,
            name = %connector.name,
            connector_type = %connector.connector_type,
            "registered connector"
        );
        Ok(connector)
    }

    /// Provision a connector from a named template, overlaying the request's
    /// settings onto the template seed. Bumps the template's usage count.
    pub async fn provision_from_template(
        &self,
        template_name: &str,
        name: String,
        settings: JsonValue,
    ) -> Result<Connector, EngineError> {
        let mut template = self
            .templates
            .get_by_name(template_name)
            .await?
            .ok_or_else(|| EngineError::InvalidConfig {
                reason: format!("unknown connector template '{template_name}'"),
            })?;

        let mut seed = template.config_template.clone();
        merge_json(&mut seed, settings);

        let request = NewConnector {
            name,
            connector_type: template.connector_type,
            provider: template.provider.clone(),
            config: ConnectorConfig {
                version: template
                    .min_version
                    .clone()
                    .unwrap_or_else(|| "1.0.0".to_string()),
                endpoint: None,
                settings: seed,
            },
            capabilities: template.capabilities,
            sync_enabled: true,
            sync_interval_seconds: 900,
            sync_strategy: SyncStrategy::Incremental,
            rate_limit_per_minute: 60,
            rate_limit_per_hour: 3600,
            encryption_key_id: None,
            certificate_id: None,
            tenant_id: None,
        };
        let connector = self.register(request).await?;

        template.usage_count += 1;
        template.updated_at = Utc::now();
        self.templates.update(template).await?;

        Ok(connector)
    }

    pub async fn get(&self, id: Uuid) -> Result<Connector, EngineError> {
        self.connectors
            .get(id)
            .await?
            .ok_or(EngineError::ConnectorNotFound(id))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Connector, EngineError> {
        self.connectors
            .get_by_name(name)
            .await?
            .ok_or_else(|| EngineError::ConnectorNameNotFound(name.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<Connector>, EngineError> {
        Ok(self.connectors.list().await?)
    }

    /// Connectors due for a scheduled sync at `now`.
    pub async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Connector>, EngineError> {
        Ok(self.connectors.list_due(now).await?)
    }

    /// Record an observed health state. `last_health_check` is stamped even
    /// when the value is unchanged; the health-transition metric is emitted
    /// only on an actual change. Status is never touched here.
    pub async fn update_health(
        &self,
        id: Uuid,
        health: HealthStatus,
    ) -> Result<Connector, EngineError> {
        let mut connector = self.get(id).await?;
        let previous = connector.health;
        let now = Utc::now();
        connector.health = health;
        connector.last_health_check = Some(now);
        connector.updated_at = now;
        let connector = self.connectors.update(connector).await?;

        if previous != health {
            info!(
                connector_id = %id,
                from = %previous,
                to = %health,
                "connector health changed"
            );
            let mut dimensions = BTreeMap::new();
            dimensions.insert("health".to_string(), health.as_str().to_string());
            self.metrics
                .record_gauge(id, "connector_health", health_gauge(health), dimensions)
                .await?;
        }
        Ok(connector)
    }

    /// Explicit status change with a documented reason. Used by operators and
    /// by the orchestrator when a connector is persistently failing.
    pub async fn set_status(
        &self,
        id: Uuid,
        status: ConnectorStatus,
        reason: &str,
    ) -> Result<Connector, EngineError> {
        let mut connector = self.get(id).await?;
        if connector.status == status {
            return Ok(connector);
        }
        warn!(
            connector_id = %id,
            from = %connector.status,
            to = %status,
            reason,
            "connector status changed"
        );
        connector.status = status;
        connector.updated_at = Utc::now();
        Ok(self.connectors.update(connector).await?)
    }

    /// Stamp sync bookkeeping after a successful run and schedule the next.
    pub async fn record_sync_completed(
        &self,
        id: Uuid,
        completed_at: DateTime<Utc>,
        next_sync: DateTime<Utc>,
    ) -> Result<Connector, EngineError> {
        let mut connector = self.get(id).await?;
        connector.last_sync = Some(completed_at);
        connector.next_sync = connector.sync_enabled.then_some(next_sync);
        connector.updated_at = Utc::now();
        Ok(self.connectors.update(connector).await?)
    }

    /// Reschedule without marking a successful sync (failed or deferred runs).
    pub async fn reschedule(
        &self,
        id: Uuid,
        next_sync: DateTime<Utc>,
    ) -> Result<Connector, EngineError> {
        let mut connector = self.get(id).await?;
        connector.next_sync = connector.sync_enabled.then_some(next_sync);
        connector.updated_at = Utc::now();
        Ok(self.connectors.update(connector).await?)
    }
}

fn validate_request(request: &NewConnector) -> Result<(), EngineError> {
    if request.name.trim().is_empty() {
        return Err(EngineError::InvalidConfig {
            reason: "connector name must not be empty".to_string(),
        });
    }
    if request.provider.trim().is_empty() {
        return Err(EngineError::InvalidConfig {
            reason: "provider must not be empty".to_string(),
        });
    }
    if !is_semver(&request.config.version) {
        return Err(EngineError::InvalidConfig {
            reason: format!(
                "config version '{}' is not a semantic version",
                request.config.version
            ),
        });
    }
    if request.sync_interval_seconds == 0 {
        return Err(EngineError::InvalidConfig {
            reason: "sync interval must be positive".to_string(),
        });
    }
    if request.rate_limit_per_minute == 0 || request.rate_limit_per_hour == 0 {
        return Err(EngineError::InvalidConfig {
            reason: "rate limits must be positive".to_string(),
        });
    }
    // The hourly budget caps the minute budget; a minute budget larger than
    // the hour budget could never be honored.
    if request.rate_limit_per_minute > request.rate_limit_per_hour {
        return Err(EngineError::InvalidConfig {
            reason: format!(
                "rate_limit_per_minute ({}) exceeds rate_limit_per_hour ({})",
                request.rate_limit_per_minute, request.rate_limit_per_hour
            ),
        });
    }
    Ok(())
}

fn is_semver(version: &str) -> bool {
    let mut parts = version.split('.');
    let valid = |part: Option<&str>| {
        part.is_some_and(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
    };
    valid(parts.next()) && valid(parts.next()) && valid(parts.next()) && parts.next().is_none()
}

fn health_gauge(health: HealthStatus) -> f64 {
    match health {
        HealthStatus::Healthy => 1.0,
        HealthStatus::Degraded => 0.5,
        HealthStatus::Unhealthy => 0.0,
        HealthStatus::Unknown => -1.0,
    }
}

/// Shallow-merge `overlay` object keys onto `base`.
fn merge_json(base: &mut JsonValue, overlay: JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                base_map.insert(key, value);
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::Stores;

    fn registry(stores: &Stores) -> ConnectorRegistry {
        ConnectorRegistry::new(
            stores.connectors.clone(),
            stores.templates.clone(),
            MetricsCollector::new(stores.metrics.clone()),
        )
    }

    fn request(name: &str) -> NewConnector {
        NewConnector {
            name: name.to_string(),
            connector_type: ConnectorType::IdentityProvider,
            provider: "okta".to_string(),
            config: ConnectorConfig {
                version: "1.0.0".to_string(),
                endpoint: Some("https://example.okta.com".to_string()),
                settings: serde_json::json!({"org": "example"}),
            },
            capabilities: ConnectorCapabilities {
                supports_incremental: true,
                supports_webhooks: true,
                supports_push: false,
            },
            sync_enabled: true,
            sync_interval_seconds: 900,
            sync_strategy: SyncStrategy::Incremental,
            rate_limit_per_minute: 60,
            rate_limit_per_hour: 3600,
            encryption_key_id: None,
            certificate_id: None,
            tenant_id: None,
        }
    }

    #[tokio::test]
    async fn register_enforces_unique_names() {
        let stores = Stores::in_memory();
        let registry = registry(&stores);

        registry.register(request("okta-prod")).await.unwrap();
        let err = registry.register(request("okta-prod")).await.unwrap_err();
        assert!(matches!(err, EngineError::Duplicate { field: "name", .. }));
    }

    #[tokio::test]
    async fn register_rejects_inverted_rate_limits() {
        let stores = Stores::in_memory();
        let registry = registry(&stores);

        let mut bad = request("okta-prod");
        bad.rate_limit_per_minute = 5000;
        bad.rate_limit_per_hour = 100;
        let err = registry.register(bad).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn register_rejects_bad_config_version() {
        let stores = Stores::in_memory();
        let registry = registry(&stores);

        let mut bad = request("okta-prod");
        bad.config.version = "one".to_string();
        assert!(registry.register(bad).await.is_err());
    }

    #[tokio::test]
    async fn health_update_stamps_probe_time_without_touching_status() {
        let stores = Stores::in_memory();
        let registry = registry(&stores);
        let connector = registry.register(request("okta-prod")).await.unwrap();

        let updated = registry
            .update_health(connector.id, HealthStatus::Degraded)
            .await
            .unwrap();
        assert_eq!(updated.health, HealthStatus::Degraded);
        assert_eq!(updated.status, ConnectorStatus::Active);
        let first_probe = updated.last_health_check.unwrap();

        // Same value again: probe timestamp advances, no new metric sample.
        let again = registry
            .update_health(connector.id, HealthStatus::Degraded)
            .await
            .unwrap();
        assert!(again.last_health_check.unwrap() >= first_probe);

        let samples = stores
            .metrics
            .list_for_connector(connector.id)
            .await
            .unwrap();
        assert_eq!(samples.len(), 1);
    }

    #[tokio::test]
    async fn template_provisioning_overlays_settings_and_counts_usage() {
        use crate::models::ConnectorTemplate;

        let stores = Stores::in_memory();
        let registry = registry(&stores);
        let now = Utc::now();
        stores
            .templates
            .insert(ConnectorTemplate {
                id: Uuid::new_v4(),
                name: "okta-standard".to_string(),
                connector_type: ConnectorType::IdentityProvider,
                provider: "okta".to_string(),
                config_template: serde_json::json!({"org": "placeholder", "page_size": 200}),
                validation_schema: None,
                capabilities: ConnectorCapabilities::default(),
                documentation_url: None,
                min_version: Some("1.0.0".to_string()),
                max_version: None,
                usage_count: 0,
                rating: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let connector = registry
            .provision_from_template(
                "okta-standard",
                "okta-emea".to_string(),
                serde_json::json!({"org": "emea"}),
            )
            .await
            .unwrap();

        assert_eq!(connector.config.settings["org"], "emea");
        assert_eq!(connector.config.settings["page_size"], 200);
        let template = stores
            .templates
            .get_by_name("okta-standard")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(template.usage_count, 1);
    }

    #[tokio::test]
    async fn due_listing_skips_disabled_and_future_connectors() {
        let stores = Stores::in_memory();
        let registry = registry(&stores);

        let due = registry.register(request("due-now")).await.unwrap();
        let mut disabled = request("disabled");
        disabled.sync_enabled = false;
        registry.register(disabled).await.unwrap();

        let future = registry.register(request("future")).await.unwrap();
        registry
            .reschedule(future.id, Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();

        let listed = registry.list_due(Utc::now()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, due.id);
    }
}
