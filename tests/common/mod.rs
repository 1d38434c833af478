#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use nova_integrations::adapters::{AdapterRegistry, RawRecord, StaticAdapter};
use nova_integrations::config::{
    IdentityConfig, PipelineConfig, QualityConfig, RetryConfig, SchedulerConfig,
};
use nova_integrations::identity::IdentityResolver;
use nova_integrations::metrics_collector::MetricsCollector;
use nova_integrations::models::{
    Connector, ConnectorCapabilities, ConnectorConfig, ConnectorType, SyncStrategy,
};
use nova_integrations::orchestrator::SyncOrchestrator;
use nova_integrations::pipeline::EventPipeline;
use nova_integrations::policy::PolicyEngine;
use nova_integrations::quality::QualityChecker;
use nova_integrations::registry::{ConnectorRegistry, NewConnector};
use nova_integrations::repositories::Stores;
use nova_integrations::transform::TransformationEngine;

pub struct TestStack {
    pub stores: Stores,
    pub registry: ConnectorRegistry,
    pub pipeline: EventPipeline,
    pub orchestrator: SyncOrchestrator,
    pub adapters: AdapterRegistry,
    pub adapter: Arc<StaticAdapter>,
}

/// Full engine stack over in-memory stores, with a scriptable adapter
/// registered for identity-provider connectors and deterministic timing
/// (no jitter, immediate retries).
pub fn stack() -> TestStack {
    let stores = Stores::in_memory();
    let metrics = MetricsCollector::new(stores.metrics.clone());
    let registry = ConnectorRegistry::new(
        stores.connectors.clone(),
        stores.templates.clone(),
        metrics.clone(),
    );

    let adapter = Arc::new(StaticAdapter::empty());
    let adapters = AdapterRegistry::new();
    adapters.register(ConnectorType::IdentityProvider, adapter.clone());

    let pipeline = EventPipeline::new(
        stores.events.clone(),
        registry.clone(),
        adapters.clone(),
        TransformationEngine::new(stores.rules.clone()),
        QualityChecker::new(stores.quality.clone(), QualityConfig::default()),
        PolicyEngine::new(stores.policies.clone()),
        metrics.clone(),
        PipelineConfig {
            backoff_base_seconds: 0,
            jitter_factor: 0.0,
            ..PipelineConfig::default()
        },
        Vec::new(),
    );
    let identity = IdentityResolver::new(stores.identities.clone(), IdentityConfig::default());
    let orchestrator = SyncOrchestrator::new(
        registry.clone(),
        stores.jobs.clone(),
        adapters.clone(),
        pipeline.clone(),
        identity,
        metrics,
        SchedulerConfig {
            jitter_pct_min: 0.0,
            jitter_pct_max: 0.0,
            ..SchedulerConfig::default()
        },
        RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::default()
        },
    );

    TestStack {
        stores,
        registry,
        pipeline,
        orchestrator,
        adapters,
        adapter,
    }
}

pub fn connector_request(name: &str, per_minute: u32, per_hour: u32) -> NewConnector {
    NewConnector {
        name: name.to_string(),
        connector_type: ConnectorType::IdentityProvider,
        provider: "okta".to_string(),
        config: ConnectorConfig {
            version: "1.0.0".to_string(),
            endpoint: Some("https://example.okta.com".to_string()),
            settings: json!({"org": "example"}),
        },
        capabilities: ConnectorCapabilities {
            supports_incremental: true,
            supports_webhooks: true,
            supports_push: false,
        },
        sync_enabled: true,
        sync_interval_seconds: 900,
        sync_strategy: SyncStrategy::Incremental,
        rate_limit_per_minute: per_minute,
        rate_limit_per_hour: per_hour,
        encryption_key_id: None,
        certificate_id: None,
        tenant_id: None,
    }
}

pub async fn register(stack: &TestStack, name: &str, per_minute: u32, per_hour: u32) -> Connector {
    stack
        .registry
        .register(connector_request(name, per_minute, per_hour))
        .await
        .expect("register connector")
}

pub fn user_record(external_id: &str, email: &str, observed_at: DateTime<Utc>) -> RawRecord {
    RawRecord {
        external_id: external_id.to_string(),
        kind: "user".to_string(),
        payload: json!({"id": external_id, "email": email}),
        observed_at,
    }
}
