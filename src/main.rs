//! # Nova Integrations Main Entry Point
//!
//! Wires the stores, engines, and background loops together and serves the
//! webhook ingress until shutdown.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use nova_integrations::adapters::{AdapterRegistry, StaticAdapter};
use nova_integrations::config::ConfigLoader;
use nova_integrations::identity::IdentityResolver;
use nova_integrations::metrics_collector::MetricsCollector;
use nova_integrations::models::ConnectorType;
use nova_integrations::orchestrator::SyncOrchestrator;
use nova_integrations::pipeline::EventPipeline;
use nova_integrations::policy::PolicyEngine;
use nova_integrations::quality::QualityChecker;
use nova_integrations::registry::ConnectorRegistry;
use nova_integrations::repositories::Stores;
use nova_integrations::server::{AppState, run_server};
use nova_integrations::telemetry;
use nova_integrations::transform::TransformationEngine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from layered env files and variables
    let config_loader = ConfigLoader::new();
    let config = config_loader.load()?;

    telemetry::init_tracing(&config)?;
    info!(profile = %config.profile, "loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        info!(config = %redacted_json, "effective configuration");
    }

    let stores = Stores::in_memory();
    let metrics = MetricsCollector::new(stores.metrics.clone());
    let registry = ConnectorRegistry::new(
        stores.connectors.clone(),
        stores.templates.clone(),
        metrics.clone(),
    );

    // Adapter wiring; vendor adapters register here as they land.
    let adapters = AdapterRegistry::new();
    adapters.register(ConnectorType::Custom, Arc::new(StaticAdapter::empty()));

    let pipeline = EventPipeline::new(
        stores.events.clone(),
        registry.clone(),
        adapters.clone(),
        TransformationEngine::new(stores.rules.clone()),
        QualityChecker::new(stores.quality.clone(), config.quality.clone()),
        PolicyEngine::new(stores.policies.clone()),
        metrics.clone(),
        config.pipeline.clone(),
        Vec::new(),
    );
    let identity = IdentityResolver::new(stores.identities.clone(), config.identity.clone());
    let orchestrator = SyncOrchestrator::new(
        registry.clone(),
        stores.jobs.clone(),
        adapters,
        pipeline.clone(),
        identity,
        metrics,
        config.scheduler.clone(),
        config.retry.clone(),
    );

    let shutdown = CancellationToken::new();
    let pipeline_task = {
        let pipeline = pipeline.clone();
        let token = shutdown.clone();
        tokio::spawn(async move { pipeline.run(token).await })
    };
    let orchestrator_task = {
        let orchestrator = orchestrator.clone();
        let token = shutdown.clone();
        tokio::spawn(async move { orchestrator.run(token).await })
    };

    let state = AppState {
        registry,
        pipeline,
        orchestrator,
    };
    let server = tokio::spawn({
        let config = config.clone();
        async move { run_server(&config, state).await }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    shutdown.cancel();
    let _ = tokio::join!(pipeline_task, orchestrator_task);
    server.abort();
    Ok(())
}
