//! # Event Pipeline
//!
//! Ingests, processes, retries, and dead-letters integration events. Each
//! event runs through transformation, quality checks, and policy evaluation,
//! short-circuiting on the first hard failure. Processing is parallel across
//! events but serialized per correlation id, and idempotent: a correlation id
//! already completed is never reprocessed.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{AdapterRegistry, RawRecord};
use crate::config::PipelineConfig;
use crate::error::EngineError;
use crate::metrics_collector::MetricsCollector;
use crate::models::{EventStatus, IntegrationEvent, NewEvent, PolicyDecision, QualityCheckSpec};
use crate::policy::{ActionContext, PolicyEngine};
use crate::quality::QualityChecker;
use crate::registry::ConnectorRegistry;
use crate::repositories::EventStore;
use crate::telemetry::{TraceContext, with_trace_context};
use crate::transform::TransformationEngine;

/// Per-tick processing statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub failed: usize,
    pub deduplicated: usize,
}

/// The event-processing pipeline.
#[derive(Clone)]
pub struct EventPipeline {
    events: Arc<dyn EventStore>,
    registry: ConnectorRegistry,
    adapters: AdapterRegistry,
    transform: TransformationEngine,
    quality: QualityChecker,
    policy: PolicyEngine,
    metrics: MetricsCollector,
    config: PipelineConfig,
    /// Quality gates applied to every processed event
    quality_checks: Arc<Vec<QualityCheckSpec>>,
    /// Correlation ids currently being processed
    in_flight: Arc<Mutex<HashSet<String>>>,
    concurrency: Arc<Semaphore>,
}

impl EventPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        events: Arc<dyn EventStore>,
        registry: ConnectorRegistry,
        adapters: AdapterRegistry,
        transform: TransformationEngine,
        quality: QualityChecker,
        policy: PolicyEngine,
        metrics: MetricsCollector,
        config: PipelineConfig,
        quality_checks: Vec<QualityCheckSpec>,
    ) -> Self {
        let concurrency = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            events,
            registry,
            adapters,
            transform,
            quality,
            policy,
            metrics,
            config,
            quality_checks: Arc::new(quality_checks),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            concurrency,
        }
    }

    /// Persist an ingress payload as a PENDING event.
    pub async fn ingest(&self, new_event: NewEvent) -> Result<IntegrationEvent, EngineError> {
        let now = Utc::now();
        let event = IntegrationEvent {
            id: Uuid::new_v4(),
            event_type: new_event.event_type,
            category: new_event.category,
            source: new_event.source,
            connector_id: new_event.connector_id,
            payload: new_event.payload,
            metadata: new_event.metadata,
            correlation_id: new_event
                .correlation_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            status: EventStatus::Pending,
            retry_count: 0,
            max_retries: new_event
                .max_retries
                .unwrap_or(self.config.default_max_retries),
            error_message: None,
            error_details: None,
            dead_letter_queue: false,
            next_attempt_at: None,
            occurred_at: new_event.occurred_at.unwrap_or(now),
            expires_at: new_event.expires_at,
            created_at: now,
            updated_at: now,
        };
        debug!(
            event_id = %event.id,
            correlation_id = %event.correlation_id,
            event_type = %event.event_type,
            "ingested event"
        );
        Ok(self.events.insert(event).await?)
    }

    /// Process one event through transform, quality, policy, and write-back
    /// stages. Returns the event row as it stands after the attempt; for an
    /// already completed correlation id, returns the prior completed row.
    #[instrument(skip_all, fields(event_id = %event_id))]
    pub async fn process(&self, event_id: Uuid) -> Result<IntegrationEvent, EngineError> {
        let mut event = self
            .events
            .get(event_id)
            .await?
            .ok_or(EngineError::EventNotFound(event_id))?;

        if event.status.is_terminal() {
            return Ok(event);
        }

        let now = Utc::now();

        // Idempotency: a completed sibling with the same correlation id means
        // this event's side effects already happened.
        if let Some(prior) = self
            .events
            .find_completed_by_correlation(&event.correlation_id)
            .await?
            .filter(|prior| prior.id != event.id)
        {
            debug!(
                event_id = %event.id,
                correlation_id = %event.correlation_id,
                prior_id = %prior.id,
                "correlation already completed, skipping"
            );
            event.status = EventStatus::Completed;
            event.updated_at = now;
            self.events.update(event).await?;
            return Ok(prior);
        }

        // Expired events are dropped without consuming a retry.
        if event.is_expired(now) {
            event.status = EventStatus::Failed;
            event.error_message = Some("expired".to_string());
            event.updated_at = now;
            self.emit(&event, "events_expired_total").await;
            return Ok(self.events.update(event).await?);
        }

        event.status = EventStatus::Processing;
        event.updated_at = now;
        let mut event = self.events.update(event).await?;

        match self.run_stages(&event).await {
            Ok(StageOutcome::Completed) => {
                event.status = EventStatus::Completed;
                event.error_message = None;
                event.error_details = None;
                event.updated_at = Utc::now();
                let event = self.events.update(event).await?;
                self.emit(&event, "events_completed_total").await;
                Ok(event)
            }
            Ok(StageOutcome::Blocked(err)) => {
                // Policy blocks are hard failures, never retried.
                event.status = EventStatus::Failed;
                event.error_message = Some(err.to_string());
                event.error_details = Some(err.to_details());
                event.updated_at = Utc::now();
                let event = self.events.update(event).await?;
                self.emit(&event, "events_failed_total").await;
                Ok(event)
            }
            Ok(StageOutcome::Quarantined(policy_name)) => {
                // Holding state: diverted without data loss and without
                // consuming a retry.
                warn!(
                    event_id = %event.id,
                    policy = %policy_name,
                    "event quarantined"
                );
                event.status = EventStatus::DeadLetter;
                event.dead_letter_queue = true;
                event.error_message = Some(format!("quarantined by policy '{policy_name}'"));
                event.updated_at = Utc::now();
                let event = self.events.update(event).await?;
                self.emit(&event, "events_quarantined_total").await;
                Ok(event)
            }
            Err(err) => self.handle_failure(event, err).await,
        }
    }

    async fn run_stages(&self, event: &IntegrationEvent) -> Result<StageOutcome, EngineError> {
        // Stage 1: transformation, when the event came through a connector
        // with mapping rules. Events without a connector pass through raw.
        let transformed = match event.connector_id {
            Some(connector_id) => {
                self.transform
                    .apply_all(connector_id, &event.payload)
                    .await?
            }
            None => event.payload.clone(),
        };

        // Stage 2: quality gates. Only critical failures halt the event.
        for spec in self.quality_checks.iter().filter(|s| s.enabled) {
            let result = self
                .quality
                .run(spec, std::slice::from_ref(&transformed))
                .await?;
            if self.quality.is_blocking(&result) {
                return Err(EngineError::Validation {
                    rule_id: result.id,
                    reason: format!("critical quality check '{}' failed", result.name),
                });
            }
        }

        // Stage 3: policy evaluation over the transformed attributes.
        let evaluation = self
            .policy
            .evaluate(&ActionContext {
                action: "event.transform".to_string(),
                connector_id: event.connector_id,
                attributes: serde_json::json!({
                    "event_type": event.event_type,
                    "category": event.category,
                    "source": event.source,
                    "payload": transformed,
                }),
            })
            .await?;

        match evaluation.decision {
            PolicyDecision::Allow => {
                // Stage 4: write-back for push-capable connectors.
                self.push_outbound(event, &transformed).await?;
                Ok(StageOutcome::Completed)
            }
            PolicyDecision::Block => {
                let deciding = evaluation.deciding_match();
                Ok(StageOutcome::Blocked(EngineError::PolicyViolation {
                    policy: deciding
                        .map(|m| m.policy_name.clone())
                        .unwrap_or_else(|| "unknown".to_string()),
                    action: "event.transform".to_string(),
                    violation_action: deciding.and_then(|m| m.violation_action.clone()),
                }))
            }
            PolicyDecision::Quarantine => Ok(StageOutcome::Quarantined(
                evaluation
                    .deciding_match()
                    .map(|m| m.policy_name.clone())
                    .unwrap_or_else(|| "unknown".to_string()),
            )),
        }
    }

    /// Deliver the transformed record back to the owning connector when it
    /// supports push. Adapter failures and rejected acks surface as stage
    /// errors and follow the normal retry policy.
    async fn push_outbound(
        &self,
        event: &IntegrationEvent,
        transformed: &JsonValue,
    ) -> Result<(), EngineError> {
        let Some(connector_id) = event.connector_id else {
            return Ok(());
        };
        let connector = match self.registry.get(connector_id).await {
            Ok(connector) => connector,
            // A connector deleted mid-flight leaves nothing to push to.
            Err(EngineError::ConnectorNotFound(_)) => return Ok(()),
            Err(err) => return Err(err),
        };
        if !connector.capabilities.supports_push {
            return Ok(());
        }

        let adapter =
            self.adapters
                .get(connector.connector_type)
                .map_err(|err| EngineError::InvalidConfig {
                    reason: err.to_string(),
                })?;
        let record = RawRecord {
            external_id: transformed
                .get("id")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| event.correlation_id.clone()),
            kind: event
                .event_type
                .split('.')
                .next()
                .unwrap_or("record")
                .to_string(),
            payload: transformed.clone(),
            observed_at: event.occurred_at,
        };
        let ack = adapter.push_change(&connector, &record).await?;
        if !ack.accepted {
            return Err(EngineError::PushRejected {
                connector: connector.name,
                external_id: ack.external_id,
            });
        }
        debug!(
            event_id = %event.id,
            connector_id = %connector.id,
            external_id = %ack.external_id,
            "pushed record outbound"
        );
        Ok(())
    }

    /// Retry-or-dead-letter bookkeeping after a processing failure.
    async fn handle_failure(
        &self,
        mut event: IntegrationEvent,
        err: EngineError,
    ) -> Result<IntegrationEvent, EngineError> {
        let now = Utc::now();
        event.retry_count += 1;
        event.error_message = Some(err.to_string());
        event.error_details = Some(err.to_details());

        if event.retry_count < event.max_retries {
            let backoff = self.backoff_for(event.retry_count);
            warn!(
                event_id = %event.id,
                retry_count = event.retry_count,
                backoff_seconds = backoff.as_secs(),
                error = %err,
                "event failed, scheduling retry"
            );
            event.status = EventStatus::Retry;
            event.next_attempt_at = Some(now + chrono::Duration::from_std(backoff).unwrap_or_default());
            event.updated_at = now;
            let mut event = self.events.update(event).await?;
            // Re-entry: RETRY rows immediately become PENDING and wait out
            // their backoff via next_attempt_at.
            event.status = EventStatus::Pending;
            let event = self.events.update(event).await?;
            self.emit(&event, "events_retried_total").await;
            Ok(event)
        } else {
            error!(
                event_id = %event.id,
                retry_count = event.retry_count,
                error = %err,
                "event exhausted retries, dead-lettering"
            );
            event.status = EventStatus::DeadLetter;
            event.dead_letter_queue = true;
            event.updated_at = now;
            let event = self.events.update(event).await?;
            self.emit(&event, "events_dead_lettered_total").await;
            Ok(event)
        }
    }

    fn backoff_for(&self, retry_count: u32) -> Duration {
        let base = self.config.backoff_base_seconds.max(1);
        let exp = base.saturating_mul(1_u64 << (retry_count.saturating_sub(1)).min(32));
        let capped = exp.min(self.config.backoff_max_seconds) as f64;
        let jitter = 1.0 + rand::thread_rng().gen_range(0.0..=self.config.jitter_factor.max(0.0));
        Duration::from_secs_f64(capped * jitter)
    }

    /// Claim and process everything due at `now`, serialized per correlation
    /// id. Returns what happened for the orchestration log.
    pub async fn process_due(&self, now: DateTime<Utc>) -> Result<TickStats, EngineError> {
        let due = self.events.list_due(now, self.config.claim_batch).await?;
        let mut stats = TickStats::default();
        let mut handles = Vec::new();
        let mut claimed_correlations = HashSet::new();

        for event in due {
            // Per-correlation serialization: one event per correlation per
            // tick, and none that another task is still working on.
            if claimed_correlations.contains(&event.correlation_id) {
                continue;
            }
            {
                let in_flight = self.in_flight.lock().await;
                if in_flight.contains(&event.correlation_id) {
                    continue;
                }
            }
            claimed_correlations.insert(event.correlation_id.clone());
            self.in_flight
                .lock()
                .await
                .insert(event.correlation_id.clone());
            stats.claimed += 1;

            let pipeline = self.clone();
            let permit = self
                .concurrency
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| EngineError::InvalidConfig {
                    reason: format!("pipeline semaphore closed: {e}"),
                })?;
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let correlation_id = event.correlation_id.clone();
                let context = TraceContext {
                    correlation_id: correlation_id.clone(),
                };
                let result = with_trace_context(context, pipeline.process(event.id)).await;
                pipeline.in_flight.lock().await.remove(&correlation_id);
                (event.id, result)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((_, Ok(event))) => match event.status {
                    EventStatus::Completed => stats.completed += 1,
                    EventStatus::Pending | EventStatus::Retry => stats.retried += 1,
                    EventStatus::DeadLetter => stats.dead_lettered += 1,
                    EventStatus::Failed => stats.failed += 1,
                    EventStatus::Processing => {}
                },
                Ok((event_id, Err(err))) => {
                    error!(event_id = %event_id, error = %err, "event processing errored");
                    stats.failed += 1;
                }
                Err(join_err) => {
                    error!(error = %join_err, "event task panicked");
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Tick loop. Runs until the shutdown token fires; waits are cancellable.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        let tick = Duration::from_millis(self.config.tick_ms.max(10));
        info!(tick_ms = self.config.tick_ms, "event pipeline started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("event pipeline shutting down");
                    return;
                }
                _ = tokio::time::sleep(tick) => {}
            }
            match self.process_due(Utc::now()).await {
                Ok(stats) if stats.claimed > 0 => {
                    info!(
                        claimed = stats.claimed,
                        completed = stats.completed,
                        retried = stats.retried,
                        dead_lettered = stats.dead_lettered,
                        failed = stats.failed,
                        "pipeline tick"
                    );
                }
                Ok(_) => {}
                Err(err) => error!(error = %err, "pipeline tick failed"),
            }
        }
    }

    async fn emit(&self, event: &IntegrationEvent, name: &'static str) {
        let connector_id = event.connector_id.unwrap_or(Uuid::nil());
        let mut dimensions = BTreeMap::new();
        dimensions.insert("event_type".to_string(), event.event_type.clone());
        if let Err(err) = self
            .metrics
            .record_counter(connector_id, name, 1, dimensions)
            .await
        {
            warn!(error = %err, metric = name, "failed to record metric");
        }
    }
}

enum StageOutcome {
    Completed,
    Blocked(EngineError),
    Quarantined(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityConfig;
    use crate::repositories::Stores;

    fn engine(
        stores: &Stores,
        checks: Vec<QualityCheckSpec>,
    ) -> (EventPipeline, AdapterRegistry, ConnectorRegistry) {
        let metrics = MetricsCollector::new(stores.metrics.clone());
        let registry = ConnectorRegistry::new(
            stores.connectors.clone(),
            stores.templates.clone(),
            metrics.clone(),
        );
        let adapters = AdapterRegistry::new();
        let pipeline = EventPipeline::new(
            stores.events.clone(),
            registry.clone(),
            adapters.clone(),
            TransformationEngine::new(stores.rules.clone()),
            QualityChecker::new(stores.quality.clone(), QualityConfig::default()),
            PolicyEngine::new(stores.policies.clone()),
            metrics,
            PipelineConfig {
                backoff_base_seconds: 0,
                ..PipelineConfig::default()
            },
            checks,
        );
        (pipeline, adapters, registry)
    }

    fn pipeline(stores: &Stores, checks: Vec<QualityCheckSpec>) -> EventPipeline {
        engine(stores, checks).0
    }

    fn new_event(correlation: &str) -> NewEvent {
        NewEvent {
            event_type: "user.updated".to_string(),
            category: Some("identity".to_string()),
            source: "webhook".to_string(),
            connector_id: None,
            payload: serde_json::json!({"email": "ada@example.com"}),
            metadata: None,
            correlation_id: Some(correlation.to_string()),
            max_retries: None,
            occurred_at: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn clean_event_completes() {
        let stores = Stores::in_memory();
        let pipeline = pipeline(&stores, Vec::new());
        let event = pipeline.ingest(new_event("corr-1")).await.unwrap();
        let processed = pipeline.process(event.id).await.unwrap();
        assert_eq!(processed.status, EventStatus::Completed);
        assert_eq!(processed.retry_count, 0);
    }

    #[tokio::test]
    async fn completed_correlation_is_idempotent() {
        let stores = Stores::in_memory();
        let pipeline = pipeline(&stores, Vec::new());
        let first = pipeline.ingest(new_event("corr-1")).await.unwrap();
        let completed = pipeline.process(first.id).await.unwrap();

        let duplicate = pipeline.ingest(new_event("corr-1")).await.unwrap();
        let result = pipeline.process(duplicate.id).await.unwrap();

        // Prior result returned; duplicate marked complete without effects.
        assert_eq!(result.id, completed.id);
        let duplicate_row = stores.events.get(duplicate.id).await.unwrap().unwrap();
        assert_eq!(duplicate_row.status, EventStatus::Completed);
        assert_eq!(duplicate_row.retry_count, 0);
    }

    #[tokio::test]
    async fn expired_event_fails_without_consuming_retry() {
        let stores = Stores::in_memory();
        let pipeline = pipeline(&stores, Vec::new());
        let mut fresh = new_event("corr-exp");
        fresh.expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        let event = pipeline.ingest(fresh).await.unwrap();

        let processed = pipeline.process(event.id).await.unwrap();
        assert_eq!(processed.status, EventStatus::Failed);
        assert_eq!(processed.error_message.as_deref(), Some("expired"));
        assert_eq!(processed.retry_count, 0);
        assert!(!processed.dead_letter_queue);
    }

    #[tokio::test]
    async fn failures_retry_then_dead_letter_at_max() {
        use crate::models::{TransformType, TransformationRule, ValidationRules};

        let stores = Stores::in_memory();
        let pipeline = pipeline(&stores, Vec::new());
        let connector_id = Uuid::new_v4();

        // A required-pattern rule the payload can never satisfy.
        let now = Utc::now();
        stores
            .rules
            .insert(TransformationRule {
                id: Uuid::new_v4(),
                source_connector_id: connector_id,
                source_field: "email".to_string(),
                target_field: "email".to_string(),
                transform_type: TransformType::Direct,
                transform_config: serde_json::Value::Null,
                validation_rules: Some(ValidationRules {
                    required: true,
                    pattern: Some(r"^\d+$".to_string()),
                    min_length: None,
                    max_length: None,
                }),
                default_value: None,
                enabled: true,
                priority: 0,
                success_count: 0,
                error_count: 0,
                last_applied: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let mut failing = new_event("corr-fail");
        failing.connector_id = Some(connector_id);
        failing.max_retries = Some(3);
        let event = pipeline.ingest(failing).await.unwrap();

        let first = pipeline.process(event.id).await.unwrap();
        assert_eq!(first.status, EventStatus::Pending);
        assert_eq!(first.retry_count, 1);

        let second = pipeline.process(event.id).await.unwrap();
        assert_eq!(second.retry_count, 2);
        assert!(second.retry_count <= second.max_retries);

        let third = pipeline.process(event.id).await.unwrap();
        assert_eq!(third.status, EventStatus::DeadLetter);
        assert!(third.dead_letter_queue);
        assert_eq!(third.retry_count, 3);
    }

    #[tokio::test]
    async fn blocking_policy_fails_advisory_allows() {
        use crate::models::{
            EnforcementMode, IntegrationPolicy, PolicyRule, PolicyRuleOp, PolicyScope, PolicyType,
        };

        let stores = Stores::in_memory();
        let pipeline = pipeline(&stores, Vec::new());
        let now = Utc::now();
        let make_policy = |name: &str, mode: EnforcementMode| IntegrationPolicy {
            id: Uuid::new_v4(),
            name: name.to_string(),
            policy_type: PolicyType::Security,
            scope: PolicyScope::default(),
            rules: vec![PolicyRule {
                field: "payload.email".to_string(),
                op: PolicyRuleOp::Matches,
                value: serde_json::json!("@example\\.com$"),
            }],
            conditions: None,
            actions: None,
            enabled: true,
            priority: 10,
            enforcement_mode: mode,
            violation_action: Some("notify".to_string()),
            created_at: now,
            updated_at: now,
        };

        let blocking = stores
            .policies
            .insert(make_policy("block-example", EnforcementMode::Blocking))
            .await
            .unwrap();
        let event = pipeline.ingest(new_event("corr-blocked")).await.unwrap();
        let processed = pipeline.process(event.id).await.unwrap();
        assert_eq!(processed.status, EventStatus::Failed);
        assert!(processed.error_message.unwrap().contains("block-example"));

        // Same rule, advisory mode: the event completes.
        let mut disabled = blocking;
        disabled.enabled = false;
        stores.policies.update(disabled).await.unwrap();
        stores
            .policies
            .insert(make_policy("advise-example", EnforcementMode::Advisory))
            .await
            .unwrap();

        let event = pipeline.ingest(new_event("corr-advised")).await.unwrap();
        let processed = pipeline.process(event.id).await.unwrap();
        assert_eq!(processed.status, EventStatus::Completed);
    }

    #[tokio::test]
    async fn quarantine_diverts_without_consuming_retry() {
        use crate::models::{
            EnforcementMode, IntegrationPolicy, PolicyRule, PolicyRuleOp, PolicyScope, PolicyType,
        };

        let stores = Stores::in_memory();
        let pipeline = pipeline(&stores, Vec::new());
        let now = Utc::now();
        stores
            .policies
            .insert(IntegrationPolicy {
                id: Uuid::new_v4(),
                name: "quarantine-example".to_string(),
                policy_type: PolicyType::Compliance,
                scope: PolicyScope::default(),
                rules: vec![PolicyRule {
                    field: "payload.email".to_string(),
                    op: PolicyRuleOp::Exists,
                    value: serde_json::Value::Null,
                }],
                conditions: None,
                actions: None,
                enabled: true,
                priority: 10,
                enforcement_mode: EnforcementMode::Quarantine,
                violation_action: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let event = pipeline.ingest(new_event("corr-q")).await.unwrap();
        let processed = pipeline.process(event.id).await.unwrap();
        assert_eq!(processed.status, EventStatus::DeadLetter);
        assert!(processed.dead_letter_queue);
        assert_eq!(processed.retry_count, 0);
        assert!(processed.error_message.unwrap().contains("quarantine-example"));
    }

    #[tokio::test]
    async fn critical_quality_failure_halts_the_event() {
        use crate::models::{CheckSeverity, QualityCheckType, QualityRule};

        let stores = Stores::in_memory();
        let check = QualityCheckSpec {
            name: "email-present".to_string(),
            check_type: QualityCheckType::Completeness,
            data_source: "webhook".to_string(),
            rules: vec![QualityRule {
                field: "missing_field".to_string(),
                params: serde_json::Value::Null,
            }],
            severity: CheckSeverity::Critical,
            enabled: true,
        };
        let pipeline = pipeline(&stores, vec![check]);

        let mut failing = new_event("corr-quality");
        failing.max_retries = Some(1);
        let event = pipeline.ingest(failing).await.unwrap();
        let processed = pipeline.process(event.id).await.unwrap();
        assert_eq!(processed.status, EventStatus::DeadLetter);
    }

    fn push_connector(name: &str, supports_push: bool) -> crate::registry::NewConnector {
        use crate::models::{
            ConnectorCapabilities, ConnectorConfig, ConnectorType, SyncStrategy,
        };

        crate::registry::NewConnector {
            name: name.to_string(),
            connector_type: ConnectorType::Custom,
            provider: "custom".to_string(),
            config: ConnectorConfig {
                version: "1.0.0".to_string(),
                endpoint: None,
                settings: serde_json::json!({}),
            },
            capabilities: ConnectorCapabilities {
                supports_incremental: false,
                supports_webhooks: false,
                supports_push,
            },
            sync_enabled: false,
            sync_interval_seconds: 900,
            sync_strategy: SyncStrategy::Full,
            rate_limit_per_minute: 60,
            rate_limit_per_hour: 3600,
            encryption_key_id: None,
            certificate_id: None,
            tenant_id: None,
        }
    }

    #[tokio::test]
    async fn push_capable_connector_receives_the_transformed_record() {
        use crate::adapters::StaticAdapter;
        use crate::models::ConnectorType;

        let stores = Stores::in_memory();
        let (pipeline, adapters, registry) = engine(&stores, Vec::new());
        let adapter = Arc::new(StaticAdapter::empty());
        adapters.register(ConnectorType::Custom, adapter.clone());
        let connector = registry
            .register(push_connector("crm-prod", true))
            .await
            .unwrap();

        let mut outbound = new_event("corr-push");
        outbound.connector_id = Some(connector.id);
        let event = pipeline.ingest(outbound).await.unwrap();
        let processed = pipeline.process(event.id).await.unwrap();

        assert_eq!(processed.status, EventStatus::Completed);
        let pushed = adapter.pushed();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].kind, "user");
        assert_eq!(pushed[0].external_id, "corr-push");
        assert_eq!(pushed[0].payload["email"], "ada@example.com");
    }

    #[tokio::test]
    async fn connector_without_push_skips_write_back() {
        use crate::adapters::StaticAdapter;
        use crate::models::ConnectorType;

        let stores = Stores::in_memory();
        let (pipeline, adapters, registry) = engine(&stores, Vec::new());
        let adapter = Arc::new(StaticAdapter::empty());
        adapters.register(ConnectorType::Custom, adapter.clone());
        let connector = registry
            .register(push_connector("read-only", false))
            .await
            .unwrap();

        let mut inbound = new_event("corr-ro");
        inbound.connector_id = Some(connector.id);
        let event = pipeline.ingest(inbound).await.unwrap();
        let processed = pipeline.process(event.id).await.unwrap();

        assert_eq!(processed.status, EventStatus::Completed);
        assert!(adapter.pushed().is_empty());
    }

    #[tokio::test]
    async fn failed_push_follows_the_retry_policy() {
        use crate::adapters::{AdapterError, StaticAdapter};
        use crate::models::ConnectorType;

        let stores = Stores::in_memory();
        let (pipeline, adapters, registry) = engine(&stores, Vec::new());
        let adapter = Arc::new(StaticAdapter::empty());
        adapter.set_failure(Some(AdapterError::Network {
            details: "connection reset".to_string(),
            retryable: true,
        }));
        adapters.register(ConnectorType::Custom, adapter.clone());
        let connector = registry
            .register(push_connector("crm-prod", true))
            .await
            .unwrap();

        let mut outbound = new_event("corr-push-fail");
        outbound.connector_id = Some(connector.id);
        let event = pipeline.ingest(outbound).await.unwrap();
        let processed = pipeline.process(event.id).await.unwrap();

        assert_eq!(processed.status, EventStatus::Pending);
        assert_eq!(processed.retry_count, 1);
        assert!(adapter.pushed().is_empty());
    }

    #[tokio::test]
    async fn process_due_serializes_per_correlation() {
        let stores = Stores::in_memory();
        let pipeline = pipeline(&stores, Vec::new());

        pipeline.ingest(new_event("corr-a")).await.unwrap();
        pipeline.ingest(new_event("corr-a")).await.unwrap();
        pipeline.ingest(new_event("corr-b")).await.unwrap();

        let stats = pipeline.process_due(Utc::now()).await.unwrap();
        // One per correlation per tick.
        assert_eq!(stats.claimed, 2);
        assert_eq!(stats.completed, 2);

        let stats = pipeline.process_due(Utc::now()).await.unwrap();
        assert_eq!(stats.claimed, 1);
        // Second corr-a event deduplicates against the completed sibling.
        assert_eq!(stats.completed, 1);
    }
}
