//! # Sync Orchestrator
//!
//! Schedules and executes sync jobs per connector. Jobs across connectors
//! run concurrently under a worker pool; within one connector at most one
//! job runs at a time. The orchestrator enforces per-connector token-bucket
//! rate limits (a due job that would exceed budget is deferred, never
//! dropped), applies per-strategy timeout budgets, and retries failed or
//! timed-out jobs as successor rows with exponential, jittered backoff.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{AdapterRegistry, RawRecord};
use crate::config::{RetryConfig, SchedulerConfig};
use crate::error::EngineError;
use crate::identity::IdentityResolver;
use crate::metrics_collector::MetricsCollector;
use crate::models::{
    Connector, ConnectorType, HealthStatus, JobStatus, JobType, NewEvent, SyncJob, SyncStrategy,
    TriggerType,
};
use crate::pipeline::EventPipeline;
use crate::registry::ConnectorRegistry;
use crate::rate_limit::RateLimiter;
use crate::repositories::SyncJobStore;
use crate::telemetry::{TraceContext, with_trace_context};

/// Records ingested per cancellation checkpoint.
const BATCH_SIZE: usize = 50;

/// Per-tick execution statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorTickStats {
    pub scheduled: usize,
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    pub deferred: usize,
}

#[derive(Default)]
struct Progress {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

enum RunOutcome {
    Completed,
    Cancelled,
    Failed(EngineError),
}

/// The sync orchestrator.
#[derive(Clone)]
pub struct SyncOrchestrator {
    registry: ConnectorRegistry,
    jobs: Arc<dyn SyncJobStore>,
    adapters: AdapterRegistry,
    pipeline: EventPipeline,
    identity: IdentityResolver,
    metrics: MetricsCollector,
    rate_limiter: Arc<RateLimiter>,
    scheduler: SchedulerConfig,
    retry: RetryConfig,
    concurrency: Arc<Semaphore>,
    /// Connectors with a job currently running
    running: Arc<Mutex<HashSet<Uuid>>>,
    /// Cancellation tokens for running jobs
    cancel_tokens: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl SyncOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: ConnectorRegistry,
        jobs: Arc<dyn SyncJobStore>,
        adapters: AdapterRegistry,
        pipeline: EventPipeline,
        identity: IdentityResolver,
        metrics: MetricsCollector,
        scheduler: SchedulerConfig,
        retry: RetryConfig,
    ) -> Self {
        let concurrency = Arc::new(Semaphore::new(scheduler.concurrency.max(1)));
        Self {
            registry,
            jobs,
            adapters,
            pipeline,
            identity,
            metrics,
            rate_limiter: Arc::new(RateLimiter::new()),
            scheduler,
            retry,
            concurrency,
            running: Arc::new(Mutex::new(HashSet::new())),
            cancel_tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Enqueue a job for a connector. The row starts PENDING and is picked up
    /// by the next execution tick in trigger-priority order.
    pub async fn enqueue(
        &self,
        connector_id: Uuid,
        job_type: JobType,
        trigger: TriggerType,
        triggered_by: Option<String>,
        options: Option<serde_json::Value>,
    ) -> Result<SyncJob, EngineError> {
        let connector = self.registry.get(connector_id).await?;
        let now = Utc::now();
        let job = SyncJob {
            id: Uuid::new_v4(),
            connector_id,
            job_type,
            strategy: connector.sync_strategy,
            options,
            status: JobStatus::Pending,
            trigger,
            triggered_by,
            correlation_id: Uuid::new_v4().to_string(),
            attempt: 1,
            scheduled_at: now,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            records_processed: 0,
            records_succeeded: 0,
            records_failed: 0,
            error_message: None,
            error_details: None,
            created_at: now,
            updated_at: now,
        };
        debug!(
            job_id = %job.id,
            connector_id = %connector_id,
            trigger = %trigger,
            job_type = %job_type,
            "enqueued sync job"
        );
        Ok(self.jobs.insert(job).await?)
    }

    /// Cancel a job. PENDING jobs terminate immediately; RUNNING jobs are
    /// cooperatively cancelled at their next checkpoint. Cancelled jobs are
    /// never retried.
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), EngineError> {
        let mut job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or(EngineError::JobNotFound(job_id))?;
        match job.status {
            JobStatus::Pending => {
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(Utc::now());
                job.updated_at = Utc::now();
                self.jobs.update(job).await?;
                Ok(())
            }
            JobStatus::Running => {
                if let Some(token) = self.cancel_tokens.lock().await.get(&job_id) {
                    token.cancel();
                }
                Ok(())
            }
            // Terminal: nothing to do.
            _ => Ok(()),
        }
    }

    /// Enqueue scheduled jobs for every connector whose `next_sync` is due,
    /// then push the connector's next slot forward with jitter.
    pub async fn schedule_due(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let due = self.registry.list_due(now).await?;
        let mut scheduled = 0;
        for connector in due {
            // A connector with work already queued or running waits for it.
            if self.jobs.has_active(connector.id).await? {
                continue;
            }
            let job_type = match connector.sync_strategy {
                SyncStrategy::Full => JobType::Full,
                SyncStrategy::Incremental => JobType::Incremental,
                SyncStrategy::Delta => JobType::Delta,
            };
            self.enqueue(connector.id, job_type, TriggerType::Scheduled, None, None)
                .await?;
            let next = self.next_sync_for(&connector, now);
            self.registry.reschedule(connector.id, next).await?;
            scheduled += 1;
        }
        Ok(scheduled)
    }

    /// Claim due jobs in priority order and run them on the worker pool.
    /// Waits for every spawned job before returning, so one call is one
    /// complete execution wave.
    pub async fn claim_and_run(&self, now: DateTime<Utc>) -> Result<OrchestratorTickStats, EngineError> {
        let claimable = self.jobs.list_claimable(now, self.scheduler.claim_batch).await?;
        let mut stats = OrchestratorTickStats::default();
        let mut handles = Vec::new();
        let mut claimed_connectors = HashSet::new();

        for mut job in claimable {
            // Serialization: one running job per connector.
            if claimed_connectors.contains(&job.connector_id)
                || self.running.lock().await.contains(&job.connector_id)
            {
                continue;
            }

            let connector = match self.registry.get(job.connector_id).await {
                Ok(connector) => connector,
                Err(err) => {
                    // Fatal for this job only: a missing connector cannot be
                    // retried into existence.
                    warn!(job_id = %job.id, error = %err, "failing job with no connector");
                    job.status = JobStatus::Failed;
                    job.error_message = Some(err.to_string());
                    job.error_details = Some(err.to_details());
                    job.completed_at = Some(Utc::now());
                    job.updated_at = Utc::now();
                    self.jobs.update(job).await?;
                    stats.failed += 1;
                    continue;
                }
            };

            // Rate limiting: defer, never fail.
            if !self.rate_limiter.try_acquire(&connector).await {
                let wait = self.rate_limiter.time_until_available(&connector).await;
                debug!(
                    job_id = %job.id,
                    connector_id = %connector.id,
                    defer_seconds = wait.as_secs(),
                    "rate limit exhausted, deferring job"
                );
                job.scheduled_at = now
                    + chrono::Duration::from_std(wait).unwrap_or(chrono::Duration::seconds(60));
                job.updated_at = Utc::now();
                self.jobs.update(job).await?;
                stats.deferred += 1;
                continue;
            }

            // Claim: Pending -> Running.
            job.status = JobStatus::Running;
            job.started_at = Some(Utc::now());
            job.updated_at = Utc::now();
            let job = self.jobs.update(job).await?;
            claimed_connectors.insert(job.connector_id);
            self.running.lock().await.insert(job.connector_id);
            let token = CancellationToken::new();
            self.cancel_tokens.lock().await.insert(job.id, token.clone());
            stats.claimed += 1;

            let orchestrator = self.clone();
            let permit = self
                .concurrency
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| EngineError::InvalidConfig {
                    reason: format!("orchestrator semaphore closed: {e}"),
                })?;
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let context = TraceContext {
                    correlation_id: job.correlation_id.clone(),
                };
                with_trace_context(context, orchestrator.execute(job, connector, token)).await
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(Ok(status)) => match status {
                    JobStatus::Completed => stats.completed += 1,
                    JobStatus::Failed => stats.failed += 1,
                    JobStatus::Timeout => stats.timed_out += 1,
                    JobStatus::Cancelled => stats.cancelled += 1,
                    _ => {}
                },
                Ok(Err(err)) => {
                    error!(error = %err, "job execution errored");
                    stats.failed += 1;
                }
                Err(join_err) => {
                    error!(error = %join_err, "job task panicked");
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Run one claimed job to a terminal state, under its timeout budget.
    #[instrument(skip_all, fields(job_id = %job.id, connector_id = %connector.id))]
    async fn execute(
        &self,
        mut job: SyncJob,
        connector: Connector,
        token: CancellationToken,
    ) -> Result<JobStatus, EngineError> {
        let budget = Duration::from_secs(self.scheduler.timeout_for(job.job_type.as_str()));
        let progress = Arc::new(Progress::default());

        let outcome = match tokio::time::timeout(
            budget,
            self.run_job(&job, &connector, &token, &progress),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                warn!(
                    job_id = %job.id,
                    budget_seconds = budget.as_secs(),
                    "job exceeded its wall-clock budget"
                );
                // Treated as failure for retry policy, distinguished in
                // reporting.
                None
            }
        };

        let now = Utc::now();
        job.records_succeeded = progress.succeeded.load(Ordering::Relaxed);
        job.records_failed = progress.failed.load(Ordering::Relaxed);
        // Counter conservation on the terminal row: anything claimed by the
        // progress tracker but not yet resolved counts as failed.
        let resolved = job.records_succeeded + job.records_failed;
        let claimed = progress.processed.load(Ordering::Relaxed);
        job.records_failed += claimed.saturating_sub(resolved);
        job.records_processed = job.records_succeeded + job.records_failed;
        job.completed_at = Some(now);
        job.duration_ms = job
            .started_at
            .map(|started| (now - started).num_milliseconds());
        job.updated_at = now;

        let status = match outcome {
            Some(RunOutcome::Completed) => JobStatus::Completed,
            Some(RunOutcome::Cancelled) => JobStatus::Cancelled,
            Some(RunOutcome::Failed(err)) => {
                job.error_message = Some(err.to_string());
                job.error_details = Some(err.to_details());
                JobStatus::Failed
            }
            None => {
                job.error_message = Some("timed out".to_string());
                JobStatus::Timeout
            }
        };
        job.status = status;
        let job = self.jobs.update(job).await?;

        // Release the connector and the cancel token.
        self.cancel_tokens.lock().await.remove(&job.id);
        self.running.lock().await.remove(&job.connector_id);

        self.finish(&job, &connector, status).await?;
        Ok(status)
    }

    /// Post-terminal bookkeeping: connector cadence, retries, metrics.
    async fn finish(
        &self,
        job: &SyncJob,
        connector: &Connector,
        status: JobStatus,
    ) -> Result<(), EngineError> {
        let now = Utc::now();
        match status {
            JobStatus::Completed => {
                info!(
                    job_id = %job.id,
                    connector_id = %connector.id,
                    records = job.records_processed,
                    duration_ms = job.duration_ms,
                    "sync job completed"
                );
                // Health checks and validation runs do not move the sync
                // watermark.
                if matches!(job.job_type, JobType::Full | JobType::Incremental | JobType::Delta) {
                    let next = self.next_sync_for(connector, now);
                    self.registry
                        .record_sync_completed(connector.id, now, next)
                        .await?;
                }
            }
            JobStatus::Failed | JobStatus::Timeout => {
                warn!(
                    job_id = %job.id,
                    connector_id = %connector.id,
                    attempt = job.attempt,
                    status = %status,
                    error = job.error_message.as_deref().unwrap_or(""),
                    "sync job did not complete"
                );
                if job.attempt < self.retry.max_attempts {
                    self.spawn_successor(job, connector, now).await?;
                } else {
                    warn!(
                        job_id = %job.id,
                        connector_id = %connector.id,
                        "retry chain exhausted"
                    );
                }
            }
            // Cancelled jobs are never retried automatically.
            JobStatus::Cancelled => {
                info!(job_id = %job.id, "sync job cancelled");
            }
            _ => {}
        }

        let mut dimensions = BTreeMap::new();
        dimensions.insert("status".to_string(), status.as_str().to_string());
        dimensions.insert("trigger".to_string(), job.trigger.as_str().to_string());
        self.metrics
            .record_counter(connector.id, "sync_jobs_total", 1, dimensions)
            .await?;
        if let Some(duration_ms) = job.duration_ms {
            self.metrics
                .record_histogram(
                    connector.id,
                    "sync_job_duration_ms",
                    duration_ms as f64,
                    BTreeMap::new(),
                )
                .await?;
        }
        Ok(())
    }

    /// A retry is a successor row: same correlation id, attempt + 1, delayed
    /// by exponential backoff seeded from the connector's sync interval.
    async fn spawn_successor(
        &self,
        job: &SyncJob,
        connector: &Connector,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let backoff = self.backoff_for(connector, job.attempt);
        let successor = SyncJob {
            id: Uuid::new_v4(),
            attempt: job.attempt + 1,
            status: JobStatus::Pending,
            scheduled_at: now + chrono::Duration::from_std(backoff).unwrap_or_default(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            records_processed: 0,
            records_succeeded: 0,
            records_failed: 0,
            error_message: None,
            error_details: None,
            created_at: now,
            updated_at: now,
            correlation_id: job.correlation_id.clone(),
            ..job.clone()
        };
        info!(
            job_id = %job.id,
            successor_id = %successor.id,
            attempt = successor.attempt,
            backoff_seconds = backoff.as_secs(),
            "scheduling retry"
        );
        self.jobs.insert(successor).await?;
        Ok(())
    }

    async fn run_job(
        &self,
        job: &SyncJob,
        connector: &Connector,
        token: &CancellationToken,
        progress: &Progress,
    ) -> Option<RunOutcome> {
        let adapter = match self.adapters.get(connector.connector_type) {
            Ok(adapter) => adapter,
            Err(err) => {
                return Some(RunOutcome::Failed(EngineError::InvalidConfig {
                    reason: err.to_string(),
                }));
            }
        };

        if job.job_type == JobType::HealthCheck {
            let health = match adapter.probe(connector).await {
                Ok(()) => HealthStatus::Healthy,
                Err(err) if err.is_retryable() => HealthStatus::Degraded,
                Err(_) => HealthStatus::Unhealthy,
            };
            if let Err(err) = self.registry.update_health(connector.id, health).await {
                return Some(RunOutcome::Failed(err));
            }
            return Some(RunOutcome::Completed);
        }

        let since = match job.job_type {
            JobType::Full => None,
            _ => connector.last_sync,
        };
        let records = match adapter.fetch_changes(connector, since).await {
            Ok(records) => records,
            Err(err) => return Some(RunOutcome::Failed(err.into())),
        };

        for batch in records.chunks(BATCH_SIZE) {
            // Cooperative cancellation checkpoint between record batches.
            if token.is_cancelled() {
                return Some(RunOutcome::Cancelled);
            }
            for record in batch {
                progress.processed.fetch_add(1, Ordering::Relaxed);
                match self.ingest_record(job, connector, record).await {
                    Ok(()) => {
                        progress.succeeded.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        progress.failed.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            job_id = %job.id,
                            external_id = %record.external_id,
                            error = %err,
                            "record rejected"
                        );
                    }
                }
            }
        }
        Some(RunOutcome::Completed)
    }

    /// Hand one pulled record to the pipeline, resolving identities for the
    /// systems that report them. Validation jobs only verify the pull.
    async fn ingest_record(
        &self,
        job: &SyncJob,
        connector: &Connector,
        record: &RawRecord,
    ) -> Result<(), EngineError> {
        if matches!(
            connector.connector_type,
            ConnectorType::IdentityProvider | ConnectorType::HrSystem | ConnectorType::Directory
        ) {
            if let Some(email) = record.payload.get("email").and_then(|v| v.as_str()) {
                self.identity
                    .resolve(&connector.provider, &record.external_id, email)
                    .await?;
            }
        }

        if job.job_type == JobType::Validation {
            return Ok(());
        }

        self.pipeline
            .ingest(NewEvent {
                event_type: format!("{}.synced", record.kind),
                category: Some(connector.connector_type.as_str().to_string()),
                source: connector.name.clone(),
                connector_id: Some(connector.id),
                payload: record.payload.clone(),
                metadata: None,
                // Per-entity ordering: all changes to one external record
                // share a correlation id.
                correlation_id: Some(format!("{}:{}", connector.id, record.external_id)),
                max_retries: None,
                occurred_at: Some(record.observed_at),
                expires_at: None,
            })
            .await?;
        Ok(())
    }

    fn next_sync_for(&self, connector: &Connector, now: DateTime<Utc>) -> DateTime<Utc> {
        let interval = if connector.sync_interval_seconds > 0 {
            connector.sync_interval_seconds
        } else {
            self.scheduler.default_interval_seconds
        };
        let jitter_pct = rand::thread_rng()
            .gen_range(self.scheduler.jitter_pct_min..=self.scheduler.jitter_pct_max.max(self.scheduler.jitter_pct_min));
        let jittered = interval as f64 * (1.0 + jitter_pct);
        now + chrono::Duration::seconds(jittered as i64)
    }

    fn backoff_for(&self, connector: &Connector, attempt: u32) -> Duration {
        let base = connector.sync_interval_seconds.max(1);
        let exp = base.saturating_mul(1_u64 << (attempt.saturating_sub(1)).min(32));
        let capped = exp.min(self.retry.max_backoff_seconds) as f64;
        let jitter = 1.0 + rand::thread_rng().gen_range(0.0..=self.retry.jitter_factor.max(0.0));
        Duration::from_secs_f64(capped * jitter)
    }

    /// Tick loop: schedule due connectors, then run claimable jobs, until the
    /// shutdown token fires.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        let tick = Duration::from_secs(self.scheduler.tick_interval_seconds.max(1));
        info!(
            tick_seconds = self.scheduler.tick_interval_seconds,
            concurrency = self.scheduler.concurrency,
            "sync orchestrator started"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("sync orchestrator shutting down");
                    return;
                }
                _ = tokio::time::sleep(tick) => {}
            }
            let now = Utc::now();
            let scheduled = match self.schedule_due(now).await {
                Ok(scheduled) => scheduled,
                Err(err) => {
                    error!(error = %err, "scheduling pass failed");
                    0
                }
            };
            match self.claim_and_run(now).await {
                Ok(mut stats) => {
                    stats.scheduled = scheduled;
                    if stats.scheduled + stats.claimed + stats.deferred > 0 {
                        info!(
                            scheduled = stats.scheduled,
                            claimed = stats.claimed,
                            completed = stats.completed,
                            failed = stats.failed,
                            timed_out = stats.timed_out,
                            cancelled = stats.cancelled,
                            deferred = stats.deferred,
                            "orchestrator tick"
                        );
                    }
                }
                Err(err) => error!(error = %err, "execution pass failed"),
            }
        }
    }
}
