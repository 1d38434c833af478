//! Configuration loading for the integration engine.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `NOVA_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application configuration derived from `NOVA_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub quality: QualityConfig,
}

/// Sync-orchestrator scheduling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SchedulerConfig {
    /// Seconds between orchestrator ticks
    #[serde(default = "default_scheduler_tick_seconds")]
    pub tick_interval_seconds: u64,
    /// Fallback sync interval for connectors without one
    #[serde(default = "default_scheduler_interval_seconds")]
    pub default_interval_seconds: u64,
    /// Jitter band applied to scheduled jobs, as a fraction of the interval
    #[serde(default = "default_jitter_pct_min")]
    pub jitter_pct_min: f64,
    #[serde(default = "default_jitter_pct_max")]
    pub jitter_pct_max: f64,
    /// Maximum concurrently running jobs across all connectors
    #[serde(default = "default_scheduler_concurrency")]
    pub concurrency: usize,
    /// Maximum jobs claimed per tick
    #[serde(default = "default_claim_batch")]
    pub claim_batch: usize,
    /// Wall-clock budget for a running job, per job type; fallback applies
    /// when the type has no override
    #[serde(default = "default_job_timeout_seconds")]
    pub job_timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub job_timeout_overrides: BTreeMap<String, u64>,
}

/// Retry policy for failed and timed-out sync jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RetryConfig {
    /// Upper bound for exponential backoff
    #[serde(default = "default_retry_max_backoff_seconds")]
    pub max_backoff_seconds: u64,
    /// Random factor applied to backoff, range 0.0-1.0
    #[serde(default = "default_retry_jitter_factor")]
    pub jitter_factor: f64,
    /// Attempt ceiling across one retry chain
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
}

/// Event-pipeline parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct PipelineConfig {
    /// Milliseconds between pipeline ticks
    #[serde(default = "default_pipeline_tick_ms")]
    pub tick_ms: u64,
    /// Events processed concurrently (distinct correlation ids)
    #[serde(default = "default_pipeline_concurrency")]
    pub concurrency: usize,
    /// Maximum events claimed per tick
    #[serde(default = "default_claim_batch")]
    pub claim_batch: usize,
    /// Retry ceiling applied when ingress supplies none
    #[serde(default = "default_event_max_retries")]
    pub default_max_retries: u32,
    /// Base retry backoff
    #[serde(default = "default_pipeline_backoff_base_seconds")]
    pub backoff_base_seconds: u64,
    #[serde(default = "default_pipeline_backoff_max_seconds")]
    pub backoff_max_seconds: u64,
    #[serde(default = "default_retry_jitter_factor")]
    pub jitter_factor: f64,
}

/// Identity-resolution thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct IdentityConfig {
    /// Confidence at which a PENDING_REVIEW mapping promotes to ACTIVE
    #[serde(default = "default_identity_threshold")]
    pub promote_threshold: f64,
    /// Confidence at or above which a disagreeing source conflicts the
    /// mapping instead of replacing the value
    #[serde(default = "default_identity_threshold")]
    pub conflict_threshold: f64,
}

/// Data-quality thresholds, applied per check severity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct QualityConfig {
    /// Score at or above which a check passes
    #[serde(default = "default_quality_pass_threshold")]
    pub pass_threshold: f64,
    /// Score at or above which a failing check downgrades to a warning
    #[serde(default = "default_quality_warn_threshold")]
    pub warn_threshold: f64,
}

fn default_profile() -> String {
    "local".to_string()
}
fn default_api_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_scheduler_tick_seconds() -> u64 {
    15
}
fn default_scheduler_interval_seconds() -> u64 {
    900
}
fn default_jitter_pct_min() -> f64 {
    0.0
}
fn default_jitter_pct_max() -> f64 {
    0.1
}
fn default_scheduler_concurrency() -> usize {
    10
}
fn default_claim_batch() -> usize {
    50
}
fn default_job_timeout_seconds() -> u64 {
    300
}
fn default_retry_max_backoff_seconds() -> u64 {
    3600
}
fn default_retry_jitter_factor() -> f64 {
    0.1
}
fn default_retry_max_attempts() -> u32 {
    5
}
fn default_pipeline_tick_ms() -> u64 {
    1000
}
fn default_pipeline_concurrency() -> usize {
    16
}
fn default_event_max_retries() -> u32 {
    3
}
fn default_pipeline_backoff_base_seconds() -> u64 {
    5
}
fn default_pipeline_backoff_max_seconds() -> u64 {
    900
}
fn default_identity_threshold() -> f64 {
    0.75
}
fn default_quality_pass_threshold() -> f64 {
    0.95
}
fn default_quality_warn_threshold() -> f64 {
    0.8
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
            pipeline: PipelineConfig::default(),
            identity: IdentityConfig::default(),
            quality: QualityConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: default_scheduler_tick_seconds(),
            default_interval_seconds: default_scheduler_interval_seconds(),
            jitter_pct_min: default_jitter_pct_min(),
            jitter_pct_max: default_jitter_pct_max(),
            concurrency: default_scheduler_concurrency(),
            claim_batch: default_claim_batch(),
            job_timeout_seconds: default_job_timeout_seconds(),
            job_timeout_overrides: BTreeMap::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_backoff_seconds: default_retry_max_backoff_seconds(),
            jitter_factor: default_retry_jitter_factor(),
            max_attempts: default_retry_max_attempts(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_pipeline_tick_ms(),
            concurrency: default_pipeline_concurrency(),
            claim_batch: default_claim_batch(),
            default_max_retries: default_event_max_retries(),
            backoff_base_seconds: default_pipeline_backoff_base_seconds(),
            backoff_max_seconds: default_pipeline_backoff_max_seconds(),
            jitter_factor: default_retry_jitter_factor(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            promote_threshold: default_identity_threshold(),
            conflict_threshold: default_identity_threshold(),
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            pass_threshold: default_quality_pass_threshold(),
            warn_threshold: default_quality_warn_threshold(),
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
    #[error("invalid bind address '{value}': {reason}")]
    InvalidBindAddr { value: String, reason: String },
    #[error("scheduler tick interval {value}s out of bounds (5..=300)")]
    InvalidSchedulerTick { value: u64 },
    #[error("scheduler jitter band [{min}, {max}] invalid")]
    InvalidJitterBand { min: f64, max: f64 },
    #[error("retry jitter factor {value} out of bounds (0.0..=1.0)")]
    InvalidJitterFactor { value: f64 },
    #[error("identity threshold {value} out of bounds (0.0..=1.0)")]
    InvalidIdentityThreshold { value: f64 },
    #[error("quality thresholds pass={pass} warn={warn} must satisfy 0 <= warn <= pass <= 1")]
    InvalidQualityThresholds { pass: f64, warn: f64 },
    #[error("pipeline backoff base {base}s exceeds max {max}s")]
    InvalidPipelineBackoff { base: u64, max: u64 },
}

impl AppConfig {
    /// Resolve the configured bind address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.api_bind_addr
            .parse()
            .map_err(|err| ConfigError::InvalidBindAddr {
                value: self.api_bind_addr.clone(),
                reason: format!("{err}"),
            })
    }

    /// Validate every section's bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        self.scheduler.validate()?;
        self.retry.validate()?;
        self.pipeline.validate()?;
        self.identity.validate()?;
        self.quality.validate()?;
        Ok(())
    }

    /// Serialized configuration for startup logging. The current schema
    /// carries no secrets, but callers should only ever log this form.
    pub fn redacted_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(5..=300).contains(&self.tick_interval_seconds) {
            return Err(ConfigError::InvalidSchedulerTick {
                value: self.tick_interval_seconds,
            });
        }
        let band_valid = (0.0..=1.0).contains(&self.jitter_pct_min)
            && (0.0..=1.0).contains(&self.jitter_pct_max)
            && self.jitter_pct_min <= self.jitter_pct_max;
        if !band_valid {
            return Err(ConfigError::InvalidJitterBand {
                min: self.jitter_pct_min,
                max: self.jitter_pct_max,
            });
        }
        Ok(())
    }

    /// Timeout budget for a given job type.
    pub fn timeout_for(&self, job_type: &str) -> u64 {
        self.job_timeout_overrides
            .get(job_type)
            .copied()
            .unwrap_or(self.job_timeout_seconds)
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidJitterFactor {
                value: self.jitter_factor,
            });
        }
        Ok(())
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff_base_seconds > self.backoff_max_seconds {
            return Err(ConfigError::InvalidPipelineBackoff {
                base: self.backoff_base_seconds,
                max: self.backoff_max_seconds,
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidJitterFactor {
                value: self.jitter_factor,
            });
        }
        Ok(())
    }
}

impl IdentityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for value in [self.promote_threshold, self.conflict_threshold] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidIdentityThreshold { value });
            }
        }
        Ok(())
    }
}

impl QualityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = (0.0..=1.0).contains(&self.warn_threshold)
            && (0.0..=1.0).contains(&self.pass_threshold)
            && self.warn_threshold <= self.pass_threshold;
        if !ordered {
            return Err(ConfigError::InvalidQualityThresholds {
                pass: self.pass_threshold,
                warn: self.warn_threshold,
            });
        }
        Ok(())
    }
}

/// Loads configuration from layered `.env` files plus process environment.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Load `.env`, then `.env.{profile}`, then overlay `NOVA_*` process
    /// variables so the process environment always wins.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut layered = self.collect_file_env(".env")?;

        let profile_hint = layered
            .get("PROFILE")
            .cloned()
            .or_else(|| env::var("NOVA_PROFILE").ok())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_profile);
        for (key, value) in self.collect_file_env(&format!(".env.{profile_hint}"))? {
            layered.insert(key, value);
        }

        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("NOVA_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        let config = Self::build(layered, profile_hint);
        config.validate()?;
        Ok(config)
    }

    fn collect_file_env(&self, name: &str) -> Result<BTreeMap<String, String>, ConfigError> {
        let path = self.base_dir.join(name);
        let mut values = BTreeMap::new();
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix("NOVA_") {
                        values.insert(stripped.to_string(), value);
                    }
                }
            }
            // A missing layer is not an error.
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(ConfigError::EnvFile { path, source }),
        }
        Ok(values)
    }

    fn build(mut layered: BTreeMap<String, String>, profile: String) -> AppConfig {
        fn take(map: &mut BTreeMap<String, String>, key: &str) -> Option<String> {
            map.remove(key).filter(|v| !v.is_empty())
        }
        fn take_parsed<T: std::str::FromStr>(
            map: &mut BTreeMap<String, String>,
            key: &str,
        ) -> Option<T> {
            take(map, key).and_then(|v| v.parse().ok())
        }

        let mut config = AppConfig {
            profile,
            ..AppConfig::default()
        };

        if let Some(addr) = take(&mut layered, "API_BIND_ADDR") {
            config.api_bind_addr = addr;
        }
        if let Some(level) = take(&mut layered, "LOG_LEVEL") {
            config.log_level = level;
        }
        if let Some(format) = take(&mut layered, "LOG_FORMAT") {
            config.log_format = format;
        }

        let scheduler = &mut config.scheduler;
        if let Some(v) = take_parsed(&mut layered, "SCHEDULER_TICK_INTERVAL_SECONDS") {
            scheduler.tick_interval_seconds = v;
        }
        if let Some(v) = take_parsed(&mut layered, "SCHEDULER_DEFAULT_INTERVAL_SECONDS") {
            scheduler.default_interval_seconds = v;
        }
        if let Some(v) = take_parsed(&mut layered, "SCHEDULER_JITTER_PCT_MIN") {
            scheduler.jitter_pct_min = v;
        }
        if let Some(v) = take_parsed(&mut layered, "SCHEDULER_JITTER_PCT_MAX") {
            scheduler.jitter_pct_max = v;
        }
        if let Some(v) = take_parsed(&mut layered, "SCHEDULER_CONCURRENCY") {
            scheduler.concurrency = v;
        }
        if let Some(v) = take_parsed(&mut layered, "SCHEDULER_CLAIM_BATCH") {
            scheduler.claim_batch = v;
        }
        if let Some(v) = take_parsed(&mut layered, "SCHEDULER_JOB_TIMEOUT_SECONDS") {
            scheduler.job_timeout_seconds = v;
        }

        let retry = &mut config.retry;
        if let Some(v) = take_parsed(&mut layered, "RETRY_MAX_BACKOFF_SECONDS") {
            retry.max_backoff_seconds = v;
        }
        if let Some(v) = take_parsed(&mut layered, "RETRY_JITTER_FACTOR") {
            retry.jitter_factor = v;
        }
        if let Some(v) = take_parsed(&mut layered, "RETRY_MAX_ATTEMPTS") {
            retry.max_attempts = v;
        }

        let pipeline = &mut config.pipeline;
        if let Some(v) = take_parsed(&mut layered, "PIPELINE_TICK_MS") {
            pipeline.tick_ms = v;
        }
        if let Some(v) = take_parsed(&mut layered, "PIPELINE_CONCURRENCY") {
            pipeline.concurrency = v;
        }
        if let Some(v) = take_parsed(&mut layered, "PIPELINE_CLAIM_BATCH") {
            pipeline.claim_batch = v;
        }
        if let Some(v) = take_parsed(&mut layered, "PIPELINE_DEFAULT_MAX_RETRIES") {
            pipeline.default_max_retries = v;
        }
        if let Some(v) = take_parsed(&mut layered, "PIPELINE_BACKOFF_BASE_SECONDS") {
            pipeline.backoff_base_seconds = v;
        }
        if let Some(v) = take_parsed(&mut layered, "PIPELINE_BACKOFF_MAX_SECONDS") {
            pipeline.backoff_max_seconds = v;
        }

        if let Some(v) = take_parsed(&mut layered, "IDENTITY_PROMOTE_THRESHOLD") {
            config.identity.promote_threshold = v;
        }
        if let Some(v) = take_parsed(&mut layered, "IDENTITY_CONFLICT_THRESHOLD") {
            config.identity.conflict_threshold = v;
        }
        if let Some(v) = take_parsed(&mut layered, "QUALITY_PASS_THRESHOLD") {
            config.quality.pass_threshold = v;
        }
        if let Some(v) = take_parsed(&mut layered, "QUALITY_WARN_THRESHOLD") {
            config.quality.warn_threshold = v;
        }

        config
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        AppConfig::default().validate().expect("defaults are valid");
    }

    #[test]
    fn build_overrides_from_layered_values() {
        let mut layered = BTreeMap::new();
        layered.insert("API_BIND_ADDR".to_string(), "0.0.0.0:9000".to_string());
        layered.insert(
            "SCHEDULER_TICK_INTERVAL_SECONDS".to_string(),
            "30".to_string(),
        );
        layered.insert("PIPELINE_DEFAULT_MAX_RETRIES".to_string(), "7".to_string());
        layered.insert("IDENTITY_PROMOTE_THRESHOLD".to_string(), "0.9".to_string());

        let config = ConfigLoader::build(layered, "test".to_string());
        assert_eq!(config.profile, "test");
        assert_eq!(config.api_bind_addr, "0.0.0.0:9000");
        assert_eq!(config.scheduler.tick_interval_seconds, 30);
        assert_eq!(config.pipeline.default_max_retries, 7);
        assert!((config.identity.promote_threshold - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let mut layered = BTreeMap::new();
        layered.insert("LOG_LEVEL".to_string(), String::new());
        let config = ConfigLoader::build(layered, default_profile());
        assert_eq!(config.log_level, default_log_level());
    }

    #[test]
    fn quality_threshold_ordering_enforced() {
        let config = AppConfig {
            quality: QualityConfig {
                pass_threshold: 0.5,
                warn_threshold: 0.9,
            },
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidQualityThresholds { .. })
        ));
    }

    #[test]
    fn job_timeout_override_wins() {
        let mut scheduler = SchedulerConfig::default();
        scheduler
            .job_timeout_overrides
            .insert("full".to_string(), 1800);
        assert_eq!(scheduler.timeout_for("full"), 1800);
        assert_eq!(
            scheduler.timeout_for("incremental"),
            scheduler.job_timeout_seconds
        );
    }
}
