//! # Rate Limiting
//!
//! Dual token buckets (per-minute and per-hour) keyed by connector. A request
//! passes only when both windows have budget; acquiring consumes from both.
//! Owned by the orchestrator's run loop, not a process-wide singleton.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::Connector;

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_second: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, window: Duration, now: Instant) -> Self {
        let capacity = f64::from(capacity);
        Self {
            capacity,
            tokens: capacity,
            refill_per_second: capacity / window.as_secs_f64(),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_second)
            .min(self.capacity);
        self.last_refill = now;
    }

    fn has_token(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.tokens >= 1.0
    }

    fn consume(&mut self) {
        self.tokens -= 1.0;
    }

    /// Time until one token is available, zero when one already is.
    fn time_to_token(&mut self, now: Instant) -> Duration {
        self.refill(now);
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((1.0 - self.tokens) / self.refill_per_second)
    }
}

#[derive(Debug)]
struct ConnectorBuckets {
    minute: TokenBucket,
    hour: TokenBucket,
}

impl ConnectorBuckets {
    fn new(connector: &Connector, now: Instant) -> Self {
        Self {
            minute: TokenBucket::new(
                connector.rate_limit_per_minute,
                Duration::from_secs(60),
                now,
            ),
            hour: TokenBucket::new(
                connector.rate_limit_per_hour,
                Duration::from_secs(3600),
                now,
            ),
        }
    }
}

/// Per-connector rate-limit state.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<Uuid, ConnectorBuckets>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one token from both of the connector's windows. Returns false
    /// without consuming anything when either window is exhausted.
    pub async fn try_acquire(&self, connector: &Connector) -> bool {
        self.try_acquire_at(connector, Instant::now()).await
    }

    /// How long until the connector has budget again. Zero when it already
    /// does.
    pub async fn time_until_available(&self, connector: &Connector) -> Duration {
        self.time_until_available_at(connector, Instant::now()).await
    }

    async fn try_acquire_at(&self, connector: &Connector, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().await;
        let entry = buckets
            .entry(connector.id)
            .or_insert_with(|| ConnectorBuckets::new(connector, now));
        if entry.minute.has_token(now) && entry.hour.has_token(now) {
            entry.minute.consume();
            entry.hour.consume();
            true
        } else {
            false
        }
    }

    async fn time_until_available_at(&self, connector: &Connector, now: Instant) -> Duration {
        let mut buckets = self.buckets.lock().await;
        let entry = buckets
            .entry(connector.id)
            .or_insert_with(|| ConnectorBuckets::new(connector, now));
        entry
            .minute
            .time_to_token(now)
            .max(entry.hour.time_to_token(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ConnectorCapabilities, ConnectorConfig, ConnectorStatus, HealthStatus, SyncStrategy,
    };
    use chrono::Utc;

    fn connector(per_minute: u32, per_hour: u32) -> Connector {
        let now = Utc::now();
        Connector {
            id: Uuid::new_v4(),
            name: "rate-test".to_string(),
            connector_type: crate::models::ConnectorType::Itsm,
            provider: "servicenow".to_string(),
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
            rate_limit_per_minute: per_minute,
            rate_limit_per_hour: per_hour,
            encryption_key_id: None,
            certificate_id: None,
            tenant_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn minute_window_caps_acquisition() {
        let limiter = RateLimiter::new();
        let connector = connector(5, 3600);
        let now = Instant::now();

        for _ in 0..5 {
            assert!(limiter.try_acquire_at(&connector, now).await);
        }
        assert!(!limiter.try_acquire_at(&connector, now).await);

        let wait = limiter.time_until_available_at(&connector, now).await;
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(13));
    }

    #[tokio::test]
    async fn hour_window_binds_when_tighter() {
        let limiter = RateLimiter::new();
        let connector = connector(60, 2);
        let now = Instant::now();

        assert!(limiter.try_acquire_at(&connector, now).await);
        assert!(limiter.try_acquire_at(&connector, now).await);
        assert!(!limiter.try_acquire_at(&connector, now).await);

        // Hourly refill is slow: well over a minute to the next token.
        let wait = limiter.time_until_available_at(&connector, now).await;
        assert!(wait > Duration::from_secs(60));
    }

    #[tokio::test]
    async fn tokens_refill_over_time() {
        let limiter = RateLimiter::new();
        let connector = connector(5, 3600);
        let now = Instant::now();

        for _ in 0..5 {
            assert!(limiter.try_acquire_at(&connector, now).await);
        }
        let later = now + Duration::from_secs(60);
        assert!(limiter.try_acquire_at(&connector, later).await);
    }

    #[tokio::test]
    async fn failed_acquire_consumes_nothing() {
        let limiter = RateLimiter::new();
        let connector = connector(60, 1);
        let now = Instant::now();

        assert!(limiter.try_acquire_at(&connector, now).await);
        // Hour bucket empty: repeated attempts must not drain the minute
        // bucket below its budget.
        for _ in 0..10 {
            assert!(!limiter.try_acquire_at(&connector, now).await);
        }
        let much_later = now + Duration::from_secs(3600);
        assert!(limiter.try_acquire_at(&connector, much_later).await);
    }
}
