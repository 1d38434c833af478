//! Tracing bootstrap and correlation-scoped context.
//!
//! Background work runs inside [`with_trace_context`], which pins the work's
//! correlation id to a tracing span (so every log line the task emits carries
//! it) and to task-local storage (so deep call sites can stamp it into
//! persisted rows without threading it through every signature).

use std::future::Future;
use std::sync::Once;

use thiserror::Error;
use tokio::task_local;
use tracing::{Instrument, info_span};
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;

/// Correlation metadata pinned to one unit of background work.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub correlation_id: String,
}

task_local! {
    static ACTIVE_TRACE_CONTEXT: TraceContext;
}

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

static INIT: Once = Once::new();

/// Install the global subscriber. Later calls are no-ops, so embedded uses
/// can call this freely.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    let mut outcome = Ok(());
    INIT.call_once(|| outcome = install(config));
    outcome
}

fn install(config: &AppConfig) -> Result<(), TelemetryInitError> {
    // Route legacy `log::` macros through tracing. When another logger got
    // there first it keeps receiving them instead.
    let _ = LogTracer::init();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_format == "pretty" {
        registry.with(fmt::layer().pretty()).try_init()?;
    } else {
        registry.with(fmt::layer().json()).try_init()?;
    }
    Ok(())
}

/// Run `work` inside a span carrying the correlation id, with the id also
/// reachable through [`current_correlation_id`] for the duration.
pub async fn with_trace_context<F>(context: TraceContext, work: F) -> F::Output
where
    F: Future,
{
    let span = info_span!("work", correlation_id = %context.correlation_id);
    ACTIVE_TRACE_CONTEXT
        .scope(context, work.instrument(span))
        .await
}

/// Correlation id of the work the current task is executing, if any.
pub fn current_correlation_id() -> Option<String> {
    ACTIVE_TRACE_CONTEXT
        .try_with(|context| context.correlation_id.clone())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn correlation_id_is_scoped_to_the_context() {
        assert_eq!(current_correlation_id(), None);

        let seen = with_trace_context(
            TraceContext {
                correlation_id: "corr-77".to_string(),
            },
            async { current_correlation_id() },
        )
        .await;
        assert_eq!(seen.as_deref(), Some("corr-77"));

        assert_eq!(current_correlation_id(), None);
    }

    #[tokio::test]
    async fn nested_contexts_shadow_the_outer_id() {
        let inner = with_trace_context(
            TraceContext {
                correlation_id: "outer".to_string(),
            },
            with_trace_context(
                TraceContext {
                    correlation_id: "inner".to_string(),
                },
                async { current_correlation_id() },
            ),
        )
        .await;
        assert_eq!(inner.as_deref(), Some("inner"));
    }
}
