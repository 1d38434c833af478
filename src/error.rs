//! # Error Handling
//!
//! Unified error taxonomy for the integration engine. Job and event failures
//! are captured in-record (`error_message`/`error_details`); these types are
//! for the boundaries where an operation cannot record its own failure.

use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use crate::repositories::StoreError;

/// Errors surfaced by engine components.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("connector {0} not found")]
    ConnectorNotFound(Uuid),

    #[error("connector '{0}' not found")]
    ConnectorNameNotFound(String),

    #[error("sync job {0} not found")]
    JobNotFound(Uuid),

    #[error("integration event {0} not found")]
    EventNotFound(Uuid),

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("unique constraint violated: {field} = '{value}'")]
    Duplicate { field: &'static str, value: String },

    #[error("validation failed for rule {rule_id}: {reason}")]
    Validation { rule_id: Uuid, reason: String },

    #[error("policy '{policy}' blocked action '{action}'")]
    PolicyViolation {
        policy: String,
        action: String,
        violation_action: Option<String>,
    },

    #[error("push rejected by '{connector}' for record '{external_id}'")]
    PushRejected {
        connector: String,
        external_id: String,
    },

    #[error(transparent)]
    Store(#[from] crate::repositories::StoreError),

    #[error(transparent)]
    Adapter(#[from] crate::adapters::AdapterError),
}

impl EngineError {
    /// Structured payload written into `error_details` columns. Carries the
    /// correlation id of the work being processed when one is active.
    pub fn to_details(&self) -> JsonValue {
        let mut details = match self {
            EngineError::Validation { rule_id, reason } => serde_json::json!({
                "type": "validation",
                "rule_id": rule_id.to_string(),
                "reason": reason,
            }),
            EngineError::PolicyViolation {
                policy,
                action,
                violation_action,
            } => serde_json::json!({
                "type": "policy_violation",
                "policy": policy,
                "action": action,
                "violation_action": violation_action,
            }),
            EngineError::Adapter(err) => serde_json::json!({
                "type": "adapter",
                "retryable": err.is_retryable(),
                "message": err.to_string(),
            }),
            other => serde_json::json!({
                "type": "engine",
                "message": other.to_string(),
            }),
        };
        if let Some(correlation_id) = crate::telemetry::current_correlation_id()
            && let Some(map) = details.as_object_mut()
        {
            map.insert(
                "correlation_id".to_string(),
                JsonValue::String(correlation_id),
            );
        }
        details
    }

    /// Whether a retry can reasonably change the outcome.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Adapter(err) => err.is_retryable(),
            EngineError::Store(StoreError::Backend(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AdapterError;

    #[test]
    fn adapter_transience_propagates() {
        let transient: EngineError = AdapterError::Network {
            details: "connection reset".into(),
            retryable: true,
        }
        .into();
        assert!(transient.is_retryable());

        let permanent: EngineError = AdapterError::Configuration {
            details: "missing endpoint".into(),
        }
        .into();
        assert!(!permanent.is_retryable());
    }

    #[test]
    fn policy_violation_details_carry_the_policy() {
        let err = EngineError::PolicyViolation {
            policy: "no-pii-export".into(),
            action: "event.transform".into(),
            violation_action: Some("notify-security".into()),
        };
        let details = err.to_details();
        assert_eq!(details["type"], "policy_violation");
        assert_eq!(details["policy"], "no-pii-export");
    }

    #[tokio::test]
    async fn details_carry_the_active_correlation_id() {
        use crate::telemetry::{TraceContext, with_trace_context};

        let err = EngineError::Validation {
            rule_id: Uuid::new_v4(),
            reason: "pattern mismatch".into(),
        };
        let outside = err.to_details();
        assert!(outside.get("correlation_id").is_none());

        let inside = with_trace_context(
            TraceContext {
                correlation_id: "corr-9".to_string(),
            },
            async move { err.to_details() },
        )
        .await;
        assert_eq!(inside["correlation_id"], "corr-9");
    }
}
