//! # Server Configuration
//!
//! HTTP ingress for the engine: a liveness probe and the webhook endpoint
//! that turns inbound provider payloads into pending integration events.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::EngineError;
use crate::models::{JobType, NewEvent, TriggerType};
use crate::orchestrator::SyncOrchestrator;
use crate::pipeline::EventPipeline;
use crate::registry::ConnectorRegistry;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectorRegistry,
    pub pipeline: EventPipeline,
    pub orchestrator: SyncOrchestrator,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/webhooks/{connector}", post(receive_webhook))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Starts the server with the given configuration
pub async fn run_server(
    config: &AppConfig,
    state: AppState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_app(state);
    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, profile = %config.profile, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Inbound webhook body. The wrapped payload becomes the event payload.
#[derive(Debug, Deserialize)]
struct WebhookBody {
    pub event_type: String,
    #[serde(default)]
    pub category: Option<String>,
    pub payload: JsonValue,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
    /// Delivery id used as the idempotency key, when the provider sends one
    #[serde(default)]
    pub delivery_id: Option<String>,
    /// Request an immediate webhook-triggered sync alongside the event
    #[serde(default)]
    pub trigger_sync: bool,
}

#[derive(Debug, Serialize)]
struct WebhookAccepted {
    event_id: Uuid,
    correlation_id: String,
    sync_job_id: Option<Uuid>,
}

/// Accept a provider webhook for a named connector and enqueue it as a
/// pending event. Optionally kicks off a webhook-triggered sync job.
async fn receive_webhook(
    State(state): State<AppState>,
    Path(connector_name): Path<String>,
    Json(body): Json<WebhookBody>,
) -> Result<(StatusCode, Json<WebhookAccepted>), ApiError> {
    let connector = state.registry.get_by_name(&connector_name).await?;
    if !connector.capabilities.supports_webhooks {
        return Err(ApiError {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            code: "WEBHOOKS_NOT_SUPPORTED",
            message: format!("connector '{connector_name}' does not accept webhooks"),
        });
    }

    let event = state
        .pipeline
        .ingest(NewEvent {
            event_type: body.event_type,
            category: body.category,
            source: format!("webhook:{connector_name}"),
            connector_id: Some(connector.id),
            payload: body.payload,
            metadata: body.metadata,
            correlation_id: body.delivery_id,
            max_retries: None,
            occurred_at: None,
            expires_at: None,
        })
        .await?;

    let sync_job_id = if body.trigger_sync {
        let job = state
            .orchestrator
            .enqueue(
                connector.id,
                JobType::Incremental,
                TriggerType::Webhook,
                Some(format!("webhook:{connector_name}")),
                None,
            )
            .await?;
        Some(job.id)
    } else {
        None
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookAccepted {
            event_id: event.id,
            correlation_id: event.correlation_id,
            sync_job_id,
        }),
    ))
}

/// API-facing error with a machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": { "code": self.code, "message": self.message }
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let (status, code) = match &err {
            EngineError::ConnectorNotFound(_) | EngineError::ConnectorNameNotFound(_) => {
                (StatusCode::NOT_FOUND, "CONNECTOR_NOT_FOUND")
            }
            EngineError::JobNotFound(_) => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
            EngineError::EventNotFound(_) => (StatusCode::NOT_FOUND, "EVENT_NOT_FOUND"),
            EngineError::InvalidConfig { .. } => (StatusCode::BAD_REQUEST, "INVALID_CONFIG"),
            EngineError::Duplicate { .. } => (StatusCode::CONFLICT, "DUPLICATE"),
            EngineError::Validation { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_FAILED"),
            EngineError::PolicyViolation { .. } => (StatusCode::FORBIDDEN, "POLICY_VIOLATION"),
            EngineError::PushRejected { .. } => (StatusCode::BAD_GATEWAY, "PUSH_REJECTED"),
            EngineError::Store(_) | EngineError::Adapter(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
            }
        };
        ApiError {
            status,
            code,
            message: err.to_string(),
        }
    }
}
