//! # Nova Integrations
//!
//! Connector synchronization and event-processing engine: a registry of
//! configured connectors, a sync orchestrator with per-connector rate limits
//! and retries, an event pipeline with transformation, quality, and policy
//! stages, and an identity resolver reconciling external identities into
//! canonical users.

pub mod adapters;
pub mod config;
pub mod error;
pub mod identity;
pub mod metrics_collector;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod policy;
pub mod quality;
pub mod rate_limit;
pub mod registry;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod transform;

pub use error::EngineError;
