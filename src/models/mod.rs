//! Entity models for the integration engine.
//!
//! Plain data shapes shared by every component: connectors, sync jobs,
//! integration events, identity mappings, transformation rules, quality
//! checks, governance policies, metrics, and connector templates. All
//! status/type columns are closed enums so state-machine transitions are
//! checked exhaustively at compile time.

pub mod connector;
pub mod event;
pub mod identity;
pub mod metric;
pub mod policy;
pub mod quality;
pub mod sync_job;
pub mod template;
pub mod transform_rule;

pub use connector::{
    Connector, ConnectorCapabilities, ConnectorConfig, ConnectorStatus, ConnectorType,
    HealthStatus, SyncStrategy,
};
pub use event::{EventStatus, IntegrationEvent, NewEvent};
pub use identity::{ConflictCandidate, ConflictResolution, IdentityMapping, MappingStatus};
pub use metric::{ConnectorMetric, MetricKind};
pub use policy::{
    EnforcementMode, IntegrationPolicy, PolicyDecision, PolicyRule, PolicyRuleOp, PolicyScope,
    PolicyType,
};
pub use quality::{
    CheckSeverity, CheckStatus, DataQualityCheck, QualityCheckSpec, QualityCheckType, QualityIssue,
    QualityRule,
};
pub use sync_job::{JobStatus, JobType, SyncJob, TriggerType};
pub use template::ConnectorTemplate;
pub use transform_rule::{TransformType, TransformationRule, ValidationRules};
