//! IntegrationPolicy entity model
//!
//! Governance rules evaluated against candidate actions from any component.
//! The enforcement mode decides how strictly a violation is acted upon.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Governance domain a policy belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    DataGovernance,
    Security,
    Compliance,
    Business,
    Technical,
}

impl PolicyType {
    pub const fn as_str(self) -> &'static str {
        match self {
            PolicyType::DataGovernance => "data_governance",
            PolicyType::Security => "security",
            PolicyType::Compliance => "compliance",
            PolicyType::Business => "business",
            PolicyType::Technical => "technical",
        }
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How strictly a matching policy is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    /// Log the violation and continue
    Advisory,
    /// Halt the action with a hard error
    Blocking,
    /// Divert the record to a holding state instead of discarding it
    Quarantine,
}

impl EnforcementMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            EnforcementMode::Advisory => "advisory",
            EnforcementMode::Blocking => "blocking",
            EnforcementMode::Quarantine => "quarantine",
        }
    }
}

impl fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of evaluating all policies against one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    Block,
    Quarantine,
}

impl PolicyDecision {
    pub const fn as_str(self) -> &'static str {
        match self {
            PolicyDecision::Allow => "allow",
            PolicyDecision::Block => "block",
            PolicyDecision::Quarantine => "quarantine",
        }
    }

    /// Restrictiveness ordering: Block > Quarantine > Allow.
    pub const fn restrictiveness(self) -> u8 {
        match self {
            PolicyDecision::Block => 2,
            PolicyDecision::Quarantine => 1,
            PolicyDecision::Allow => 0,
        }
    }
}

impl fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator a policy rule applies to an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRuleOp {
    Equals,
    NotEquals,
    Contains,
    /// Regex match against the string form of the attribute
    Matches,
    Exists,
}

/// A single predicate inside a policy's rule set. All rules must match for
/// the policy to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Dotted path into the action attributes (e.g. "payload.department")
    pub field: String,
    pub op: PolicyRuleOp,
    /// Comparison value; ignored for `Exists`
    #[serde(default)]
    pub value: JsonValue,
}

/// Which actions and connectors a policy applies to. Empty lists match all.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PolicyScope {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connector_ids: Vec<Uuid>,
    /// Action kinds, e.g. "event.transform", "sync.push"
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
}

/// A governance rule with scope, predicates, and an enforcement mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationPolicy {
    pub id: Uuid,
    /// Unique policy name
    pub name: String,
    pub policy_type: PolicyType,
    pub scope: PolicyScope,
    pub rules: Vec<PolicyRule>,
    /// Extra conditions carried for operators; not evaluated by the engine
    pub conditions: Option<JsonValue>,
    /// Remediation actions carried for operators
    pub actions: Option<JsonValue>,
    pub enabled: bool,
    /// Evaluated in descending order; ties break by id
    pub priority: i32,
    pub enforcement_mode: EnforcementMode,
    /// Label surfaced when a blocking violation fires
    pub violation_action: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
