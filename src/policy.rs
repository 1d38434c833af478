//! # Policy Engine
//!
//! Evaluates enabled governance policies against candidate actions. Policies
//! run in descending priority order (ties by id, so evaluation is
//! deterministic); within one priority tier the most restrictive matching
//! outcome wins. Advisory matches are logged and never stop the action.

use std::sync::Arc;

use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{
    EnforcementMode, IntegrationPolicy, PolicyDecision, PolicyRule, PolicyRuleOp,
};
use crate::repositories::PolicyStore;

/// The action a component wants to take, described for policy evaluation.
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Action kind, e.g. "event.transform", "sync.push"
    pub action: String,
    pub connector_id: Option<Uuid>,
    /// Attributes the policy rules inspect (payload fields, metadata)
    pub attributes: JsonValue,
}

/// One policy that matched during evaluation.
#[derive(Debug, Clone)]
pub struct PolicyMatch {
    pub policy_id: Uuid,
    pub policy_name: String,
    pub enforcement_mode: EnforcementMode,
    pub violation_action: Option<String>,
}

/// Outcome of evaluating all policies against one action.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub decision: PolicyDecision,
    /// Every matching policy, including advisory ones
    pub matches: Vec<PolicyMatch>,
}

impl Evaluation {
    /// The match that decided a non-allow outcome, if any.
    pub fn deciding_match(&self) -> Option<&PolicyMatch> {
        match self.decision {
            PolicyDecision::Allow => None,
            PolicyDecision::Block => self
                .matches
                .iter()
                .find(|m| m.enforcement_mode == EnforcementMode::Blocking),
            PolicyDecision::Quarantine => self
                .matches
                .iter()
                .find(|m| m.enforcement_mode == EnforcementMode::Quarantine),
        }
    }
}

/// Engine over the policy store.
#[derive(Clone)]
pub struct PolicyEngine {
    store: Arc<dyn PolicyStore>,
}

impl PolicyEngine {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self { store }
    }

    /// Evaluate every enabled policy against the action.
    pub async fn evaluate(&self, context: &ActionContext) -> Result<Evaluation, EngineError> {
        // Already sorted by priority descending, id ascending.
        let policies = self.store.list_enabled().await?;

        let mut matches = Vec::new();
        let mut decision = PolicyDecision::Allow;
        let mut index = 0;

        while index < policies.len() {
            let tier = policies[index].priority;
            let mut tier_decision = PolicyDecision::Allow;

            while index < policies.len() && policies[index].priority == tier {
                let policy = &policies[index];
                index += 1;
                if !policy_matches(policy, context) {
                    continue;
                }
                matches.push(PolicyMatch {
                    policy_id: policy.id,
                    policy_name: policy.name.clone(),
                    enforcement_mode: policy.enforcement_mode,
                    violation_action: policy.violation_action.clone(),
                });
                match policy.enforcement_mode {
                    EnforcementMode::Advisory => {
                        info!(
                            policy = %policy.name,
                            action = %context.action,
                            "advisory policy matched"
                        );
                    }
                    EnforcementMode::Blocking => {
                        if PolicyDecision::Block.restrictiveness() > tier_decision.restrictiveness()
                        {
                            tier_decision = PolicyDecision::Block;
                        }
                    }
                    EnforcementMode::Quarantine => {
                        if PolicyDecision::Quarantine.restrictiveness()
                            > tier_decision.restrictiveness()
                        {
                            tier_decision = PolicyDecision::Quarantine;
                        }
                    }
                }
            }

            // The highest tier with an enforcing match decides; advisory-only
            // tiers fall through to the next.
            if tier_decision != PolicyDecision::Allow {
                decision = tier_decision;
                break;
            }
        }

        if decision != PolicyDecision::Allow {
            warn!(
                action = %context.action,
                decision = %decision,
                "policy evaluation restricted action"
            );
        }
        Ok(Evaluation { decision, matches })
    }
}

fn policy_matches(policy: &IntegrationPolicy, context: &ActionContext) -> bool {
    let scope = &policy.scope;
    if !scope.actions.is_empty() && !scope.actions.contains(&context.action) {
        return false;
    }
    if !scope.connector_ids.is_empty() {
        match context.connector_id {
            Some(id) if scope.connector_ids.contains(&id) => {}
            _ => return false,
        }
    }
    policy
        .rules
        .iter()
        .all(|rule| rule_matches(rule, &context.attributes))
}

fn rule_matches(rule: &PolicyRule, attributes: &JsonValue) -> bool {
    let value = lookup(attributes, &rule.field);
    match rule.op {
        PolicyRuleOp::Exists => value.is_some_and(|v| !v.is_null()),
        PolicyRuleOp::Equals => value.is_some_and(|v| *v == rule.value),
        PolicyRuleOp::NotEquals => value.is_none_or(|v| *v != rule.value),
        PolicyRuleOp::Contains => match (value, rule.value.as_str()) {
            (Some(JsonValue::String(haystack)), Some(needle)) => haystack.contains(needle),
            (Some(JsonValue::Array(items)), _) => items.contains(&rule.value),
            _ => false,
        },
        PolicyRuleOp::Matches => match (value.and_then(JsonValue::as_str), rule.value.as_str()) {
            (Some(text), Some(pattern)) => {
                Regex::new(pattern).is_ok_and(|regex| regex.is_match(text))
            }
            _ => false,
        },
    }
}

fn lookup<'a>(attributes: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = attributes;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}
