//! # Transformation Engine
//!
//! Applies declarative field-mapping rules to values pulled from connector
//! records. Rule selection is deterministic: per target field the enabled
//! rule with the highest priority wins, ties broken by most recent update
//! then by id. Success and error counters are persisted on the rule.

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{TransformType, TransformationRule, ValidationRules};
use crate::repositories::RuleStore;

/// Result of applying one rule.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutcome {
    pub rule_id: Uuid,
    pub target_field: String,
    pub value: JsonValue,
    /// True when the configured default stood in for a failed transform
    pub used_default: bool,
}

/// Engine over the transformation-rule store.
#[derive(Clone)]
pub struct TransformationEngine {
    rules: Arc<dyn RuleStore>,
}

impl TransformationEngine {
    pub fn new(rules: Arc<dyn RuleStore>) -> Self {
        Self { rules }
    }

    /// Apply the winning rule for `(source_connector, source_field)` to one
    /// value. Errors when no enabled rule matches.
    pub async fn apply(
        &self,
        source_connector_id: Uuid,
        source_field: &str,
        value: &JsonValue,
    ) -> Result<TransformOutcome, EngineError> {
        let candidates = self
            .rules
            .list_for_source(source_connector_id, source_field)
            .await?;
        let rule = select_rule(candidates).ok_or_else(|| EngineError::InvalidConfig {
            reason: format!(
                "no enabled transformation rule for connector {source_connector_id} field '{source_field}'"
            ),
        })?;
        self.apply_rule(rule, value).await
    }

    /// Apply every winning rule for the connector to an object payload,
    /// producing the canonical record. Fields without a rule pass through
    /// untouched under their source name.
    pub async fn apply_all(
        &self,
        source_connector_id: Uuid,
        payload: &JsonValue,
    ) -> Result<JsonValue, EngineError> {
        let JsonValue::Object(source) = payload else {
            return Err(EngineError::InvalidConfig {
                reason: "transformation input must be a JSON object".to_string(),
            });
        };

        let rules = self.rules.list_for_connector(source_connector_id).await?;
        let mut output = serde_json::Map::new();
        for (field, value) in source {
            let candidates: Vec<TransformationRule> = rules
                .iter()
                .filter(|r| r.enabled && r.source_field == *field)
                .cloned()
                .collect();
            match select_rule(candidates) {
                Some(rule) => {
                    let outcome = self.apply_rule(rule, value).await?;
                    output.insert(outcome.target_field, outcome.value);
                }
                None => {
                    output.insert(field.clone(), value.clone());
                }
            }
        }
        Ok(JsonValue::Object(output))
    }

    async fn apply_rule(
        &self,
        mut rule: TransformationRule,
        value: &JsonValue,
    ) -> Result<TransformOutcome, EngineError> {
        let transformed = execute_transform(&rule, value)
            .and_then(|v| {
                validate_value(&rule, &v)?;
                Ok(v)
            });

        match transformed {
            Ok(value) => {
                rule.success_count += 1;
                rule.last_applied = Some(Utc::now());
                let outcome = TransformOutcome {
                    rule_id: rule.id,
                    target_field: rule.target_field.clone(),
                    value,
                    used_default: false,
                };
                self.rules.update(rule).await?;
                Ok(outcome)
            }
            Err(reason) => {
                rule.error_count += 1;
                // Non-fatal failure with a configured default keeps the
                // record flowing; otherwise surface the validation error.
                if let Some(default) = rule.default_value.clone() {
                    debug!(rule_id = %rule.id, %reason, "transform failed, using default");
                    let outcome = TransformOutcome {
                        rule_id: rule.id,
                        target_field: rule.target_field.clone(),
                        value: default,
                        used_default: true,
                    };
                    self.rules.update(rule).await?;
                    Ok(outcome)
                } else {
                    let rule_id = rule.id;
                    self.rules.update(rule).await?;
                    Err(EngineError::Validation {
                        rule_id,
                        reason: format!("{reason} (value: {value})"),
                    })
                }
            }
        }
    }
}

/// Pick the winning rule: per target field, highest priority, ties broken by
/// most recent `updated_at`, then by id for full determinism.
fn select_rule(mut candidates: Vec<TransformationRule>) -> Option<TransformationRule> {
    candidates.retain(|r| r.enabled);
    candidates.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(b.updated_at.cmp(&a.updated_at))
            .then(a.id.cmp(&b.id))
    });
    candidates.into_iter().next()
}

fn execute_transform(rule: &TransformationRule, value: &JsonValue) -> Result<JsonValue, String> {
    match rule.transform_type {
        TransformType::Direct => Ok(value.clone()),
        TransformType::FormatConversion => convert_format(&rule.transform_config, value),
        TransformType::Enrichment => enrich(&rule.transform_config, value),
        TransformType::Aggregation => aggregate(&rule.transform_config, value),
        // Validation-only rules pass the value through; the validation step
        // below does the work.
        TransformType::Validation => Ok(value.clone()),
        TransformType::Custom => custom(&rule.transform_config, value),
    }
}

/// `transform_config.format`: "lowercase" | "uppercase" | "trim" |
/// "to_string" | "to_number".
fn convert_format(config: &JsonValue, value: &JsonValue) -> Result<JsonValue, String> {
    let format = config
        .get("format")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| "format_conversion rule missing 'format'".to_string())?;
    match format {
        "lowercase" => as_str(value).map(|s| JsonValue::String(s.to_lowercase())),
        "uppercase" => as_str(value).map(|s| JsonValue::String(s.to_uppercase())),
        "trim" => as_str(value).map(|s| JsonValue::String(s.trim().to_string())),
        "to_string" => Ok(JsonValue::String(match value {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        })),
        "to_number" => match value {
            JsonValue::Number(n) => Ok(JsonValue::Number(n.clone())),
            JsonValue::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .ok_or_else(|| format!("'{s}' is not a number")),
            other => Err(format!("cannot convert {other} to a number")),
        },
        other => Err(format!("unknown format conversion '{other}'")),
    }
}

/// `transform_config.table`: object mapping source strings to enriched
/// values. Unmapped inputs fail (the default value catches them if set).
fn enrich(config: &JsonValue, value: &JsonValue) -> Result<JsonValue, String> {
    let table = config
        .get("table")
        .and_then(JsonValue::as_object)
        .ok_or_else(|| "enrichment rule missing 'table'".to_string())?;
    let key = as_str(value)?;
    table
        .get(&key)
        .cloned()
        .ok_or_else(|| format!("no enrichment entry for '{key}'"))
}

/// `transform_config.op`: "sum" | "count" | "min" | "max" | "join" applied to
/// an array value.
fn aggregate(config: &JsonValue, value: &JsonValue) -> Result<JsonValue, String> {
    let op = config
        .get("op")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| "aggregation rule missing 'op'".to_string())?;
    let items = value
        .as_array()
        .ok_or_else(|| "aggregation input must be an array".to_string())?;
    match op {
        "count" => Ok(JsonValue::from(items.len() as u64)),
        "sum" | "min" | "max" => {
            let numbers: Vec<f64> = items
                .iter()
                .map(|v| v.as_f64().ok_or_else(|| format!("non-numeric item {v}")))
                .collect::<Result<_, _>>()?;
            let result = match op {
                "sum" => numbers.iter().sum(),
                "min" => numbers.iter().copied().fold(f64::INFINITY, f64::min),
                _ => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            };
            if !result.is_finite() {
                return Err("aggregation over an empty array".to_string());
            }
            serde_json::Number::from_f64(result)
                .map(JsonValue::Number)
                .ok_or_else(|| "aggregation produced a non-finite number".to_string())
        }
        "join" => {
            let separator = config
                .get("separator")
                .and_then(JsonValue::as_str)
                .unwrap_or(",");
            let parts: Vec<String> = items
                .iter()
                .map(|v| match v {
                    JsonValue::String(s) => Ok(s.clone()),
                    other => Err(format!("non-string item {other}")),
                })
                .collect::<Result<_, _>>()?;
            Ok(JsonValue::String(parts.join(separator)))
        }
        other => Err(format!("unknown aggregation op '{other}'")),
    }
}

/// `transform_config.expression`: a named builtin. Custom logic beyond the
/// builtins is an adapter concern.
fn custom(config: &JsonValue, value: &JsonValue) -> Result<JsonValue, String> {
    let expression = config
        .get("expression")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| "custom rule missing 'expression'".to_string())?;
    match expression {
        "email_domain" => {
            let email = as_str(value)?;
            email
                .split_once('@')
                .map(|(_, domain)| JsonValue::String(domain.to_string()))
                .ok_or_else(|| format!("'{email}' has no domain part"))
        }
        "initials" => {
            let name = as_str(value)?;
            let initials: String = name
                .split_whitespace()
                .filter_map(|word| word.chars().next())
                .collect();
            if initials.is_empty() {
                return Err("empty name".to_string());
            }
            Ok(JsonValue::String(initials.to_uppercase()))
        }
        other => Err(format!("unknown custom expression '{other}'")),
    }
}

fn validate_value(rule: &TransformationRule, value: &JsonValue) -> Result<(), String> {
    let Some(ValidationRules {
        required,
        pattern,
        min_length,
        max_length,
    }) = &rule.validation_rules
    else {
        return Ok(());
    };

    if *required && value.is_null() {
        return Err("required value is null".to_string());
    }
    if value.is_null() {
        return Ok(());
    }

    let needs_string = pattern.is_some() || min_length.is_some() || max_length.is_some();
    if !needs_string {
        return Ok(());
    }
    let text = as_str(value)?;
    if let Some(min) = min_length {
        if text.chars().count() < *min {
            return Err(format!("shorter than minimum length {min}"));
        }
    }
    if let Some(max) = max_length {
        if text.chars().count() > *max {
            return Err(format!("longer than maximum length {max}"));
        }
    }
    if let Some(pattern) = pattern {
        let regex = Regex::new(pattern).map_err(|e| format!("invalid pattern: {e}"))?;
        if !regex.is_match(&text) {
            return Err(format!("does not match pattern '{pattern}'"));
        }
    }
    Ok(())
}

fn as_str(value: &JsonValue) -> Result<String, String> {
    match value {
        JsonValue::String(s) => Ok(s.clone()),
        other => Err(format!("expected a string, got {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::Stores;
    use chrono::Duration;

    fn rule(
        connector: Uuid,
        source: &str,
        target: &str,
        transform_type: TransformType,
        config: JsonValue,
    ) -> TransformationRule {
        let now = Utc::now();
        TransformationRule {
            id: Uuid::new_v4(),
            source_connector_id: connector,
            source_field: source.to_string(),
            target_field: target.to_string(),
            transform_type,
            transform_config: config,
            validation_rules: None,
            default_value: None,
            enabled: true,
            priority: 0,
            success_count: 0,
            error_count: 0,
            last_applied: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn direct_rule_copies_and_counts_success() {
        let stores = Stores::in_memory();
        let engine = TransformationEngine::new(stores.rules.clone());
        let connector = Uuid::new_v4();
        let inserted = stores
            .rules
            .insert(rule(connector, "mail", "email", TransformType::Direct, JsonValue::Null))
            .await
            .unwrap();

        let outcome = engine
            .apply(connector, "mail", &serde_json::json!("ada@example.com"))
            .await
            .unwrap();
        assert_eq!(outcome.target_field, "email");
        assert_eq!(outcome.value, serde_json::json!("ada@example.com"));

        let persisted = stores.rules.get(inserted.id).await.unwrap().unwrap();
        assert_eq!(persisted.success_count, 1);
        assert!(persisted.last_applied.is_some());
    }

    #[tokio::test]
    async fn selection_prefers_priority_then_recency() {
        let connector = Uuid::new_v4();
        let now = Utc::now();
        let mut low = rule(connector, "dept", "department", TransformType::Direct, JsonValue::Null);
        low.priority = 1;
        let mut high_old = low.clone();
        high_old.id = Uuid::new_v4();
        high_old.priority = 5;
        high_old.updated_at = now - Duration::hours(2);
        let mut high_new = low.clone();
        high_new.id = Uuid::new_v4();
        high_new.priority = 5;
        high_new.updated_at = now;

        let winner = select_rule(vec![low, high_old, high_new.clone()]).unwrap();
        assert_eq!(winner.id, high_new.id);
    }

    #[tokio::test]
    async fn validation_failure_without_default_surfaces_rule_id() {
        let stores = Stores::in_memory();
        let engine = TransformationEngine::new(stores.rules.clone());
        let connector = Uuid::new_v4();
        let mut r = rule(connector, "mail", "email", TransformType::Direct, JsonValue::Null);
        r.validation_rules = Some(ValidationRules {
            required: true,
            pattern: Some(r"^[^@]+@[^@]+$".to_string()),
            min_length: None,
            max_length: None,
        });
        let inserted = stores.rules.insert(r).await.unwrap();

        let err = engine
            .apply(connector, "mail", &serde_json::json!("not-an-email"))
            .await
            .unwrap_err();
        match err {
            EngineError::Validation { rule_id, .. } => assert_eq!(rule_id, inserted.id),
            other => panic!("expected validation error, got {other}"),
        }
        let persisted = stores.rules.get(inserted.id).await.unwrap().unwrap();
        assert_eq!(persisted.error_count, 1);
        assert_eq!(persisted.success_count, 0);
    }

    #[tokio::test]
    async fn default_value_catches_failed_enrichment() {
        let stores = Stores::in_memory();
        let engine = TransformationEngine::new(stores.rules.clone());
        let connector = Uuid::new_v4();
        let mut r = rule(
            connector,
            "office",
            "region",
            TransformType::Enrichment,
            serde_json::json!({"table": {"LON": "emea", "NYC": "amer"}}),
        );
        r.default_value = Some(serde_json::json!("unknown"));
        stores.rules.insert(r).await.unwrap();

        let hit = engine
            .apply(connector, "office", &serde_json::json!("LON"))
            .await
            .unwrap();
        assert_eq!(hit.value, serde_json::json!("emea"));
        assert!(!hit.used_default);

        let miss = engine
            .apply(connector, "office", &serde_json::json!("TYO"))
            .await
            .unwrap();
        assert_eq!(miss.value, serde_json::json!("unknown"));
        assert!(miss.used_default);
    }

    #[tokio::test]
    async fn apply_all_maps_known_fields_and_passes_through_others() {
        let stores = Stores::in_memory();
        let engine = TransformationEngine::new(stores.rules.clone());
        let connector = Uuid::new_v4();
        stores
            .rules
            .insert(rule(
                connector,
                "mail",
                "email",
                TransformType::FormatConversion,
                serde_json::json!({"format": "lowercase"}),
            ))
            .await
            .unwrap();

        let out = engine
            .apply_all(
                connector,
                &serde_json::json!({"mail": "Ada@Example.COM", "title": "Engineer"}),
            )
            .await
            .unwrap();
        assert_eq!(out["email"], "ada@example.com");
        assert_eq!(out["title"], "Engineer");
        assert!(out.get("mail").is_none());
    }

    #[test]
    fn aggregation_ops_cover_numeric_and_join() {
        let sum = aggregate(&serde_json::json!({"op": "sum"}), &serde_json::json!([1, 2, 3])).unwrap();
        assert_eq!(sum, serde_json::json!(6.0));
        let count = aggregate(&serde_json::json!({"op": "count"}), &serde_json::json!(["a", "b"])).unwrap();
        assert_eq!(count, serde_json::json!(2));
        let joined = aggregate(
            &serde_json::json!({"op": "join", "separator": ";"}),
            &serde_json::json!(["a", "b"]),
        )
        .unwrap();
        assert_eq!(joined, serde_json::json!("a;b"));
        assert!(aggregate(&serde_json::json!({"op": "min"}), &serde_json::json!([])).is_err());
    }
}
