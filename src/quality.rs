//! # Quality Checker
//!
//! Runs named data-quality checks against record batches. Each execution
//! appends one [`DataQualityCheck`] row; pass/warn thresholds come from
//! configuration and critical failures are pipeline-halting.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::info;
use uuid::Uuid;

use crate::config::QualityConfig;
use crate::error::EngineError;
use crate::models::{
    CheckSeverity, CheckStatus, DataQualityCheck, QualityCheckSpec, QualityCheckType, QualityIssue,
};
use crate::repositories::QualityStore;

/// Checker over the quality-result store.
#[derive(Clone)]
pub struct QualityChecker {
    store: Arc<dyn QualityStore>,
    config: QualityConfig,
}

impl QualityChecker {
    pub fn new(store: Arc<dyn QualityStore>, config: QualityConfig) -> Self {
        Self { store, config }
    }

    /// Execute one check against a batch of records and persist the result.
    pub async fn run(
        &self,
        spec: &QualityCheckSpec,
        records: &[JsonValue],
    ) -> Result<DataQualityCheck, EngineError> {
        let mut passed: u64 = 0;
        let mut issues: HashMap<(String, String), u64> = HashMap::new();

        for record in records {
            let mut record_ok = true;
            for rule in &spec.rules {
                if let Some(code) = evaluate_rule(spec.check_type, rule, record, records) {
                    record_ok = false;
                    *issues.entry((rule.field.clone(), code)).or_insert(0) += 1;
                }
            }
            if record_ok {
                passed += 1;
            }
        }

        let checked = records.len() as u64;
        let failed = checked - passed;
        let score = if checked == 0 {
            1.0
        } else {
            passed as f64 / checked as f64
        };
        let status = if score >= self.config.pass_threshold {
            CheckStatus::Passed
        } else if score >= self.config.warn_threshold {
            CheckStatus::Warning
        } else {
            CheckStatus::Failed
        };

        let mut issues: Vec<QualityIssue> = issues
            .into_iter()
            .map(|((field, code), count)| QualityIssue { field, code, count })
            .collect();
        issues.sort_by(|a, b| a.field.cmp(&b.field).then(a.code.cmp(&b.code)));

        let result = DataQualityCheck {
            id: Uuid::new_v4(),
            name: spec.name.clone(),
            check_type: spec.check_type,
            data_source: spec.data_source.clone(),
            field: spec.rules.first().map(|r| r.field.clone()),
            status,
            score,
            records_checked: checked,
            records_passed: passed,
            records_failed: failed,
            issues,
            severity: spec.severity,
            executed_at: Utc::now(),
        };
        info!(
            check = %result.name,
            status = %result.status,
            score = result.score,
            checked,
            "quality check executed"
        );
        Ok(self.store.append(result).await?)
    }

    /// Whether a given result must halt the pipeline. Only critical-severity
    /// hard failures do.
    pub fn is_blocking(&self, result: &DataQualityCheck) -> bool {
        result.status == CheckStatus::Failed && result.severity >= CheckSeverity::Critical
    }
}

/// Evaluate one rule against one record. Returns an issue code on failure.
fn evaluate_rule(
    check_type: QualityCheckType,
    rule: &crate::models::QualityRule,
    record: &JsonValue,
    batch: &[JsonValue],
) -> Option<String> {
    let value = lookup(record, &rule.field);
    match check_type {
        QualityCheckType::Completeness => {
            if value.is_none_or(JsonValue::is_null) {
                return Some("missing".to_string());
            }
            None
        }
        QualityCheckType::Validity => {
            let value = value?;
            let pattern = rule.params.get("pattern").and_then(JsonValue::as_str)?;
            let text = value.as_str()?;
            let regex = Regex::new(pattern).ok()?;
            if !regex.is_match(text) {
                return Some("pattern_mismatch".to_string());
            }
            None
        }
        QualityCheckType::Accuracy => {
            let value = value?.as_f64()?;
            let min = rule.params.get("min").and_then(JsonValue::as_f64);
            let max = rule.params.get("max").and_then(JsonValue::as_f64);
            if min.is_some_and(|m| value < m) || max.is_some_and(|m| value > m) {
                return Some("out_of_range".to_string());
            }
            None
        }
        QualityCheckType::Consistency => {
            // Two fields must agree: params.equals names the other field.
            let other_field = rule.params.get("equals").and_then(JsonValue::as_str)?;
            if lookup(record, &rule.field) != lookup(record, other_field) {
                return Some("inconsistent".to_string());
            }
            None
        }
        QualityCheckType::Uniqueness => {
            let value = value?;
            let occurrences = batch
                .iter()
                .filter(|r| lookup(r, &rule.field) == Some(value))
                .count();
            if occurrences > 1 {
                return Some("duplicate".to_string());
            }
            None
        }
        QualityCheckType::Timeliness => {
            let value = value?.as_str()?;
            let max_age_seconds = rule
                .params
                .get("max_age_seconds")
                .and_then(JsonValue::as_i64)?;
            let timestamp = chrono::DateTime::parse_from_rfc3339(value).ok()?;
            let age = Utc::now().signed_duration_since(timestamp.with_timezone(&Utc));
            if age.num_seconds() > max_age_seconds {
                return Some("stale".to_string());
            }
            None
        }
    }
}

/// Dotted-path lookup into a JSON record.
fn lookup<'a>(record: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = record;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QualityRule;
    use crate::repositories::Stores;

    fn checker(stores: &Stores) -> QualityChecker {
        QualityChecker::new(stores.quality.clone(), QualityConfig::default())
    }

    fn spec(check_type: QualityCheckType, rules: Vec<QualityRule>) -> QualityCheckSpec {
        QualityCheckSpec {
            name: "users-batch".to_string(),
            check_type,
            data_source: "okta-prod".to_string(),
            rules,
            severity: CheckSeverity::Medium,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn completeness_counts_missing_fields() {
        let stores = Stores::in_memory();
        let checker = checker(&stores);
        let records = vec![
            serde_json::json!({"email": "a@example.com"}),
            serde_json::json!({"email": null}),
            serde_json::json!({"name": "no email"}),
            serde_json::json!({"email": "b@example.com"}),
        ];
        let spec = spec(
            QualityCheckType::Completeness,
            vec![QualityRule {
                field: "email".to_string(),
                params: JsonValue::Null,
            }],
        );

        let result = checker.run(&spec, &records).await.unwrap();
        assert_eq!(result.records_checked, 4);
        assert_eq!(result.records_passed, 2);
        assert_eq!(result.records_failed, 2);
        assert!((result.score - 0.5).abs() < 1e-9);
        assert_eq!(result.status, CheckStatus::Failed);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].code, "missing");
        assert_eq!(result.issues[0].count, 2);

        // Result row was appended.
        let history = stores.quality.list_by_name("users-batch").await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn uniqueness_flags_duplicates_within_the_batch() {
        let stores = Stores::in_memory();
        let checker = checker(&stores);
        let records = vec![
            serde_json::json!({"id": "a"}),
            serde_json::json!({"id": "a"}),
            serde_json::json!({"id": "b"}),
        ];
        let spec = spec(
            QualityCheckType::Uniqueness,
            vec![QualityRule {
                field: "id".to_string(),
                params: JsonValue::Null,
            }],
        );

        let result = checker.run(&spec, &records).await.unwrap();
        assert_eq!(result.records_failed, 2);
        assert_eq!(result.issues[0].code, "duplicate");
    }

    #[tokio::test]
    async fn warning_band_sits_between_thresholds() {
        let stores = Stores::in_memory();
        let checker = QualityChecker::new(
            stores.quality.clone(),
            QualityConfig {
                pass_threshold: 0.95,
                warn_threshold: 0.8,
            },
        );
        // 9 of 10 pass: score 0.9 lands in the warning band.
        let mut records: Vec<JsonValue> =
            (0..9).map(|i| serde_json::json!({"email": format!("u{i}@x.com")})).collect();
        records.push(serde_json::json!({}));
        let spec = spec(
            QualityCheckType::Completeness,
            vec![QualityRule {
                field: "email".to_string(),
                params: JsonValue::Null,
            }],
        );

        let result = checker.run(&spec, &records).await.unwrap();
        assert_eq!(result.status, CheckStatus::Warning);
    }

    #[tokio::test]
    async fn only_critical_failures_block() {
        let stores = Stores::in_memory();
        let checker = checker(&stores);
        let rule = vec![QualityRule {
            field: "email".to_string(),
            params: JsonValue::Null,
        }];
        let records = vec![serde_json::json!({})];

        let mut critical = spec(QualityCheckType::Completeness, rule.clone());
        critical.severity = CheckSeverity::Critical;
        let result = checker.run(&critical, &records).await.unwrap();
        assert!(checker.is_blocking(&result));

        let low = spec(QualityCheckType::Completeness, rule);
        let result = checker.run(&low, &records).await.unwrap();
        assert!(!checker.is_blocking(&result));
    }

    #[tokio::test]
    async fn empty_batch_passes_vacuously() {
        let stores = Stores::in_memory();
        let checker = checker(&stores);
        let spec = spec(QualityCheckType::Completeness, Vec::new());
        let result = checker.run(&spec, &[]).await.unwrap();
        assert_eq!(result.status, CheckStatus::Passed);
        assert!((result.score - 1.0).abs() < f64::EPSILON);
    }
}
