//! Data quality monitor: validation rules over every stored product and
//! order, plus the structural checks, summarized as a score.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;

use omnidesk_core::{evaluate_all, Severity, ValidationRule, Violation};
use omnidesk_db::{EntityRecordRow, NewIssue, NewValidationRule, QualityRunRow};

use super::ServiceError;

pub const ENTITIES: [&str; 2] = ["product", "order"];

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub run: QualityRunRow,
    pub by_severity: BTreeMap<String, usize>,
    pub by_check: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityScore {
    pub score: f64,
    pub open_errors: i64,
    pub open_warnings: i64,
    pub records_checked: i64,
}

/// `100 * (1 - open_errors / max(records_checked, 1))`, clamped to
/// `[0, 100]` and rounded to two decimals.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn quality_score(open_errors: i64, records_checked: i64) -> f64 {
    let denominator = records_checked.max(1) as f64;
    let raw = 100.0 * (1.0 - open_errors.max(0) as f64 / denominator);
    (raw.clamp(0.0, 100.0) * 100.0).round() / 100.0
}

fn check_entity(entity: &str) -> Result<(), ServiceError> {
    if ENTITIES.contains(&entity) {
        Ok(())
    } else {
        Err(ServiceError::Validation(format!(
            "entity must be 'product' or 'order', got '{entity}'"
        )))
    }
}

/// Rejects a rule definition that could never evaluate: unknown entity,
/// type or severity, or params that do not fit the type.
///
/// # Errors
///
/// Returns [`ServiceError::Validation`] describing the first problem found.
pub fn validate_rule_definition(rule: &NewValidationRule) -> Result<(), ServiceError> {
    let invalid = |e: omnidesk_core::CoreError| ServiceError::Validation(e.to_string());
    if rule.name.trim().is_empty() {
        return Err(ServiceError::Validation("name must not be empty".to_string()));
    }
    if rule.field.trim().is_empty() {
        return Err(ServiceError::Validation("field must not be empty".to_string()));
    }
    check_entity(&rule.entity)?;
    let parsed = ValidationRule {
        name: rule.name.clone(),
        field: rule.field.clone(),
        rule_type: rule.rule_type.parse().map_err(invalid)?,
        params: rule.params.clone(),
        severity: rule.severity.parse().map_err(invalid)?,
    };
    parsed.check_params().map_err(invalid)
}

async fn active_rules(pool: &PgPool, entity: &str) -> Result<Vec<ValidationRule>, ServiceError> {
    let rows = omnidesk_db::list_active_validation_rules(pool, entity).await?;
    Ok(rows
        .iter()
        .filter_map(|row| match row.to_rule() {
            Ok(rule) => Some(rule),
            Err(e) => {
                tracing::warn!(rule_id = row.id, error = %e, "quality: skipping unusable rule");
                None
            }
        })
        .collect())
}

/// Checks one ad-hoc record against the active rules for `entity`.
///
/// # Errors
///
/// Returns [`ServiceError::Validation`] for an unknown entity.
pub async fn validate_record(
    pool: &PgPool,
    entity: &str,
    record: &Value,
) -> Result<Vec<Violation>, ServiceError> {
    check_entity(entity)?;
    let rules = active_rules(pool, entity).await?;
    Ok(evaluate_all(&rules, record))
}

fn rule_issues(entity: &str, rules: &[ValidationRule], records: &[EntityRecordRow]) -> Vec<NewIssue> {
    records
        .iter()
        .flat_map(|row| {
            evaluate_all(rules, &row.record)
                .into_iter()
                .map(move |violation| NewIssue {
                    entity: entity.to_string(),
                    entity_id: Some(row.id),
                    check_name: violation.rule,
                    severity: violation.severity.as_str().to_string(),
                    message: violation.message,
                })
        })
        .collect()
}

/// Runs every check, replaces the open issue set, and returns the counts.
///
/// # Errors
///
/// Returns [`ServiceError::Db`] if any query fails.
pub async fn run_quality_check(pool: &PgPool) -> Result<QualityReport, ServiceError> {
    let products = omnidesk_db::product_records(pool).await?;
    let orders = omnidesk_db::order_records(pool).await?;

    let mut issues = rule_issues("product", &active_rules(pool, "product").await?, &products);
    issues.extend(rule_issues("order", &active_rules(pool, "order").await?, &orders));
    issues.extend(omnidesk_db::structural_checks(pool).await?);

    let records_checked = i64::try_from(products.len() + orders.len()).unwrap_or(i64::MAX);

    let mut by_severity = BTreeMap::new();
    let mut by_check = BTreeMap::new();
    for issue in &issues {
        *by_severity.entry(issue.severity.clone()).or_insert(0) += 1;
        *by_check.entry(issue.check_name.clone()).or_insert(0) += 1;
    }

    let run = omnidesk_db::replace_open_issues(pool, &issues, records_checked).await?;
    tracing::info!(
        records_checked,
        issues = issues.len(),
        "quality: check complete"
    );

    Ok(QualityReport {
        run,
        by_severity,
        by_check,
    })
}

/// Scores the currently open issues against the last run's record count.
///
/// # Errors
///
/// Returns [`ServiceError::Db`] if a query fails.
pub async fn current_score(pool: &PgPool) -> Result<QualityScore, ServiceError> {
    let records_checked = omnidesk_db::latest_quality_run(pool)
        .await?
        .map_or(0, |run| run.records_checked);
    let counts = omnidesk_db::open_issue_counts(pool).await?;

    let count_of = |severity: Severity| -> i64 {
        counts
            .iter()
            .filter(|row| row.severity == severity.as_str())
            .map(|row| row.count)
            .sum()
    };
    let open_errors = count_of(Severity::Error);

    Ok(QualityScore {
        score: quality_score(open_errors, records_checked),
        open_errors,
        open_warnings: count_of(Severity::Warning),
        records_checked,
    })
}
