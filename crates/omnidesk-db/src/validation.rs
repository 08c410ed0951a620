//! Database operations for `validation_rules`, `data_quality_issues`, and
//! `data_quality_runs`, plus the structural checks the quality monitor runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

use omnidesk_core::{CoreError, ValidationRule};

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ValidationRuleRow {
    pub id: i64,
    pub name: String,
    /// `product` or `order`.
    pub entity: String,
    pub field: String,
    pub rule_type: String,
    pub params: Value,
    pub severity: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ValidationRuleRow {
    /// Converts the stored row into an evaluable rule.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidRule`] if the stored type or severity is
    /// not recognized.
    pub fn to_rule(&self) -> Result<ValidationRule, CoreError> {
        Ok(ValidationRule {
            name: self.name.clone(),
            field: self.field.clone(),
            rule_type: self.rule_type.parse()?,
            params: self.params.clone(),
            severity: self.severity.parse()?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewValidationRule {
    pub name: String,
    pub entity: String,
    pub field: String,
    pub rule_type: String,
    #[serde(default)]
    pub params: Value,
    pub severity: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QualityIssueRow {
    pub id: i64,
    pub entity: String,
    pub entity_id: Option<i64>,
    pub check_name: String,
    pub severity: String,
    pub message: String,
    pub is_resolved: bool,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIssue {
    pub entity: String,
    pub entity_id: Option<i64>,
    pub check_name: String,
    pub severity: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct QualityRunRow {
    pub id: i64,
    pub records_checked: i64,
    pub issues_found: i64,
    pub ran_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct IssueCountRow {
    pub severity: String,
    pub check_name: String,
    pub count: i64,
}

/// A product or order serialized to JSON for rule evaluation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntityRecordRow {
    pub id: i64,
    pub record: Value,
}

/// One finding from [`structural_checks`].
pub type StructuralFinding = NewIssue;

const RULE_COLUMNS: &str =
    "id, name, entity, field, rule_type, params, severity, is_active, created_at";

const ISSUE_COLUMNS: &str = "id, entity, entity_id, check_name, severity, message, is_resolved, \
                             detected_at, resolved_at";

// ---------------------------------------------------------------------------
// validation_rules operations
// ---------------------------------------------------------------------------

/// Inserts a rule.
///
/// # Errors
///
/// Returns [`DbError::Conflict`] if the name is taken, or [`DbError::Sqlx`].
pub async fn create_validation_rule(
    pool: &PgPool,
    rule: &NewValidationRule,
) -> Result<ValidationRuleRow, DbError> {
    sqlx::query_as::<_, ValidationRuleRow>(&format!(
        "INSERT INTO validation_rules (name, entity, field, rule_type, params, severity, is_active) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING {RULE_COLUMNS}"
    ))
    .bind(&rule.name)
    .bind(&rule.entity)
    .bind(&rule.field)
    .bind(&rule.rule_type)
    .bind(&rule.params)
    .bind(&rule.severity)
    .bind(rule.is_active)
    .fetch_one(pool)
    .await
    .map_err(|e| DbError::unique_or(e, format!("validation rule '{}' already exists", rule.name)))
}

/// Replaces a rule's definition.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if absent, [`DbError::Conflict`] on a name
/// clash, or [`DbError::Sqlx`].
pub async fn update_validation_rule(
    pool: &PgPool,
    id: i64,
    rule: &NewValidationRule,
) -> Result<ValidationRuleRow, DbError> {
    sqlx::query_as::<_, ValidationRuleRow>(&format!(
        "UPDATE validation_rules SET \
             name = $2, entity = $3, field = $4, rule_type = $5, params = $6, \
             severity = $7, is_active = $8 \
         WHERE id = $1 \
         RETURNING {RULE_COLUMNS}"
    ))
    .bind(id)
    .bind(&rule.name)
    .bind(&rule.entity)
    .bind(&rule.field)
    .bind(&rule.rule_type)
    .bind(&rule.params)
    .bind(&rule.severity)
    .bind(rule.is_active)
    .fetch_optional(pool)
    .await
    .map_err(|e| DbError::unique_or(e, format!("validation rule '{}' already exists", rule.name)))?
    .ok_or(DbError::NotFound)
}

/// Lists every rule ordered by entity then name.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_validation_rules(pool: &PgPool) -> Result<Vec<ValidationRuleRow>, DbError> {
    let rows = sqlx::query_as::<_, ValidationRuleRow>(&format!(
        "SELECT {RULE_COLUMNS} FROM validation_rules ORDER BY entity, name"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Active rules for one entity.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_active_validation_rules(
    pool: &PgPool,
    entity: &str,
) -> Result<Vec<ValidationRuleRow>, DbError> {
    let rows = sqlx::query_as::<_, ValidationRuleRow>(&format!(
        "SELECT {RULE_COLUMNS} FROM validation_rules \
         WHERE is_active AND entity = $1 \
         ORDER BY name"
    ))
    .bind(entity)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Records under check
// ---------------------------------------------------------------------------

/// Every non-archived product as a JSON object keyed by column name.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn product_records(pool: &PgPool) -> Result<Vec<EntityRecordRow>, DbError> {
    let rows = sqlx::query_as::<_, EntityRecordRow>(
        "SELECT p.id, to_jsonb(p) AS record FROM products p \
         WHERE p.status <> 'archived' ORDER BY p.id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Every order as a JSON object keyed by column name.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn order_records(pool: &PgPool) -> Result<Vec<EntityRecordRow>, DbError> {
    let rows = sqlx::query_as::<_, EntityRecordRow>(
        "SELECT o.id, to_jsonb(o) AS record FROM sales_orders o ORDER BY o.id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Cross-table consistency checks that no single-field rule can express.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any query fails.
pub async fn structural_checks(pool: &PgPool) -> Result<Vec<StructuralFinding>, DbError> {
    let mut findings = Vec::new();

    let empty_orders = sqlx::query_as::<_, (i64, String)>(
        "SELECT o.id, o.order_number FROM sales_orders o \
         WHERE NOT EXISTS (SELECT 1 FROM order_items i WHERE i.order_id = o.id) \
         ORDER BY o.id",
    )
    .fetch_all(pool)
    .await?;
    findings.extend(empty_orders.into_iter().map(|(id, number)| NewIssue {
        entity: "order".to_string(),
        entity_id: Some(id),
        check_name: "order_without_items".to_string(),
        severity: "error".to_string(),
        message: format!("order {number} has no line items"),
    }));

    let oversold = sqlx::query_as::<_, (i64, String, String, i32)>(
        "SELECT p.id, p.sku, i.location, i.quantity - i.reserved \
         FROM inventory i JOIN products p ON p.id = i.product_id \
         WHERE i.quantity - i.reserved < 0 \
         ORDER BY p.id, i.location",
    )
    .fetch_all(pool)
    .await?;
    findings.extend(oversold.into_iter().map(|(id, sku, location, available)| NewIssue {
        entity: "product".to_string(),
        entity_id: Some(id),
        check_name: "negative_available_inventory".to_string(),
        severity: "error".to_string(),
        message: format!("{sku} has {available} available at {location}"),
    }));

    let unlisted = sqlx::query_as::<_, (i64, String)>(
        "SELECT p.id, p.sku FROM products p \
         WHERE p.status = 'active' \
           AND NOT EXISTS (SELECT 1 FROM channel_products cp WHERE cp.product_id = p.id) \
         ORDER BY p.id",
    )
    .fetch_all(pool)
    .await?;
    findings.extend(unlisted.into_iter().map(|(id, sku)| NewIssue {
        entity: "product".to_string(),
        entity_id: Some(id),
        check_name: "product_without_listing".to_string(),
        severity: "warning".to_string(),
        message: format!("{sku} is not listed on any channel"),
    }));

    let duplicates = sqlx::query_as::<_, (String, i64)>(
        "SELECT channel_sku, COUNT(DISTINCT product_id) \
         FROM channel_products \
         WHERE channel_sku IS NOT NULL \
         GROUP BY channel_sku \
         HAVING COUNT(DISTINCT product_id) > 1 \
         ORDER BY channel_sku",
    )
    .fetch_all(pool)
    .await?;
    findings.extend(duplicates.into_iter().map(|(sku, products)| NewIssue {
        entity: "product".to_string(),
        entity_id: None,
        check_name: "duplicate_channel_sku".to_string(),
        severity: "error".to_string(),
        message: format!("channel SKU {sku} maps to {products} different products"),
    }));

    Ok(findings)
}

// ---------------------------------------------------------------------------
// data_quality_issues / data_quality_runs operations
// ---------------------------------------------------------------------------

/// Replaces the open issue set with `issues` and records the run, atomically.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails.
pub async fn replace_open_issues(
    pool: &PgPool,
    issues: &[NewIssue],
    records_checked: i64,
) -> Result<QualityRunRow, DbError> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM data_quality_issues WHERE NOT is_resolved")
        .execute(&mut *tx)
        .await?;

    for issue in issues {
        sqlx::query(
            "INSERT INTO data_quality_issues (entity, entity_id, check_name, severity, message) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&issue.entity)
        .bind(issue.entity_id)
        .bind(&issue.check_name)
        .bind(&issue.severity)
        .bind(&issue.message)
        .execute(&mut *tx)
        .await?;
    }

    let run = record_quality_run(&mut *tx, records_checked, issues.len()).await?;
    tx.commit().await?;
    Ok(run)
}

/// Records one monitor run.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn record_quality_run<'e, E: sqlx::PgExecutor<'e>>(
    executor: E,
    records_checked: i64,
    issues_found: usize,
) -> Result<QualityRunRow, DbError> {
    let row = sqlx::query_as::<_, QualityRunRow>(
        "INSERT INTO data_quality_runs (records_checked, issues_found) \
         VALUES ($1, $2) \
         RETURNING id, records_checked, issues_found, ran_at",
    )
    .bind(records_checked)
    .bind(i64::try_from(issues_found).unwrap_or(i64::MAX))
    .fetch_one(executor)
    .await?;
    Ok(row)
}

/// The most recent monitor run, if any.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn latest_quality_run(pool: &PgPool) -> Result<Option<QualityRunRow>, DbError> {
    let row = sqlx::query_as::<_, QualityRunRow>(
        "SELECT id, records_checked, issues_found, ran_at FROM data_quality_runs \
         ORDER BY ran_at DESC, id DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Lists issues, newest first. Resolved issues are included only on request.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_issues(
    pool: &PgPool,
    severity: Option<&str>,
    entity: Option<&str>,
    include_resolved: bool,
    limit: i64,
) -> Result<Vec<QualityIssueRow>, DbError> {
    let rows = sqlx::query_as::<_, QualityIssueRow>(&format!(
        "SELECT {ISSUE_COLUMNS} FROM data_quality_issues \
         WHERE ($1::text IS NULL OR severity = $1) \
           AND ($2::text IS NULL OR entity = $2) \
           AND ($3 OR NOT is_resolved) \
         ORDER BY detected_at DESC, id DESC \
         LIMIT $4"
    ))
    .bind(severity)
    .bind(entity)
    .bind(include_resolved)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Marks an issue resolved.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if absent, or [`DbError::Sqlx`].
pub async fn resolve_issue(pool: &PgPool, id: i64) -> Result<QualityIssueRow, DbError> {
    sqlx::query_as::<_, QualityIssueRow>(&format!(
        "UPDATE data_quality_issues SET \
             is_resolved = TRUE, resolved_at = COALESCE(resolved_at, NOW()) \
         WHERE id = $1 \
         RETURNING {ISSUE_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Open issue counts grouped by severity and check.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn open_issue_counts(pool: &PgPool) -> Result<Vec<IssueCountRow>, DbError> {
    let rows = sqlx::query_as::<_, IssueCountRow>(
        "SELECT severity, check_name, COUNT(*) AS count \
         FROM data_quality_issues \
         WHERE NOT is_resolved \
         GROUP BY severity, check_name \
         ORDER BY severity, check_name",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
