//! Database operations for `workflow_rules`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;

use crate::DbError;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WorkflowRuleRow {
    pub id: i64,
    pub name: String,
    pub from_status: String,
    pub to_status: String,
    pub conditions: Value,
    pub actions: Value,
    pub priority: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A rule as submitted by a user; validated by the caller before storage.
#[derive(Debug, Clone)]
pub struct NewWorkflowRule {
    pub name: String,
    pub from_status: String,
    pub to_status: String,
    pub conditions: Value,
    pub actions: Value,
    pub priority: i32,
    pub is_active: bool,
}

const RULE_COLUMNS: &str = "id, name, from_status, to_status, conditions, actions, priority, \
                            is_active, created_at, updated_at";

/// Inserts a rule.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_workflow_rule(
    pool: &PgPool,
    rule: &NewWorkflowRule,
) -> Result<WorkflowRuleRow, DbError> {
    let row = sqlx::query_as::<_, WorkflowRuleRow>(&format!(
        "INSERT INTO workflow_rules \
             (name, from_status, to_status, conditions, actions, priority, is_active) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING {RULE_COLUMNS}"
    ))
    .bind(&rule.name)
    .bind(&rule.from_status)
    .bind(&rule.to_status)
    .bind(&rule.conditions)
    .bind(&rule.actions)
    .bind(rule.priority)
    .bind(rule.is_active)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Replaces a rule's definition.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if absent, or [`DbError::Sqlx`].
pub async fn update_workflow_rule(
    pool: &PgPool,
    id: i64,
    rule: &NewWorkflowRule,
) -> Result<WorkflowRuleRow, DbError> {
    sqlx::query_as::<_, WorkflowRuleRow>(&format!(
        "UPDATE workflow_rules SET \
             name = $2, from_status = $3, to_status = $4, conditions = $5, actions = $6, \
             priority = $7, is_active = $8, updated_at = NOW() \
         WHERE id = $1 \
         RETURNING {RULE_COLUMNS}"
    ))
    .bind(id)
    .bind(&rule.name)
    .bind(&rule.from_status)
    .bind(&rule.to_status)
    .bind(&rule.conditions)
    .bind(&rule.actions)
    .bind(rule.priority)
    .bind(rule.is_active)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Soft-deletes a rule by deactivating it.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if absent, or [`DbError::Sqlx`].
pub async fn deactivate_workflow_rule(pool: &PgPool, id: i64) -> Result<WorkflowRuleRow, DbError> {
    sqlx::query_as::<_, WorkflowRuleRow>(&format!(
        "UPDATE workflow_rules SET is_active = FALSE, updated_at = NOW() \
         WHERE id = $1 \
         RETURNING {RULE_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Fetches one rule.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if absent, or [`DbError::Sqlx`].
pub async fn get_workflow_rule(pool: &PgPool, id: i64) -> Result<WorkflowRuleRow, DbError> {
    sqlx::query_as::<_, WorkflowRuleRow>(&format!(
        "SELECT {RULE_COLUMNS} FROM workflow_rules WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Lists rules, highest priority first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_workflow_rules(
    pool: &PgPool,
    include_inactive: bool,
) -> Result<Vec<WorkflowRuleRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowRuleRow>(&format!(
        "SELECT {RULE_COLUMNS} FROM workflow_rules \
         WHERE $1 OR is_active \
         ORDER BY priority DESC, id"
    ))
    .bind(include_inactive)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Active rules that start from `from_status`, in evaluation order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn active_rules_from_status(
    pool: &PgPool,
    from_status: &str,
) -> Result<Vec<WorkflowRuleRow>, DbError> {
    let rows = sqlx::query_as::<_, WorkflowRuleRow>(&format!(
        "SELECT {RULE_COLUMNS} FROM workflow_rules \
         WHERE is_active AND from_status = $1 \
         ORDER BY priority DESC, id"
    ))
    .bind(from_status)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
