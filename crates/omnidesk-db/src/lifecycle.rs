//! Database operations for `order_lifecycle_stages`.
//!
//! An order has at most one open stage (`exited_at IS NULL`); entering a new
//! stage closes it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{PgConnection, PgPool};

use crate::DbError;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LifecycleStageRow {
    pub id: i64,
    pub order_id: i64,
    pub stage: String,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StageStatsRow {
    pub stage: String,
    pub count: i64,
    /// Closed stages only; `None` when none have closed yet.
    pub avg_seconds: Option<f64>,
    pub min_seconds: Option<i64>,
    pub max_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StuckOrderRow {
    pub order_id: i64,
    pub order_number: String,
    pub channel: String,
    pub status: String,
    pub stage: String,
    pub entered_at: DateTime<Utc>,
    pub hours_in_stage: f64,
}

/// Closes the order's open stage and opens `stage`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if either statement fails.
pub async fn enter_stage(
    conn: &mut PgConnection,
    order_id: i64,
    stage: &str,
    metadata: &Value,
) -> Result<LifecycleStageRow, DbError> {
    sqlx::query(
        "UPDATE order_lifecycle_stages SET \
             exited_at = NOW(), \
             duration_seconds = EXTRACT(EPOCH FROM (NOW() - entered_at))::bigint \
         WHERE order_id = $1 AND exited_at IS NULL",
    )
    .bind(order_id)
    .execute(&mut *conn)
    .await?;

    let row = sqlx::query_as::<_, LifecycleStageRow>(
        "INSERT INTO order_lifecycle_stages (order_id, stage, metadata) \
         VALUES ($1, $2, $3) \
         RETURNING id, order_id, stage, entered_at, exited_at, duration_seconds, metadata",
    )
    .bind(order_id)
    .bind(stage)
    .bind(metadata)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}

/// An order's stage timeline ordered by `entered_at`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_lifecycle_stages(
    pool: &PgPool,
    order_id: i64,
) -> Result<Vec<LifecycleStageRow>, DbError> {
    let rows = sqlx::query_as::<_, LifecycleStageRow>(
        "SELECT id, order_id, stage, entered_at, exited_at, duration_seconds, metadata \
         FROM order_lifecycle_stages \
         WHERE order_id = $1 \
         ORDER BY entered_at, id",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Count and duration statistics per stage.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn lifecycle_stage_stats(pool: &PgPool) -> Result<Vec<StageStatsRow>, DbError> {
    let rows = sqlx::query_as::<_, StageStatsRow>(
        "SELECT stage, COUNT(*) AS count, \
                AVG(duration_seconds)::float8 AS avg_seconds, \
                MIN(duration_seconds) AS min_seconds, \
                MAX(duration_seconds) AS max_seconds \
         FROM order_lifecycle_stages \
         GROUP BY stage \
         ORDER BY stage",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Orders whose open stage began more than `hours` ago, excluding orders in
/// any of `settled_statuses`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_stuck_orders(
    pool: &PgPool,
    hours: i64,
    settled_statuses: &[String],
    limit: i64,
) -> Result<Vec<StuckOrderRow>, DbError> {
    let rows = sqlx::query_as::<_, StuckOrderRow>(
        "SELECT o.id AS order_id, o.order_number, o.channel, o.status, s.stage, s.entered_at, \
                (EXTRACT(EPOCH FROM (NOW() - s.entered_at)) / 3600.0)::float8 AS hours_in_stage \
         FROM order_lifecycle_stages s \
         JOIN sales_orders o ON o.id = s.order_id \
         WHERE s.exited_at IS NULL \
           AND s.entered_at < NOW() - make_interval(hours => $1::int) \
           AND o.status <> ALL($2) \
         ORDER BY s.entered_at \
         LIMIT $3",
    )
    .bind(hours)
    .bind(settled_statuses)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
