//! Database operations for `sales_processing_queue`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;

use crate::DbError;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SalesQueueRow {
    pub id: i64,
    pub channel: String,
    pub external_order_id: String,
    pub payload: Value,
    /// `pending`, `processing`, `processed`, or `failed`.
    pub status: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub order_id: Option<i64>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const QUEUE_COLUMNS: &str = "id, channel, external_order_id, payload, status, retry_count, \
                             max_retries, next_attempt_at, last_error, order_id, processed_at, \
                             created_at, updated_at";

/// Enqueues a raw channel order.
///
/// Re-ingesting the same `(channel, external_order_id)` replaces the payload
/// and resets the row to `pending` with a fresh retry budget.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn enqueue_sale(
    pool: &PgPool,
    channel: &str,
    external_order_id: &str,
    payload: &Value,
    max_retries: i32,
) -> Result<SalesQueueRow, DbError> {
    let row = sqlx::query_as::<_, SalesQueueRow>(&format!(
        "INSERT INTO sales_processing_queue (channel, external_order_id, payload, max_retries) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (channel, external_order_id) DO UPDATE SET \
             payload         = EXCLUDED.payload, \
             status          = 'pending', \
             retry_count     = 0, \
             max_retries     = EXCLUDED.max_retries, \
             next_attempt_at = NOW(), \
             last_error      = NULL, \
             updated_at      = NOW() \
         RETURNING {QUEUE_COLUMNS}"
    ))
    .bind(channel)
    .bind(external_order_id)
    .bind(payload)
    .bind(max_retries)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Lists queue rows, newest first, optionally filtered by status.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_sales_queue(
    pool: &PgPool,
    status: Option<&str>,
    limit: i64,
) -> Result<Vec<SalesQueueRow>, DbError> {
    let rows = sqlx::query_as::<_, SalesQueueRow>(&format!(
        "SELECT {QUEUE_COLUMNS} FROM sales_processing_queue \
         WHERE ($1::text IS NULL OR status = $1) \
         ORDER BY created_at DESC, id DESC \
         LIMIT $2"
    ))
    .bind(status)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Claims up to `batch_size` due `pending` rows, moving them to `processing`.
///
/// `FOR UPDATE SKIP LOCKED` lets concurrent workers claim disjoint batches.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn claim_due_sales(pool: &PgPool, batch_size: i64) -> Result<Vec<SalesQueueRow>, DbError> {
    let rows = sqlx::query_as::<_, SalesQueueRow>(&format!(
        "UPDATE sales_processing_queue SET status = 'processing', updated_at = NOW() \
         WHERE id IN ( \
             SELECT id FROM sales_processing_queue \
             WHERE status = 'pending' AND next_attempt_at <= NOW() \
             ORDER BY next_attempt_at, id \
             LIMIT $1 \
             FOR UPDATE SKIP LOCKED \
         ) \
         RETURNING {QUEUE_COLUMNS}"
    ))
    .bind(batch_size)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Returns rows stuck in `processing` since before `claimed_before` to the
/// queue. Each expiry counts as an attempt; a row out of retries is parked
/// as `failed`. Returns the number of rows touched.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn requeue_expired_sales(
    pool: &PgPool,
    claimed_before: DateTime<Utc>,
) -> Result<u64, DbError> {
    let affected = sqlx::query(
        "UPDATE sales_processing_queue SET \
             status          = CASE WHEN retry_count + 1 >= max_retries \
                                    THEN 'failed' ELSE 'pending' END, \
             retry_count     = retry_count + 1, \
             next_attempt_at = NOW(), \
             last_error      = 'claim expired before the row was settled', \
             updated_at      = NOW() \
         WHERE status = 'processing' AND updated_at < $1",
    )
    .bind(claimed_before)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected)
}

/// Marks a claimed row `processed` and links the order it produced.
///
/// Returns `false` when the row is no longer `processing` (re-enqueued or
/// reclaimed while the worker ran) and nothing was written.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn mark_sale_processed(pool: &PgPool, id: i64, order_id: i64) -> Result<bool, DbError> {
    let affected = sqlx::query(
        "UPDATE sales_processing_queue SET \
             status = 'processed', order_id = $2, processed_at = NOW(), \
             last_error = NULL, updated_at = NOW() \
         WHERE id = $1 AND status = 'processing'",
    )
    .bind(id)
    .bind(order_id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected > 0)
}

/// Puts a claimed row back to `pending`, due at `next_attempt_at`.
///
/// Returns `false` when the row is no longer `processing`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn reschedule_sale(
    pool: &PgPool,
    id: i64,
    retry_count: i32,
    next_attempt_at: DateTime<Utc>,
    error: &str,
) -> Result<bool, DbError> {
    let affected = sqlx::query(
        "UPDATE sales_processing_queue SET \
             status = 'pending', retry_count = $2, next_attempt_at = $3, \
             last_error = $4, updated_at = NOW() \
         WHERE id = $1 AND status = 'processing'",
    )
    .bind(id)
    .bind(retry_count)
    .bind(next_attempt_at)
    .bind(error)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected > 0)
}

/// Parks a claimed row as permanently `failed`.
///
/// Returns `false` when the row is no longer `processing`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn fail_sale(
    pool: &PgPool,
    id: i64,
    retry_count: i32,
    error: &str,
) -> Result<bool, DbError> {
    let affected = sqlx::query(
        "UPDATE sales_processing_queue SET \
             status = 'failed', retry_count = $2, last_error = $3, updated_at = NOW() \
         WHERE id = $1 AND status = 'processing'",
    )
    .bind(id)
    .bind(retry_count)
    .bind(error)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected > 0)
}
