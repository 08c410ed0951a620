//! Database operations for `sync_jobs`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;

use crate::{DbError, StatusCountRow};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SyncJobRow {
    pub id: i64,
    pub channel: String,
    /// `products`, `orders`, or `inventory`.
    pub data_type: String,
    /// `pull` or `push`.
    pub direction: String,
    /// `pending`, `running`, `completed`, or `failed`.
    pub status: String,
    pub payload: Value,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub result: Option<Value>,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

const JOB_COLUMNS: &str = "id, channel, data_type, direction, status, payload, retry_count, \
                           max_retries, next_attempt_at, result, last_error, started_at, \
                           completed_at, created_at";

/// Inserts a `pending` job due immediately.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails (including an unknown
/// channel, which violates the foreign key).
pub async fn create_sync_job(
    pool: &PgPool,
    channel: &str,
    data_type: &str,
    direction: &str,
    payload: &Value,
    max_retries: i32,
) -> Result<SyncJobRow, DbError> {
    let row = sqlx::query_as::<_, SyncJobRow>(&format!(
        "INSERT INTO sync_jobs (channel, data_type, direction, payload, max_retries) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(channel)
    .bind(data_type)
    .bind(direction)
    .bind(payload)
    .bind(max_retries)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Lists jobs, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_sync_jobs(
    pool: &PgPool,
    status: Option<&str>,
    channel: Option<&str>,
    limit: i64,
) -> Result<Vec<SyncJobRow>, DbError> {
    let rows = sqlx::query_as::<_, SyncJobRow>(&format!(
        "SELECT {JOB_COLUMNS} FROM sync_jobs \
         WHERE ($1::text IS NULL OR status = $1) \
           AND ($2::text IS NULL OR channel = $2) \
         ORDER BY created_at DESC, id DESC \
         LIMIT $3"
    ))
    .bind(status)
    .bind(channel)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Fetches one job.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if absent, or [`DbError::Sqlx`].
pub async fn get_sync_job(pool: &PgPool, id: i64) -> Result<SyncJobRow, DbError> {
    sqlx::query_as::<_, SyncJobRow>(&format!("SELECT {JOB_COLUMNS} FROM sync_jobs WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Re-queues a `failed` job with a reset retry count.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if absent, [`DbError::StaleStatus`] if the
/// job is not `failed`, or [`DbError::Sqlx`].
pub async fn retry_sync_job(pool: &PgPool, id: i64) -> Result<SyncJobRow, DbError> {
    let row = sqlx::query_as::<_, SyncJobRow>(&format!(
        "UPDATE sync_jobs SET \
             status = 'pending', retry_count = 0, next_attempt_at = NOW(), \
             last_error = NULL, started_at = NULL, completed_at = NULL \
         WHERE id = $1 AND status = 'failed' \
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(row),
        None => {
            get_sync_job(pool, id).await?;
            Err(DbError::StaleStatus {
                entity: "sync job",
                id,
                expected_status: "failed".to_string(),
            })
        }
    }
}

/// Claims up to `batch_size` due `pending` jobs, moving them to `running`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn claim_due_sync_jobs(pool: &PgPool, batch_size: i64) -> Result<Vec<SyncJobRow>, DbError> {
    let rows = sqlx::query_as::<_, SyncJobRow>(&format!(
        "UPDATE sync_jobs SET status = 'running', started_at = NOW() \
         WHERE id IN ( \
             SELECT id FROM sync_jobs \
             WHERE status = 'pending' AND next_attempt_at <= NOW() \
             ORDER BY next_attempt_at, id \
             LIMIT $1 \
             FOR UPDATE SKIP LOCKED \
         ) \
         RETURNING {JOB_COLUMNS}"
    ))
    .bind(batch_size)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Returns jobs stuck in `running` since before `started_before` to the
/// queue. Each expiry counts as an attempt; a job out of retries is parked
/// as `failed`. Returns the number of jobs touched.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn requeue_expired_sync_jobs(
    pool: &PgPool,
    started_before: DateTime<Utc>,
) -> Result<u64, DbError> {
    let affected = sqlx::query(
        "UPDATE sync_jobs SET \
             status          = CASE WHEN retry_count + 1 >= max_retries \
                                    THEN 'failed' ELSE 'pending' END, \
             completed_at    = CASE WHEN retry_count + 1 >= max_retries \
                                    THEN NOW() ELSE NULL END, \
             retry_count     = retry_count + 1, \
             next_attempt_at = NOW(), \
             last_error      = 'job did not finish before its claim expired' \
         WHERE status = 'running' AND started_at < $1",
    )
    .bind(started_before)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected)
}

/// Marks a running job `completed` with its result summary.
///
/// Returns `false` when the job is no longer `running` (reclaimed while the
/// worker ran) and nothing was written.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn complete_sync_job(pool: &PgPool, id: i64, result: &Value) -> Result<bool, DbError> {
    let affected = sqlx::query(
        "UPDATE sync_jobs SET status = 'completed', result = $2, last_error = NULL, \
                completed_at = NOW() \
         WHERE id = $1 AND status = 'running'",
    )
    .bind(id)
    .bind(result)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected > 0)
}

/// Puts a running job back to `pending`, due at `next_attempt_at`.
///
/// Returns `false` when the job is no longer `running`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn reschedule_sync_job(
    pool: &PgPool,
    id: i64,
    retry_count: i32,
    next_attempt_at: DateTime<Utc>,
    error: &str,
) -> Result<bool, DbError> {
    let affected = sqlx::query(
        "UPDATE sync_jobs SET status = 'pending', retry_count = $2, next_attempt_at = $3, \
                last_error = $4 \
         WHERE id = $1 AND status = 'running'",
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

/// Parks a running job as permanently `failed`.
///
/// Returns `false` when the job is no longer `running`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn fail_sync_job(
    pool: &PgPool,
    id: i64,
    retry_count: i32,
    error: &str,
) -> Result<bool, DbError> {
    let affected = sqlx::query(
        "UPDATE sync_jobs SET status = 'failed', retry_count = $2, last_error = $3, \
                completed_at = NOW() \
         WHERE id = $1 AND status = 'running'",
    )
    .bind(id)
    .bind(retry_count)
    .bind(error)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected > 0)
}

// ---------------------------------------------------------------------------
// sync_cursors
// ---------------------------------------------------------------------------

/// The high-water mark of the last successful incremental pull of
/// `data_type` from `channel`, if any.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_sync_cursor(
    pool: &PgPool,
    channel: &str,
    data_type: &str,
) -> Result<Option<DateTime<Utc>>, DbError> {
    let cursor = sqlx::query_scalar::<_, DateTime<Utc>>(
        "SELECT cursor_at FROM sync_cursors WHERE channel = $1 AND data_type = $2",
    )
    .bind(channel)
    .bind(data_type)
    .fetch_optional(pool)
    .await?;
    Ok(cursor)
}

/// Moves the cursor forward to `at`. A cursor never moves backwards, so a
/// slow job finishing after a faster one cannot rewind it.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn advance_sync_cursor(
    pool: &PgPool,
    channel: &str,
    data_type: &str,
    at: DateTime<Utc>,
) -> Result<DateTime<Utc>, DbError> {
    let cursor = sqlx::query_scalar::<_, DateTime<Utc>>(
        "INSERT INTO sync_cursors (channel, data_type, cursor_at) VALUES ($1, $2, $3) \
         ON CONFLICT (channel, data_type) DO UPDATE SET \
             cursor_at  = GREATEST(sync_cursors.cursor_at, EXCLUDED.cursor_at), \
             updated_at = NOW() \
         RETURNING cursor_at",
    )
    .bind(channel)
    .bind(data_type)
    .bind(at)
    .fetch_one(pool)
    .await?;
    Ok(cursor)
}

/// Job counts per status.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn sync_job_status_counts(pool: &PgPool) -> Result<Vec<StatusCountRow>, DbError> {
    let rows = sqlx::query_as::<_, StatusCountRow>(
        "SELECT status, COUNT(*) AS count FROM sync_jobs GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
