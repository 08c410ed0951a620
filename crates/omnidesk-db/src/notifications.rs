//! Database operations for `notification_queue`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgExecutor, PgPool};

use crate::{DbError, StatusCountRow};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct NotificationRow {
    pub id: i64,
    pub order_id: Option<i64>,
    pub recipient: String,
    pub channel: String,
    pub template: String,
    pub subject: String,
    pub body: String,
    /// `pending`, `sending`, `sent`, or `failed`.
    pub status: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A rendered message ready to queue.
#[derive(Debug, Clone)]
pub struct NewNotification<'a> {
    pub order_id: Option<i64>,
    pub recipient: &'a str,
    pub template: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
    pub max_retries: i32,
}

const NOTIFICATION_COLUMNS: &str = "id, order_id, recipient, channel, template, subject, body, \
                                    status, retry_count, max_retries, next_attempt_at, \
                                    last_error, sent_at, created_at";

/// Queues an email notification due immediately.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn enqueue_notification<'e, E: PgExecutor<'e>>(
    executor: E,
    notification: &NewNotification<'_>,
) -> Result<NotificationRow, DbError> {
    let row = sqlx::query_as::<_, NotificationRow>(&format!(
        "INSERT INTO notification_queue \
             (order_id, recipient, template, subject, body, max_retries) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING {NOTIFICATION_COLUMNS}"
    ))
    .bind(notification.order_id)
    .bind(notification.recipient)
    .bind(notification.template)
    .bind(notification.subject)
    .bind(notification.body)
    .bind(notification.max_retries)
    .fetch_one(executor)
    .await?;
    Ok(row)
}

/// Fetches one notification.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if absent, or [`DbError::Sqlx`].
pub async fn get_notification(pool: &PgPool, id: i64) -> Result<NotificationRow, DbError> {
    sqlx::query_as::<_, NotificationRow>(&format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notification_queue WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Lists notifications, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_notifications(
    pool: &PgPool,
    status: Option<&str>,
    order_id: Option<i64>,
    limit: i64,
) -> Result<Vec<NotificationRow>, DbError> {
    let rows = sqlx::query_as::<_, NotificationRow>(&format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notification_queue \
         WHERE ($1::text IS NULL OR status = $1) \
           AND ($2::bigint IS NULL OR order_id = $2) \
         ORDER BY created_at DESC, id DESC \
         LIMIT $3"
    ))
    .bind(status)
    .bind(order_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Claims up to `batch_size` due `pending` rows, moving them to `sending`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn claim_due_notifications(
    pool: &PgPool,
    batch_size: i64,
) -> Result<Vec<NotificationRow>, DbError> {
    let rows = sqlx::query_as::<_, NotificationRow>(&format!(
        "UPDATE notification_queue SET status = 'sending', claimed_at = NOW() \
         WHERE id IN ( \
             SELECT id FROM notification_queue \
             WHERE status = 'pending' AND next_attempt_at <= NOW() \
             ORDER BY next_attempt_at, id \
             LIMIT $1 \
             FOR UPDATE SKIP LOCKED \
         ) \
         RETURNING {NOTIFICATION_COLUMNS}"
    ))
    .bind(batch_size)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Returns rows stuck in `sending` since before `claimed_before` to the
/// queue. Delivery is at-least-once: a worker that died after the SMTP
/// hand-off causes a resend. Returns the number of rows touched.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn requeue_expired_notifications(
    pool: &PgPool,
    claimed_before: DateTime<Utc>,
) -> Result<u64, DbError> {
    let affected = sqlx::query(
        "UPDATE notification_queue SET \
             status          = CASE WHEN retry_count + 1 >= max_retries \
                                    THEN 'failed' ELSE 'pending' END, \
             retry_count     = retry_count + 1, \
             next_attempt_at = NOW(), \
             last_error      = 'send did not finish before its claim expired' \
         WHERE status = 'sending' AND claimed_at < $1",
    )
    .bind(claimed_before)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected)
}

/// Marks a claimed notification `sent`.
///
/// Returns `false` when the row is no longer `sending`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn mark_notification_sent(pool: &PgPool, id: i64) -> Result<bool, DbError> {
    let affected = sqlx::query(
        "UPDATE notification_queue SET status = 'sent', sent_at = NOW(), last_error = NULL \
         WHERE id = $1 AND status = 'sending'",
    )
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected > 0)
}

/// Puts a claimed notification back to `pending`, due at `next_attempt_at`.
///
/// Returns `false` when the row is no longer `sending`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn reschedule_notification(
    pool: &PgPool,
    id: i64,
    retry_count: i32,
    next_attempt_at: DateTime<Utc>,
    error: &str,
) -> Result<bool, DbError> {
    let affected = sqlx::query(
        "UPDATE notification_queue SET status = 'pending', retry_count = $2, \
                next_attempt_at = $3, last_error = $4 \
         WHERE id = $1 AND status = 'sending'",
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

/// Parks a claimed notification as permanently `failed`.
///
/// Returns `false` when the row is no longer `sending`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn fail_notification(
    pool: &PgPool,
    id: i64,
    retry_count: i32,
    error: &str,
) -> Result<bool, DbError> {
    let affected = sqlx::query(
        "UPDATE notification_queue SET status = 'failed', retry_count = $2, last_error = $3 \
         WHERE id = $1 AND status = 'sending'",
    )
    .bind(id)
    .bind(retry_count)
    .bind(error)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected > 0)
}

/// Re-queues a `failed` notification with a reset retry count.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if absent, [`DbError::StaleStatus`] if it
/// is not `failed`, or [`DbError::Sqlx`].
pub async fn retry_notification(pool: &PgPool, id: i64) -> Result<NotificationRow, DbError> {
    let row = sqlx::query_as::<_, NotificationRow>(&format!(
        "UPDATE notification_queue SET status = 'pending', retry_count = 0, \
                next_attempt_at = NOW(), last_error = NULL \
         WHERE id = $1 AND status = 'failed' \
         RETURNING {NOTIFICATION_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(row),
        None => {
            get_notification(pool, id).await?;
            Err(DbError::StaleStatus {
                entity: "notification",
                id,
                expected_status: "failed".to_string(),
            })
        }
    }
}

/// Notification counts per status.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn notification_status_counts(pool: &PgPool) -> Result<Vec<StatusCountRow>, DbError> {
    let rows = sqlx::query_as::<_, StatusCountRow>(
        "SELECT status, COUNT(*) AS count FROM notification_queue GROUP BY status ORDER BY status",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
