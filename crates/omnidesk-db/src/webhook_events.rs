//! Database operations for `webhook_events`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;

use crate::DbError;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WebhookEventRow {
    pub id: i64,
    pub channel: String,
    pub topic: String,
    pub payload: Value,
    pub signature_valid: bool,
    pub received_at: DateTime<Utc>,
}

/// Records a webhook delivery, valid or not. Returns the new row id.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn record_webhook_event(
    pool: &PgPool,
    channel: &str,
    topic: &str,
    payload: &Value,
    signature_valid: bool,
) -> Result<i64, DbError> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO webhook_events (channel, topic, payload, signature_valid) \
         VALUES ($1, $2, $3, $4) \
         RETURNING id",
    )
    .bind(channel)
    .bind(topic)
    .bind(payload)
    .bind(signature_valid)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Lists recent deliveries, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_webhook_events(
    pool: &PgPool,
    channel: Option<&str>,
    limit: i64,
) -> Result<Vec<WebhookEventRow>, DbError> {
    let rows = sqlx::query_as::<_, WebhookEventRow>(
        "SELECT id, channel, topic, payload, signature_valid, received_at \
         FROM webhook_events \
         WHERE ($1::text IS NULL OR channel = $1) \
         ORDER BY received_at DESC, id DESC \
         LIMIT $2",
    )
    .bind(channel)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
