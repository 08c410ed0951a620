//! Database operations for `channels`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::DbError;

/// A row from `channels`, with catalog and order counts joined in.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChannelRow {
    pub code: String,
    pub name: String,
    pub is_active: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub product_count: i64,
    pub order_count: i64,
}

const CHANNEL_SELECT: &str = "SELECT c.code, c.name, c.is_active, c.last_synced_at, \
        (SELECT COUNT(*) FROM channel_products cp WHERE cp.channel = c.code) AS product_count, \
        (SELECT COUNT(*) FROM sales_orders o WHERE o.channel = c.code) AS order_count \
     FROM channels c";

/// Lists every channel ordered by `id`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_channels(pool: &PgPool) -> Result<Vec<ChannelRow>, DbError> {
    let rows = sqlx::query_as::<_, ChannelRow>(&format!("{CHANNEL_SELECT} ORDER BY c.id"))
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Fetches one channel by code.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] for an unknown code, or [`DbError::Sqlx`].
pub async fn get_channel(pool: &PgPool, code: &str) -> Result<ChannelRow, DbError> {
    sqlx::query_as::<_, ChannelRow>(&format!("{CHANNEL_SELECT} WHERE c.code = $1"))
        .bind(code)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Enables or disables a channel and returns the updated row.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] for an unknown code, or [`DbError::Sqlx`].
pub async fn set_channel_active(
    pool: &PgPool,
    code: &str,
    is_active: bool,
) -> Result<ChannelRow, DbError> {
    let updated = sqlx::query("UPDATE channels SET is_active = $2 WHERE code = $1")
        .bind(code)
        .bind(is_active)
        .execute(pool)
        .await?
        .rows_affected();
    if updated == 0 {
        return Err(DbError::NotFound);
    }
    get_channel(pool, code).await
}

/// Sets `last_synced_at = NOW()` for a channel.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn touch_channel_synced(pool: &PgPool, code: &str) -> Result<(), DbError> {
    sqlx::query("UPDATE channels SET last_synced_at = NOW() WHERE code = $1")
        .bind(code)
        .execute(pool)
        .await?;
    Ok(())
}
