//! Database operations for `fulfillments`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{PgExecutor, PgPool};

use crate::DbError;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FulfillmentRow {
    pub id: i64,
    pub order_id: i64,
    pub carrier: String,
    pub tracking_number: String,
    pub tracking_url: Option<String>,
    /// `pending`, `shipped`, `delivered`, or `cancelled`.
    pub status: String,
    pub items: Value,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FulfillmentMetricsRow {
    pub shipped_count: i64,
    pub delivered_count: i64,
    /// Mean hours from order creation to shipment.
    pub avg_hours_to_ship: Option<f64>,
    /// Mean hours from shipment to delivery.
    pub avg_hours_to_deliver: Option<f64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CarrierCountRow {
    pub carrier: String,
    pub shipped_count: i64,
    pub delivered_count: i64,
}

const FULFILLMENT_COLUMNS: &str = "id, order_id, carrier, tracking_number, tracking_url, status, \
                                   items, shipped_at, delivered_at, created_at";

/// Inserts a `shipped` fulfillment.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_fulfillment<'e, E: PgExecutor<'e>>(
    executor: E,
    order_id: i64,
    carrier: &str,
    tracking_number: &str,
    tracking_url: Option<&str>,
    items: &Value,
) -> Result<FulfillmentRow, DbError> {
    let row = sqlx::query_as::<_, FulfillmentRow>(&format!(
        "INSERT INTO fulfillments \
             (order_id, carrier, tracking_number, tracking_url, status, items, shipped_at) \
         VALUES ($1, $2, $3, $4, 'shipped', $5, NOW()) \
         RETURNING {FULFILLMENT_COLUMNS}"
    ))
    .bind(order_id)
    .bind(carrier)
    .bind(tracking_number)
    .bind(tracking_url)
    .bind(items)
    .fetch_one(executor)
    .await?;
    Ok(row)
}

/// Fetches one fulfillment.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if absent, or [`DbError::Sqlx`].
pub async fn get_fulfillment<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<FulfillmentRow, DbError> {
    sqlx::query_as::<_, FulfillmentRow>(&format!(
        "SELECT {FULFILLMENT_COLUMNS} FROM fulfillments WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or(DbError::NotFound)
}

/// Lists an order's fulfillments, oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_order_fulfillments(
    pool: &PgPool,
    order_id: i64,
) -> Result<Vec<FulfillmentRow>, DbError> {
    let rows = sqlx::query_as::<_, FulfillmentRow>(&format!(
        "SELECT {FULFILLMENT_COLUMNS} FROM fulfillments WHERE order_id = $1 ORDER BY id"
    ))
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Lists fulfillments, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_fulfillments(
    pool: &PgPool,
    status: Option<&str>,
    limit: i64,
) -> Result<Vec<FulfillmentRow>, DbError> {
    let rows = sqlx::query_as::<_, FulfillmentRow>(&format!(
        "SELECT {FULFILLMENT_COLUMNS} FROM fulfillments \
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

/// Moves a `shipped` fulfillment to `delivered`.
///
/// # Errors
///
/// Returns [`DbError::StaleStatus`] if it is not `shipped` (or does not
/// exist), or [`DbError::Sqlx`].
pub async fn mark_fulfillment_delivered<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
) -> Result<FulfillmentRow, DbError> {
    sqlx::query_as::<_, FulfillmentRow>(&format!(
        "UPDATE fulfillments SET status = 'delivered', delivered_at = NOW() \
         WHERE id = $1 AND status = 'shipped' \
         RETURNING {FULFILLMENT_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| DbError::StaleStatus {
        entity: "fulfillment",
        id,
        expected_status: "shipped".to_string(),
    })
}

/// Number of the order's fulfillments that are not yet delivered (ignoring
/// cancelled ones).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_undelivered_fulfillments<'e, E: PgExecutor<'e>>(
    executor: E,
    order_id: i64,
) -> Result<i64, DbError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM fulfillments \
         WHERE order_id = $1 AND status NOT IN ('delivered', 'cancelled')",
    )
    .bind(order_id)
    .fetch_one(executor)
    .await?;
    Ok(count)
}

/// Aggregate shipping metrics across all fulfillments.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn fulfillment_metrics(pool: &PgPool) -> Result<FulfillmentMetricsRow, DbError> {
    let row = sqlx::query_as::<_, FulfillmentMetricsRow>(
        "SELECT \
             COUNT(*) FILTER (WHERE f.shipped_at IS NOT NULL) AS shipped_count, \
             COUNT(*) FILTER (WHERE f.status = 'delivered') AS delivered_count, \
             (AVG(EXTRACT(EPOCH FROM (f.shipped_at - o.created_at))) / 3600.0)::float8 \
                 AS avg_hours_to_ship, \
             (AVG(EXTRACT(EPOCH FROM (f.delivered_at - f.shipped_at))) / 3600.0)::float8 \
                 AS avg_hours_to_deliver \
         FROM fulfillments f \
         JOIN sales_orders o ON o.id = f.order_id",
    )
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Shipped and delivered counts per carrier.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn fulfillment_carrier_counts(pool: &PgPool) -> Result<Vec<CarrierCountRow>, DbError> {
    let rows = sqlx::query_as::<_, CarrierCountRow>(
        "SELECT carrier, \
                COUNT(*) FILTER (WHERE shipped_at IS NOT NULL) AS shipped_count, \
                COUNT(*) FILTER (WHERE status = 'delivered') AS delivered_count \
         FROM fulfillments \
         GROUP BY carrier \
         ORDER BY carrier",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
