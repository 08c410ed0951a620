//! Database operations for `inventory`.
//!
//! Available stock is `quantity - reserved`. Each order item records how many
//! units it holds in `order_items.reserved_qty`, so settling a reservation
//! returns exactly what was taken no matter how the items changed since.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgExecutor, PgPool};

use crate::DbError;

pub const DEFAULT_LOCATION: &str = "default";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct InventoryRow {
    pub id: i64,
    pub product_id: i64,
    pub location: String,
    pub quantity: i32,
    pub reserved: i32,
    pub available: i32,
    pub reorder_point: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LowStockRow {
    pub product_id: i64,
    pub sku: String,
    pub name: String,
    pub location: String,
    pub quantity: i32,
    pub reserved: i32,
    pub available: i32,
    pub reorder_point: i32,
}

/// Stock to publish for one channel listing.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChannelStockRow {
    pub product_id: i64,
    /// The channel's SKU when set, else the merchant SKU.
    pub sku: String,
    pub available: i64,
}

const INVENTORY_COLUMNS: &str = "id, product_id, location, quantity, reserved, \
                                 quantity - reserved AS available, reorder_point, updated_at";

/// Lists a product's stock rows by location.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_inventory(pool: &PgPool, product_id: i64) -> Result<Vec<InventoryRow>, DbError> {
    let rows = sqlx::query_as::<_, InventoryRow>(&format!(
        "SELECT {INVENTORY_COLUMNS} FROM inventory WHERE product_id = $1 ORDER BY location"
    ))
    .bind(product_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Sets the on-hand quantity (and optionally the reorder point) at a location.
///
/// A negative `quantity` is stored as zero; the returned flag is `true` when
/// that clamp happened so the caller can log it.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn set_inventory(
    pool: &PgPool,
    product_id: i64,
    location: &str,
    quantity: i32,
    reorder_point: Option<i32>,
) -> Result<(InventoryRow, bool), DbError> {
    let clamped = quantity < 0;
    let row = sqlx::query_as::<_, InventoryRow>(&format!(
        "INSERT INTO inventory (product_id, location, quantity, reorder_point) \
         VALUES ($1, $2, $3, COALESCE($4, 0)) \
         ON CONFLICT (product_id, location) DO UPDATE SET \
             quantity      = EXCLUDED.quantity, \
             reorder_point = COALESCE($4, inventory.reorder_point), \
             updated_at    = NOW() \
         RETURNING {INVENTORY_COLUMNS}"
    ))
    .bind(product_id)
    .bind(location)
    .bind(quantity.max(0))
    .bind(reorder_point)
    .fetch_one(pool)
    .await?;
    Ok((row, clamped))
}

/// Sets the `default` location quantity for the product with `sku`.
///
/// Returns `false` when no product has that SKU.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn set_quantity_by_sku(pool: &PgPool, sku: &str, quantity: i32) -> Result<bool, DbError> {
    let affected = sqlx::query(
        "INSERT INTO inventory (product_id, location, quantity) \
         SELECT id, $3, $2 FROM products WHERE sku = $1 \
         ON CONFLICT (product_id, location) DO UPDATE SET \
             quantity   = EXCLUDED.quantity, \
             updated_at = NOW()",
    )
    .bind(sku)
    .bind(quantity.max(0))
    .bind(DEFAULT_LOCATION)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected > 0)
}

/// Reserves stock at the `default` location for every item of an order that
/// is linked to a stocked product and holds nothing yet. Returns the number
/// of units reserved.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn reserve_for_order<'e, E: PgExecutor<'e>>(
    executor: E,
    order_id: i64,
) -> Result<i64, DbError> {
    let units = sqlx::query_scalar::<_, i64>(
        "WITH held AS ( \
             UPDATE order_items oi SET reserved_qty = oi.quantity \
             FROM inventory i \
             WHERE oi.order_id = $1 AND oi.reserved_qty = 0 \
               AND i.product_id = oi.product_id AND i.location = $2 \
             RETURNING oi.product_id, oi.quantity \
         ), bumped AS ( \
             UPDATE inventory i SET \
                 reserved   = i.reserved + x.qty, \
                 updated_at = NOW() \
             FROM (SELECT product_id, SUM(quantity) AS qty FROM held GROUP BY product_id) x \
             WHERE i.product_id = x.product_id AND i.location = $2 \
             RETURNING i.id \
         ) \
         SELECT COALESCE(SUM(quantity), 0)::bigint FROM held",
    )
    .bind(order_id)
    .bind(DEFAULT_LOCATION)
    .fetch_one(executor)
    .await?;
    Ok(units)
}

/// Consumes an order's reservation once it ships: both `reserved` and
/// `quantity` drop by the units each item holds, floored at zero. Returns the
/// number of units consumed; a second call is a no-op.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn consume_reservation<'e, E: PgExecutor<'e>>(
    executor: E,
    order_id: i64,
) -> Result<i64, DbError> {
    settle_reservation(executor, order_id, true).await
}

/// Returns an order's reserved units to available stock without touching
/// `quantity`. Returns the number of units released; a second call is a
/// no-op.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn release_reservation<'e, E: PgExecutor<'e>>(
    executor: E,
    order_id: i64,
) -> Result<i64, DbError> {
    settle_reservation(executor, order_id, false).await
}

async fn settle_reservation<'e, E: PgExecutor<'e>>(
    executor: E,
    order_id: i64,
    consume: bool,
) -> Result<i64, DbError> {
    let units = sqlx::query_scalar::<_, i64>(
        "WITH settled AS ( \
             UPDATE order_items oi SET reserved_qty = 0 \
             FROM order_items prev \
             WHERE prev.id = oi.id AND oi.order_id = $1 AND prev.reserved_qty > 0 \
             RETURNING oi.product_id, prev.reserved_qty AS qty \
         ), applied AS ( \
             UPDATE inventory i SET \
                 reserved   = GREATEST(i.reserved - x.qty, 0), \
                 quantity   = CASE WHEN $3 THEN GREATEST(i.quantity - x.qty, 0) \
                                   ELSE i.quantity END, \
                 updated_at = NOW() \
             FROM ( \
                 SELECT product_id, SUM(qty) AS qty FROM settled \
                 WHERE product_id IS NOT NULL GROUP BY product_id \
             ) x \
             WHERE i.product_id = x.product_id AND i.location = $2 \
             RETURNING i.id \
         ) \
         SELECT COALESCE(SUM(qty), 0)::bigint FROM settled",
    )
    .bind(order_id)
    .bind(DEFAULT_LOCATION)
    .bind(consume)
    .fetch_one(executor)
    .await?;
    Ok(units)
}

/// Rows whose available stock is at or below the reorder point.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_low_stock(pool: &PgPool, limit: i64) -> Result<Vec<LowStockRow>, DbError> {
    let rows = sqlx::query_as::<_, LowStockRow>(
        "SELECT p.id AS product_id, p.sku, p.name, i.location, i.quantity, i.reserved, \
                i.quantity - i.reserved AS available, i.reorder_point \
         FROM inventory i \
         JOIN products p ON p.id = i.product_id \
         WHERE p.status <> 'archived' AND i.quantity - i.reserved <= i.reorder_point \
         ORDER BY i.quantity - i.reserved ASC, p.sku \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Available stock per active listing on `channel`, summed across locations.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn channel_stock(pool: &PgPool, channel: &str) -> Result<Vec<ChannelStockRow>, DbError> {
    let rows = sqlx::query_as::<_, ChannelStockRow>(
        "SELECT p.id AS product_id, COALESCE(cp.channel_sku, p.sku) AS sku, \
                GREATEST(COALESCE(SUM(i.quantity - i.reserved), 0), 0)::bigint AS available \
         FROM channel_products cp \
         JOIN products p ON p.id = cp.product_id \
         LEFT JOIN inventory i ON i.product_id = p.id \
         WHERE cp.channel = $1 AND cp.status = 'active' \
         GROUP BY p.id, cp.channel_sku, p.sku \
         ORDER BY p.id",
    )
    .bind(channel)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
