//! Database operations for `sales_orders`, `order_items`, and
//! `order_status_history`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use sqlx::{PgConnection, PgExecutor, PgPool};

use omnidesk_core::{NormalizedOrder, OrderStatus};

use crate::inventory::{release_reservation, reserve_for_order};
use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OrderRow {
    pub id: i64,
    pub channel: String,
    pub external_order_id: String,
    pub order_number: String,
    pub status: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub currency: String,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub shipping_address: Value,
    pub tags: Vec<String>,
    pub notes: Option<String>,
    pub ordered_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OrderItemRow {
    pub id: i64,
    pub order_id: i64,
    /// Set when the item's SKU matched a catalog product at ingestion.
    pub product_id: Option<i64>,
    pub sku: Option<String>,
    pub title: String,
    pub quantity: i32,
    /// Units this item currently holds in `inventory.reserved`.
    pub reserved_qty: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StatusHistoryRow {
    pub id: i64,
    pub order_id: i64,
    pub from_status: Option<String>,
    pub to_status: String,
    pub reason: Option<String>,
    pub changed_by: Option<i64>,
    pub changed_at: DateTime<Utc>,
}

/// Result of [`upsert_order`]: the stored row and whether it was new.
#[derive(Debug, Clone)]
pub struct UpsertedOrder {
    pub order: OrderRow,
    pub inserted: bool,
    /// Units held for the order's current items after the upsert.
    pub reserved_units: i64,
}

#[derive(sqlx::FromRow)]
struct UpsertRow {
    #[sqlx(flatten)]
    order: OrderRow,
    inserted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status: Option<String>,
    pub channel: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

const ORDER_COLUMNS: &str = "id, channel, external_order_id, order_number, status, \
                             customer_name, customer_email, currency, subtotal, tax, shipping, \
                             discount, total, shipping_address, tags, notes, ordered_at, \
                             created_at, updated_at";

const FILTER_CLAUSE: &str = "($1::text IS NULL OR status = $1) \
                             AND ($2::text IS NULL OR channel = $2) \
                             AND ($3::timestamptz IS NULL OR ordered_at >= $3) \
                             AND ($4::timestamptz IS NULL OR ordered_at <= $4)";

// ---------------------------------------------------------------------------
// sales_orders operations
// ---------------------------------------------------------------------------

/// Upserts an order on `(channel, external_order_id)` and replaces its items.
///
/// On conflict the customer, totals and address are refreshed; `status` is
/// left alone so that status changes always go through the transition table.
/// Item SKUs are linked to catalog products where one matches; zero-quantity
/// lines are dropped.
///
/// Any reservation held by the old items is released before they are
/// replaced, and the new items are reserved while the stored status still
/// holds stock.
///
/// # Errors
///
/// Returns [`DbError::OutOfRange`] when a line total overflows, or
/// [`DbError::Sqlx`] if any statement fails.
pub async fn upsert_order(
    conn: &mut PgConnection,
    order: &NormalizedOrder,
) -> Result<UpsertedOrder, DbError> {
    let row = sqlx::query_as::<_, UpsertRow>(&format!(
        "INSERT INTO sales_orders \
             (channel, external_order_id, order_number, status, customer_name, customer_email, \
              currency, subtotal, tax, shipping, discount, total, shipping_address, ordered_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
         ON CONFLICT (channel, external_order_id) DO UPDATE SET \
             order_number     = EXCLUDED.order_number, \
             customer_name    = EXCLUDED.customer_name, \
             customer_email   = EXCLUDED.customer_email, \
             currency         = EXCLUDED.currency, \
             subtotal         = EXCLUDED.subtotal, \
             tax              = EXCLUDED.tax, \
             shipping         = EXCLUDED.shipping, \
             discount         = EXCLUDED.discount, \
             total            = EXCLUDED.total, \
             shipping_address = EXCLUDED.shipping_address, \
             updated_at       = NOW() \
         RETURNING {ORDER_COLUMNS}, (xmax = 0) AS inserted"
    ))
    .bind(order.channel.as_str())
    .bind(&order.external_order_id)
    .bind(&order.order_number)
    .bind(order.status.as_str())
    .bind(&order.customer_name)
    .bind(&order.customer_email)
    .bind(&order.currency)
    .bind(order.subtotal)
    .bind(order.tax)
    .bind(order.shipping)
    .bind(order.discount)
    .bind(order.total)
    .bind(&order.shipping_address)
    .bind(order.ordered_at)
    .fetch_one(&mut *conn)
    .await?;

    let order_id = row.order.id;

    if !row.inserted {
        release_reservation(&mut *conn, order_id).await?;
    }

    sqlx::query("DELETE FROM order_items WHERE order_id = $1")
        .bind(order_id)
        .execute(&mut *conn)
        .await?;

    for item in order.items.iter().filter(|item| item.quantity > 0) {
        let line_total = item.line_total().ok_or(DbError::OutOfRange("line total"))?;
        sqlx::query(
            "INSERT INTO order_items \
                 (order_id, product_id, sku, title, quantity, unit_price, line_total) \
             VALUES ($1, (SELECT id FROM products WHERE sku = $2), $2, $3, $4, $5, $6)",
        )
        .bind(order_id)
        .bind(&item.sku)
        .bind(&item.title)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(line_total)
        .execute(&mut *conn)
        .await?;
    }

    let holds_stock = row
        .order
        .status
        .parse::<OrderStatus>()
        .is_ok_and(OrderStatus::holds_stock);
    let reserved_units = if holds_stock {
        reserve_for_order(&mut *conn, order_id).await?
    } else {
        0
    };

    Ok(UpsertedOrder {
        order: row.order,
        inserted: row.inserted,
        reserved_units,
    })
}

/// Lists orders matching `filter`, newest first, with the total match count.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_orders(
    pool: &PgPool,
    filter: &OrderFilter,
) -> Result<(Vec<OrderRow>, i64), DbError> {
    let rows = sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM sales_orders \
         WHERE {FILTER_CLAUSE} \
         ORDER BY ordered_at DESC, id DESC \
         LIMIT $5 OFFSET $6"
    ))
    .bind(&filter.status)
    .bind(&filter.channel)
    .bind(filter.from)
    .bind(filter.to)
    .bind(filter.limit)
    .bind(filter.offset)
    .fetch_all(pool)
    .await?;

    let total = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT COUNT(*) FROM sales_orders WHERE {FILTER_CLAUSE}"
    ))
    .bind(&filter.status)
    .bind(&filter.channel)
    .bind(filter.from)
    .bind(filter.to)
    .fetch_one(pool)
    .await?;

    Ok((rows, total))
}

/// Fetches one order.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if absent, or [`DbError::Sqlx`].
pub async fn get_order<'e, E: PgExecutor<'e>>(executor: E, id: i64) -> Result<OrderRow, DbError> {
    sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM sales_orders WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or(DbError::NotFound)
}

/// Lists an order's line items in insertion order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_order_items<'e, E: PgExecutor<'e>>(
    executor: E,
    order_id: i64,
) -> Result<Vec<OrderItemRow>, DbError> {
    let rows = sqlx::query_as::<_, OrderItemRow>(
        "SELECT id, order_id, product_id, sku, title, quantity, reserved_qty, unit_price, \
                line_total \
         FROM order_items WHERE order_id = $1 ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// Moves an order from `from` to `to`, guarded on the current status.
///
/// # Errors
///
/// Returns [`DbError::StaleStatus`] if the order is no longer in `from`
/// (or does not exist), or [`DbError::Sqlx`].
pub async fn update_order_status<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<(), DbError> {
    let affected = sqlx::query(
        "UPDATE sales_orders SET status = $3, updated_at = NOW() \
         WHERE id = $1 AND status = $2",
    )
    .bind(id)
    .bind(from.as_str())
    .bind(to.as_str())
    .execute(executor)
    .await?
    .rows_affected();

    if affected == 0 {
        return Err(DbError::StaleStatus {
            entity: "order",
            id,
            expected_status: from.as_str().to_string(),
        });
    }
    Ok(())
}

/// Adds `tag` to the order's tags unless it is already present.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn append_order_tag<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    tag: &str,
) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE sales_orders SET \
             tags = CASE WHEN $2 = ANY(tags) THEN tags ELSE array_append(tags, $2) END, \
             updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(tag)
    .execute(executor)
    .await?;
    Ok(())
}

/// Appends a line to the order's notes.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn append_order_note<'e, E: PgExecutor<'e>>(
    executor: E,
    id: i64,
    note: &str,
) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE sales_orders SET \
             notes = CASE WHEN notes IS NULL OR notes = '' THEN $2 ELSE notes || E'\\n' || $2 END, \
             updated_at = NOW() \
         WHERE id = $1",
    )
    .bind(id)
    .bind(note)
    .execute(executor)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// order_status_history operations
// ---------------------------------------------------------------------------

/// Records a status change. `from_status` is `None` for the initial status.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_status_history<'e, E: PgExecutor<'e>>(
    executor: E,
    order_id: i64,
    from_status: Option<&str>,
    to_status: &str,
    reason: Option<&str>,
    changed_by: Option<i64>,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO order_status_history (order_id, from_status, to_status, reason, changed_by) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(order_id)
    .bind(from_status)
    .bind(to_status)
    .bind(reason)
    .bind(changed_by)
    .execute(executor)
    .await?;
    Ok(())
}

/// Lists an order's status changes, oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_status_history(
    pool: &PgPool,
    order_id: i64,
) -> Result<Vec<StatusHistoryRow>, DbError> {
    let rows = sqlx::query_as::<_, StatusHistoryRow>(
        "SELECT id, order_id, from_status, to_status, reason, changed_by, changed_at \
         FROM order_status_history \
         WHERE order_id = $1 \
         ORDER BY changed_at, id",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
