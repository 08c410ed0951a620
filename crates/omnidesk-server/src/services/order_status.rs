//! Order status transitions: the guarded update, its history row, the
//! lifecycle stage, stock settlement and the customer notification, all in
//! one transaction.

use serde_json::json;
use sqlx::{PgConnection, PgPool};

use omnidesk_core::{template_for_status, OrderStatus};
use omnidesk_db::OrderRow;

use super::notifications::{enqueue_for_order, ExtraVars};
use super::ServiceError;

/// Who asked for a status change, and why.
#[derive(Debug, Clone, Default)]
pub struct StatusChange<'a> {
    pub reason: Option<&'a str>,
    pub changed_by: Option<i64>,
    pub extra: ExtraVars<'a>,
}

/// Moves `order` to `to` inside an open transaction and returns the updated
/// row.
///
/// Leaving the statuses that hold stock settles the order's reservation:
/// shipping consumes it, cancelling or refunding releases it.
///
/// # Errors
///
/// Returns [`ServiceError::Core`] for a transition the table does not allow
/// (including a same-status update), [`omnidesk_db::DbError::StaleStatus`]
/// if the row changed concurrently, or any database failure.
pub async fn transition_in_tx(
    conn: &mut PgConnection,
    order: &OrderRow,
    to: OrderStatus,
    change: &StatusChange<'_>,
    max_retries: i32,
) -> Result<OrderRow, ServiceError> {
    let from: OrderStatus = order.status.parse()?;
    from.transition_to(to)?;

    omnidesk_db::update_order_status(&mut *conn, order.id, from, to).await?;
    omnidesk_db::insert_status_history(
        &mut *conn,
        order.id,
        Some(from.as_str()),
        to.as_str(),
        change.reason,
        change.changed_by,
    )
    .await?;
    omnidesk_db::enter_stage(
        &mut *conn,
        order.id,
        to.as_str(),
        &json!({ "from": from.as_str(), "reason": change.reason }),
    )
    .await?;

    if from.holds_stock() && !to.holds_stock() {
        let (units, action) = if to == OrderStatus::Shipped {
            (omnidesk_db::consume_reservation(&mut *conn, order.id).await?, "consumed")
        } else {
            (omnidesk_db::release_reservation(&mut *conn, order.id).await?, "released")
        };
        if units > 0 {
            tracing::debug!(order_id = order.id, units, action, "orders: reservation settled");
        }
    }

    let updated = omnidesk_db::get_order(&mut *conn, order.id).await?;
    if let Some(template) = template_for_status(to) {
        enqueue_for_order(&mut *conn, &updated, template, &change.extra, max_retries).await?;
    }

    tracing::info!(
        order_id = order.id,
        from = from.as_str(),
        to = to.as_str(),
        "orders: status changed"
    );
    Ok(updated)
}

/// Loads the order and applies [`transition_in_tx`] in its own transaction.
///
/// # Errors
///
/// See [`transition_in_tx`]; an unknown id is [`omnidesk_db::DbError::NotFound`].
pub async fn change_order_status(
    pool: &PgPool,
    order_id: i64,
    to: OrderStatus,
    change: &StatusChange<'_>,
    max_retries: i32,
) -> Result<OrderRow, ServiceError> {
    let mut tx = pool.begin().await?;
    let order = omnidesk_db::get_order(&mut *tx, order_id).await?;
    let updated = transition_in_tx(&mut tx, &order, to, change, max_retries).await?;
    tx.commit().await?;
    Ok(updated)
}
