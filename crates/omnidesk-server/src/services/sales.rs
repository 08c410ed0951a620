//! The sales processing queue: raw channel order payloads in, normalized
//! orders out.

use chrono::Utc;
use serde_json::{json, Value};
use sqlx::PgPool;

use omnidesk_channels::{external_order_id, map_order};
use omnidesk_core::{
    claim_cutoff, next_retry, Channel, NormalizedOrder, OrderStatus, QueueSettings,
    RetryDecision,
};
use omnidesk_db::{OrderRow, SalesQueueRow};

use super::order_status::{transition_in_tx, StatusChange};
use super::{error_text, log_settlement, BatchOutcome, ServiceError, Worker};

/// Lifecycle stage recorded when an order first arrives.
pub const RECEIVED_STAGE: &str = "received";

/// Queues a raw channel order. Re-ingesting the same external order resets
/// the existing row to `pending` with the newer payload.
///
/// # Errors
///
/// Returns [`ServiceError::Channel`] if the payload carries no order id.
pub async fn ingest_sale(
    pool: &PgPool,
    channel: Channel,
    payload: &Value,
    max_retries: i32,
) -> Result<SalesQueueRow, ServiceError> {
    let external_id = external_order_id(channel, payload)?;
    let row =
        omnidesk_db::enqueue_sale(pool, channel.as_str(), &external_id, payload, max_retries)
            .await?;
    tracing::debug!(
        channel = channel.as_str(),
        external_order_id = %external_id,
        queue_id = row.id,
        "sales: payload queued"
    );
    Ok(row)
}

/// Result of [`store_order`].
#[derive(Debug, Clone)]
pub struct StoredOrder {
    pub order: OrderRow,
    pub inserted: bool,
}

/// Upserts a normalized order with its items.
///
/// A first-time order opens the `received` stage. Stock is reserved for any
/// order whose stored status still holds it. A known order keeps its local
/// status unless the incoming status is one the transition table allows
/// from it.
///
/// # Errors
///
/// Returns [`ServiceError::Db`] if any write fails.
pub async fn store_order(
    pool: &PgPool,
    normalized: &NormalizedOrder,
    max_retries: i32,
) -> Result<StoredOrder, ServiceError> {
    let channel = normalized.channel;
    let mut tx = pool.begin().await?;
    let upserted = omnidesk_db::upsert_order(&mut tx, normalized).await?;
    let mut order = upserted.order;

    if upserted.inserted {
        omnidesk_db::insert_status_history(
            &mut *tx,
            order.id,
            None,
            &order.status,
            Some("order received"),
            None,
        )
        .await?;
        omnidesk_db::enter_stage(
            &mut tx,
            order.id,
            RECEIVED_STAGE,
            &json!({ "channel": channel.as_str(), "status": order.status }),
        )
        .await?;
        tracing::info!(
            order_id = order.id,
            channel = channel.as_str(),
            reserved_units = upserted.reserved_units,
            "sales: new order stored"
        );
    } else {
        let current: OrderStatus = order.status.parse()?;
        if current.can_transition_to(normalized.status) {
            let change = StatusChange {
                reason: Some("channel status update"),
                ..StatusChange::default()
            };
            order =
                transition_in_tx(&mut tx, &order, normalized.status, &change, max_retries).await?;
        } else if current != normalized.status {
            tracing::debug!(
                order_id = order.id,
                local = current.as_str(),
                channel_status = normalized.status.as_str(),
                "sales: ignoring channel status the local order cannot move to"
            );
        }
    }

    tx.commit().await?;
    Ok(StoredOrder {
        order,
        inserted: upserted.inserted,
    })
}

async fn process_sale(
    pool: &PgPool,
    row: &SalesQueueRow,
    max_retries: i32,
) -> Result<i64, ServiceError> {
    let channel: Channel = row.channel.parse()?;
    let normalized = map_order(channel, &row.payload)?;
    let stored = store_order(pool, &normalized, max_retries).await?;
    Ok(stored.order.id)
}

/// Requeues abandoned claims, then claims one batch of due queue rows and
/// processes them sequentially.
///
/// # Errors
///
/// Returns [`ServiceError::Db`] if the batch cannot be claimed. A row whose
/// outcome cannot be recorded is logged and left to expire.
pub async fn process_sales_batch(
    pool: &PgPool,
    settings: &QueueSettings,
) -> Result<BatchOutcome, ServiceError> {
    let now = Utc::now();
    let expired =
        omnidesk_db::requeue_expired_sales(pool, claim_cutoff(now, settings.claim_timeout_secs))
            .await?;
    if expired > 0 {
        tracing::warn!(expired, "sales: requeued abandoned claims");
    }

    let rows = omnidesk_db::claim_due_sales(pool, settings.batch_size).await?;
    let mut outcome = BatchOutcome {
        expired,
        claimed: rows.len(),
        ..BatchOutcome::default()
    };

    for row in &rows {
        let written = match process_sale(pool, row, settings.max_retries).await {
            Ok(order_id) => {
                outcome.succeeded += 1;
                omnidesk_db::mark_sale_processed(pool, row.id, order_id).await
            }
            Err(e) => {
                tracing::warn!(
                    queue_id = row.id,
                    channel = %row.channel,
                    external_order_id = %row.external_order_id,
                    error = %e,
                    "sales: processing failed"
                );
                outcome.failed += 1;
                let message = error_text(&e);
                match next_retry(
                    row.retry_count,
                    row.max_retries,
                    settings.backoff_base_secs,
                    Utc::now(),
                ) {
                    RetryDecision::Retry {
                        retry_count,
                        next_attempt_at,
                    } => {
                        omnidesk_db::reschedule_sale(
                            pool,
                            row.id,
                            retry_count,
                            next_attempt_at,
                            &message,
                        )
                        .await
                    }
                    RetryDecision::GiveUp { retry_count } => {
                        omnidesk_db::fail_sale(pool, row.id, retry_count, &message).await
                    }
                }
            }
        };
        log_settlement(Worker::Sales, row.id, written);
    }

    if outcome.claimed > 0 {
        tracing::info!(
            claimed = outcome.claimed,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "sales: batch processed"
        );
    }
    Ok(outcome)
}
