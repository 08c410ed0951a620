//! Sync job execution: pulls channel orders, products and stock into the
//! local store, and pushes local stock back out.

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use sqlx::PgPool;

use omnidesk_channels::{map_product, ChannelConnector, ChannelError, StockUpdate};
use omnidesk_core::{
    claim_cutoff, next_retry, AppConfig, Channel, DataType, RetryDecision, SyncDirection,
};
use omnidesk_db::{DbError, SyncJobRow};

use super::sales::ingest_sale;
use super::{error_text, log_settlement, BatchOutcome, ServiceError, Worker};

/// Incremental pulls re-read this much before the stored cursor so that
/// orders updated while the previous fetch was in flight are not missed.
const CURSOR_OVERLAP_MINUTES: i64 = 5;

impl ServiceError {
    /// Failures that another attempt cannot fix.
    fn is_permanent(&self) -> bool {
        match self {
            ServiceError::Channel(e) => e.is_permanent(),
            ServiceError::Core(_) | ServiceError::Validation(_) => true,
            ServiceError::Db(_) | ServiceError::Report(_) => false,
        }
    }
}

/// Runs one claimed job against `connector` and returns its JSON result.
///
/// # Errors
///
/// Returns [`ServiceError::Channel`] for upstream failures (including
/// [`ChannelError::NotSupported`] for operations a channel lacks) and
/// [`ServiceError::Db`] for storage failures.
pub async fn execute_job(
    pool: &PgPool,
    connector: &ChannelConnector,
    job: &SyncJobRow,
    max_retries: i32,
) -> Result<Value, ServiceError> {
    let data_type: DataType = job.data_type.parse()?;
    let direction: SyncDirection = job.direction.parse()?;
    let channel = connector.channel();

    match (direction, data_type) {
        (SyncDirection::Pull, DataType::Orders) => {
            pull_orders(pool, connector, channel, max_retries).await
        }
        (SyncDirection::Pull, DataType::Products) => pull_products(pool, connector, channel).await,
        (SyncDirection::Pull, DataType::Inventory) => {
            pull_inventory(pool, connector, channel).await
        }
        (SyncDirection::Push, DataType::Inventory) => {
            push_inventory(pool, connector, channel).await
        }
        (SyncDirection::Push, other) => Err(ChannelError::NotSupported {
            channel: channel.as_str().to_owned(),
            operation: format!("pushing {other}"),
        }
        .into()),
    }
}

/// Pulls orders updated since the `(channel, orders)` cursor. The cursor is
/// stamped before the fetch and only advanced once every order is queued, so
/// a failed pull is retried from the old position.
async fn pull_orders(
    pool: &PgPool,
    connector: &ChannelConnector,
    channel: Channel,
    max_retries: i32,
) -> Result<Value, ServiceError> {
    let cursor_key = DataType::Orders.as_str();
    let started_at = Utc::now();
    let cursor = omnidesk_db::get_sync_cursor(pool, channel.as_str(), cursor_key).await?;
    let since = cursor.map(|at| {
        at.checked_sub_signed(Duration::minutes(CURSOR_OVERLAP_MINUTES))
            .unwrap_or(at)
    });
    let orders = connector.fetch_orders(since).await?;

    let mut enqueued = 0_usize;
    let mut skipped = 0_usize;
    for payload in &orders {
        match ingest_sale(pool, channel, payload, max_retries).await {
            Ok(_) => enqueued += 1,
            Err(ServiceError::Channel(e)) => {
                tracing::warn!(channel = channel.as_str(), error = %e, "sync: skipping order without id");
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    let advanced =
        omnidesk_db::advance_sync_cursor(pool, channel.as_str(), cursor_key, started_at).await?;
    Ok(json!({
        "fetched": orders.len(),
        "enqueued": enqueued,
        "skipped": skipped,
        "since": since,
        "cursor": advanced,
    }))
}

async fn pull_products(
    pool: &PgPool,
    connector: &ChannelConnector,
    channel: Channel,
) -> Result<Value, ServiceError> {
    let payloads = connector.fetch_products().await?;

    let mut upserted = 0_usize;
    let mut skipped = 0_usize;
    for payload in &payloads {
        let product = match map_product(channel, payload) {
            Ok(product) => product,
            Err(e) => {
                tracing::warn!(channel = channel.as_str(), error = %e, "sync: skipping unmappable product");
                skipped += 1;
                continue;
            }
        };
        match omnidesk_db::upsert_product_from_channel(pool, &product).await {
            Ok(_) => upserted += 1,
            Err(DbError::Conflict(reason)) => {
                tracing::warn!(channel = channel.as_str(), %reason, "sync: skipping conflicting listing");
                skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(json!({ "fetched": payloads.len(), "upserted": upserted, "skipped": skipped }))
}

async fn pull_inventory(
    pool: &PgPool,
    connector: &ChannelConnector,
    channel: Channel,
) -> Result<Value, ServiceError> {
    let payloads = connector.fetch_products().await?;

    let mut updated = 0_usize;
    let mut unmatched = 0_usize;
    for payload in &payloads {
        let Ok(product) = map_product(channel, payload) else {
            unmatched += 1;
            continue;
        };
        let Some(quantity) = product.quantity else {
            continue;
        };
        if omnidesk_db::set_quantity_by_sku(pool, &product.sku, quantity).await? {
            updated += 1;
        } else {
            unmatched += 1;
        }
    }

    Ok(json!({ "fetched": payloads.len(), "updated": updated, "unmatched": unmatched }))
}

async fn push_inventory(
    pool: &PgPool,
    connector: &ChannelConnector,
    channel: Channel,
) -> Result<Value, ServiceError> {
    let stock = omnidesk_db::channel_stock(pool, channel.as_str()).await?;
    let updates: Vec<StockUpdate> = stock
        .into_iter()
        .map(|row| StockUpdate {
            shop_sku: row.sku,
            quantity: row.available,
            price: None,
        })
        .collect();

    if updates.is_empty() {
        return Ok(json!({ "pushed": 0 }));
    }

    let receipt = connector.push_inventory(&updates).await?;
    Ok(json!({ "pushed": updates.len(), "receipt": receipt }))
}

async fn run_job(pool: &PgPool, config: &AppConfig, job: &SyncJobRow) -> Result<Value, ServiceError> {
    let channel: Channel = job.channel.parse()?;
    let channel_row = omnidesk_db::get_channel(pool, channel.as_str()).await?;
    if !channel_row.is_active {
        return Err(ServiceError::Validation(format!(
            "channel '{channel}' is inactive"
        )));
    }
    let connector = ChannelConnector::from_config(channel, config)?;
    execute_job(pool, &connector, job, config.queue.max_retries).await
}

/// Requeues abandoned jobs, then claims one batch of due sync jobs and
/// executes them sequentially.
///
/// # Errors
///
/// Returns [`ServiceError::Db`] if the batch cannot be claimed. A job whose
/// outcome cannot be recorded is logged and left to expire.
pub async fn process_sync_batch(
    pool: &PgPool,
    config: &AppConfig,
) -> Result<BatchOutcome, ServiceError> {
    let settings = &config.queue;
    let expired = omnidesk_db::requeue_expired_sync_jobs(
        pool,
        claim_cutoff(Utc::now(), settings.claim_timeout_secs),
    )
    .await?;
    if expired > 0 {
        tracing::warn!(expired, "sync: requeued abandoned jobs");
    }

    let jobs = omnidesk_db::claim_due_sync_jobs(pool, settings.batch_size).await?;
    let mut outcome = BatchOutcome {
        expired,
        claimed: jobs.len(),
        ..BatchOutcome::default()
    };

    for job in &jobs {
        let written = match run_job(pool, config, job).await {
            Ok(result) => {
                outcome.succeeded += 1;
                tracing::info!(
                    job_id = job.id,
                    channel = %job.channel,
                    data_type = %job.data_type,
                    direction = %job.direction,
                    "sync: job completed"
                );
                complete_job(pool, job, &result).await
            }
            Err(e) => {
                outcome.failed += 1;
                let message = error_text(&e);
                if e.is_permanent() {
                    tracing::warn!(job_id = job.id, error = %e, "sync: job failed permanently");
                    omnidesk_db::fail_sync_job(pool, job.id, job.retry_count, &message).await
                } else {
                    tracing::warn!(job_id = job.id, error = %e, "sync: job failed");
                    match next_retry(
                        job.retry_count,
                        job.max_retries,
                        settings.backoff_base_secs,
                        Utc::now(),
                    ) {
                        RetryDecision::Retry {
                            retry_count,
                            next_attempt_at,
                        } => {
                            omnidesk_db::reschedule_sync_job(
                                pool,
                                job.id,
                                retry_count,
                                next_attempt_at,
                                &message,
                            )
                            .await
                        }
                        RetryDecision::GiveUp { retry_count } => {
                            omnidesk_db::fail_sync_job(pool, job.id, retry_count, &message).await
                        }
                    }
                }
            }
        };
        log_settlement(Worker::Sync, job.id, written);
    }

    if outcome.claimed > 0 {
        tracing::info!(
            claimed = outcome.claimed,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "sync: batch processed"
        );
    }
    Ok(outcome)
}

/// Records a finished job and stamps the channel's display-only
/// `last_synced_at`.
async fn complete_job(pool: &PgPool, job: &SyncJobRow, result: &Value) -> Result<bool, DbError> {
    let completed = omnidesk_db::complete_sync_job(pool, job.id, result).await?;
    if completed {
        omnidesk_db::touch_channel_synced(pool, &job.channel).await?;
    }
    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_operations_are_permanent() {
        let err = ServiceError::Channel(ChannelError::NotSupported {
            channel: "amazon".to_string(),
            operation: "fetching orders".to_string(),
        });
        assert!(err.is_permanent());
        assert!(ServiceError::Validation("channel 'amazon' is inactive".to_string()).is_permanent());
        assert!(!ServiceError::Db(DbError::NotFound).is_permanent());
        assert!(!ServiceError::Channel(ChannelError::UnexpectedStatus {
            status: 503,
            url: "https://marketplace.bestbuy.ca/api/offers".to_string(),
        })
        .is_permanent());
    }
}
