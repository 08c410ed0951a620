use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use thiserror::Error;

use omnidesk_core::AppConfig;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

// Path relative to crates/omnidesk-db/Cargo.toml; resolves to <workspace-root>/migrations/
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            acquire_timeout_secs: config.db_acquire_timeout_secs,
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("record not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    /// A guarded `UPDATE ... WHERE status = $n` matched nothing because the
    /// row moved on concurrently.
    #[error("{entity} {id} is no longer in status '{expected_status}'")]
    StaleStatus {
        entity: &'static str,
        id: i64,
        expected_status: String,
    },
    /// A value does not fit the column it is written to.
    #[error("{0} is out of range")]
    OutOfRange(&'static str),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    /// Maps a unique-constraint violation to [`DbError::Conflict`] and passes
    /// anything else through as [`DbError::Sqlx`].
    pub(crate) fn unique_or(err: sqlx::Error, what: impl Into<String>) -> Self {
        let is_unique = err
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation());
        if is_unique {
            DbError::Conflict(what.into())
        } else {
            DbError::Sqlx(err)
        }
    }
}

/// Connect to a Postgres pool using explicit URL and config.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the connection cannot be established.
pub async fn connect_pool(database_url: &str, config: PoolConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(database_url)
        .await
}

/// Run all pending migrations against the pool.
///
/// Returns the number of migrations that were applied.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] if any migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<usize, sqlx::migrate::MigrateError> {
    // _sqlx_migrations does not exist on a fresh database; treat that as zero.
    let applied_before: i64 =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = true")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    MIGRATOR.run(pool).await?;

    let applied_after: i64 =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = true")
            .fetch_one(pool)
            .await
            .unwrap_or(0);

    let delta = (applied_after - applied_before).max(0);
    Ok(usize::try_from(delta).unwrap_or(0))
}

/// Send a `SELECT 1` to verify the pool has a live connection.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the query fails.
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}

/// A `(status, count)` pair, shared by the queue and order status breakdowns.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct StatusCountRow {
    pub status: String,
    pub count: i64,
}


pub mod channels;
pub mod fulfillments;
pub mod inventory;
pub mod lifecycle;
pub mod notifications;
pub mod orders;
pub mod products;
pub mod reports;
pub mod sales_queue;
pub mod sync_jobs;
pub mod users;
pub mod validation;
pub mod webhook_events;
pub mod workflow_rules;

pub use channels::{
    get_channel, list_channels, set_channel_active, touch_channel_synced, ChannelRow,
};
pub use fulfillments::{
    count_undelivered_fulfillments, create_fulfillment, fulfillment_carrier_counts,
    fulfillment_metrics, get_fulfillment, list_fulfillments, list_order_fulfillments,
    mark_fulfillment_delivered, CarrierCountRow, FulfillmentMetricsRow, FulfillmentRow,
};
pub use inventory::{
    channel_stock, consume_reservation, list_inventory, list_low_stock, release_reservation,
    reserve_for_order, set_inventory, set_quantity_by_sku, ChannelStockRow, InventoryRow,
    LowStockRow, DEFAULT_LOCATION,
};
pub use lifecycle::{
    enter_stage, lifecycle_stage_stats, list_lifecycle_stages, list_stuck_orders,
    LifecycleStageRow, StageStatsRow, StuckOrderRow,
};
pub use notifications::{
    claim_due_notifications, enqueue_notification, fail_notification, get_notification,
    list_notifications, mark_notification_sent, notification_status_counts,
    requeue_expired_notifications, reschedule_notification, retry_notification,
    NewNotification, NotificationRow,
};
pub use orders::{
    append_order_note, append_order_tag, get_order, insert_status_history, list_order_items,
    list_orders, list_status_history, update_order_status, upsert_order, OrderFilter,
    OrderItemRow, OrderRow, StatusHistoryRow, UpsertedOrder,
};
pub use products::{
    archive_product, create_product, get_product, get_product_by_sku, list_channel_products,
    list_products, update_product, upsert_channel_product, upsert_product_from_channel,
    ChannelListing, ChannelProductRow, NewProduct, ProductRow, ProductUpdate,
};
pub use reports::{
    create_generated_report, daily_series, get_generated_report, inventory_report,
    kpi_inputs, list_generated_reports, order_totals, orders_by_status, revenue_by_channel,
    sales_report, top_products, ChannelRevenueRow, DailyRow, GeneratedReportRow,
    GeneratedReportSummaryRow, InventoryReportRow, KpiInputsRow, NewGeneratedReport,
    OrderTotalsRow, SalesGrouping, SalesGroupRow, TopProductRow,
};
pub use sales_queue::{
    claim_due_sales, enqueue_sale, fail_sale, list_sales_queue, mark_sale_processed,
    requeue_expired_sales, reschedule_sale, SalesQueueRow,
};
pub use sync_jobs::{
    advance_sync_cursor, claim_due_sync_jobs, complete_sync_job, create_sync_job, fail_sync_job,
    get_sync_cursor, get_sync_job, list_sync_jobs, requeue_expired_sync_jobs,
    reschedule_sync_job, retry_sync_job, sync_job_status_counts, SyncJobRow,
};
pub use users::{create_user, get_user, get_user_by_email, touch_last_login, UserRow};
pub use validation::{
    create_validation_rule, latest_quality_run, list_active_validation_rules, list_issues,
    list_validation_rules, open_issue_counts, order_records, product_records,
    record_quality_run, replace_open_issues, resolve_issue, structural_checks,
    update_validation_rule, EntityRecordRow, IssueCountRow, NewIssue, NewValidationRule,
    QualityIssueRow, QualityRunRow, StructuralFinding, ValidationRuleRow,
};
pub use webhook_events::{list_webhook_events, record_webhook_event, WebhookEventRow};
pub use workflow_rules::{
    active_rules_from_status, create_workflow_rule, deactivate_workflow_rule,
    get_workflow_rule, list_workflow_rules, update_workflow_rule, NewWorkflowRule,
    WorkflowRuleRow,
};
