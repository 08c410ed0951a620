//! One-shot queue commands: each runs a single batch and prints the
//! outcome as JSON.

use clap::Subcommand;
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;

use omnidesk_core::{AppConfig, Channel, DataType, SyncDirection};
use omnidesk_server::mailer::AppMailer;
use omnidesk_server::services::notifications::process_notification_batch;
use omnidesk_server::services::sales::process_sales_batch;
use omnidesk_server::services::sync::process_sync_batch;

/// Sub-commands available under `sync`.
#[derive(Debug, Subcommand)]
pub enum SyncCommands {
    /// Queue a sync job
    Enqueue {
        /// Channel code: shopify, bestbuy or amazon
        #[arg(long)]
        channel: String,
        /// What to sync: orders, products or inventory
        #[arg(long)]
        data_type: String,
        /// pull or push
        #[arg(long, default_value = "pull")]
        direction: String,
    },
    /// Run one batch of due sync jobs and exit
    RunOnce,
}

/// Sub-commands available under `sales`.
#[derive(Debug, Subcommand)]
pub enum SalesCommands {
    /// Process one batch of queued channel orders and exit
    ProcessOnce,
}

/// Sub-commands available under `notifications`.
#[derive(Debug, Subcommand)]
pub enum NotificationCommands {
    /// Send one batch of due notifications and exit
    ProcessOnce,
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) async fn run_sync(
    pool: &PgPool,
    config: &AppConfig,
    command: SyncCommands,
) -> anyhow::Result<()> {
    match command {
        SyncCommands::Enqueue {
            channel,
            data_type,
            direction,
        } => {
            let channel: Channel = channel.parse()?;
            let data_type: DataType = data_type.parse()?;
            let direction: SyncDirection = direction.parse()?;
            let job = omnidesk_db::create_sync_job(
                pool,
                channel.as_str(),
                data_type.as_str(),
                direction.as_str(),
                &Value::Object(serde_json::Map::new()),
                config.queue.max_retries,
            )
            .await?;
            tracing::info!(job_id = job.id, "sync job queued");
            print_json(&job)
        }
        SyncCommands::RunOnce => {
            let outcome = process_sync_batch(pool, config).await?;
            print_json(&outcome)
        }
    }
}

pub(crate) async fn run_sales(
    pool: &PgPool,
    config: &AppConfig,
    command: SalesCommands,
) -> anyhow::Result<()> {
    match command {
        SalesCommands::ProcessOnce => {
            let outcome = process_sales_batch(pool, &config.queue).await?;
            print_json(&outcome)
        }
    }
}

pub(crate) async fn run_notifications(
    pool: &PgPool,
    config: &AppConfig,
    command: NotificationCommands,
) -> anyhow::Result<()> {
    match command {
        NotificationCommands::ProcessOnce => {
            let mailer = AppMailer::from_settings(config.smtp.as_ref())?;
            let outcome = process_notification_batch(pool, &mailer, &config.queue).await?;
            print_json(&outcome)
        }
    }
}
