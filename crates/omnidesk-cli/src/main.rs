mod queues;

use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::queues::{NotificationCommands, SalesCommands, SyncCommands};

#[derive(Debug, Parser)]
#[command(name = "omnidesk-cli")]
#[command(about = "Omnidesk back-office command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Queue or run channel sync jobs
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Drain the sales processing queue
    Sales {
        #[command(subcommand)]
        command: SalesCommands,
    },
    /// Drain the customer notification queue
    Notifications {
        #[command(subcommand)]
        command: NotificationCommands,
    },
    /// Print KPIs for the trailing window as JSON
    Kpis {
        /// Window length in days, ending now
        #[arg(long, default_value = "30")]
        days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("omnidesk-cli: run with --help to list commands");
        return Ok(());
    };

    let config = omnidesk_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let pool_config = omnidesk_db::PoolConfig::from_app_config(&config);
    let pool = omnidesk_db::connect_pool(&config.database_url, pool_config).await?;

    match command {
        Commands::Migrate => {
            omnidesk_db::run_migrations(&pool).await?;
            println!("migrations applied");
        }
        Commands::Sync { command } => queues::run_sync(&pool, &config, command).await?,
        Commands::Sales { command } => queues::run_sales(&pool, &config, command).await?,
        Commands::Notifications { command } => {
            queues::run_notifications(&pool, &config, command).await?;
        }
        Commands::Kpis { days } => {
            let (from, to) = kpi_window(days, Utc::now())?;
            let kpis = omnidesk_server::services::reports::load_kpis(&pool, from, to).await?;
            queues::print_json(&kpis)?;
        }
    }

    Ok(())
}

/// Trailing `days`-long window ending at `now`.
fn kpi_window(days: i64, now: DateTime<Utc>) -> anyhow::Result<(DateTime<Utc>, DateTime<Utc>)> {
    anyhow::ensure!(days > 0, "--days must be at least 1");
    let span = TimeDelta::try_days(days).context("--days is too large")?;
    let from = now
        .checked_sub_signed(span)
        .context("--days reaches before the earliest representable date")?;
    Ok((from, now))
}

#[cfg(test)]
mod tests;
