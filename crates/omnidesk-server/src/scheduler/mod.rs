//! Background queue workers.
//!
//! Each worker is a repeated job on one [`JobScheduler`]. A tick is skipped
//! while the same worker is still running, whether that run came from the
//! scheduler or from a manual `process`/`run` endpoint.

use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::api::AppState;
use crate::services::notifications::process_notification_batch;
use crate::services::sales::process_sales_batch;
use crate::services::sync::process_sync_batch;
use crate::services::{BatchOutcome, ServiceError, Worker};

/// Builds and starts the scheduler with the sync, sales, and notification
/// workers registered.
///
/// The returned handle must be kept alive for the lifetime of the process;
/// dropping it shuts down all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// a job cannot be registered, or the scheduler fails to start.
pub async fn build_scheduler(state: AppState) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    let queue_every = Duration::from_secs(state.config.queue.poll_secs.max(1));
    let notify_every = Duration::from_secs(state.config.queue.notification_poll_secs.max(1));

    register_worker(&scheduler, state.clone(), Worker::Sync, queue_every).await?;
    register_worker(&scheduler, state.clone(), Worker::Sales, queue_every).await?;
    register_worker(&scheduler, state, Worker::Notifications, notify_every).await?;

    scheduler.start().await?;
    tracing::info!(
        queue_poll_secs = queue_every.as_secs(),
        notification_poll_secs = notify_every.as_secs(),
        "scheduler: workers started"
    );
    Ok(scheduler)
}

async fn register_worker(
    scheduler: &JobScheduler,
    state: AppState,
    worker: Worker,
    every: Duration,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_repeated_async(every, move |_uuid, _lock| {
        let state = state.clone();
        Box::pin(async move {
            run_tick(&state, worker).await;
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}

/// Runs one batch for `worker` unless it is already busy.
async fn run_tick(state: &AppState, worker: Worker) -> Option<BatchOutcome> {
    let Some(_guard) = state.workers.try_start(worker) else {
        tracing::debug!(worker = worker.as_str(), "scheduler: previous run still active; skipping tick");
        return None;
    };

    match run_batch(state, worker).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            tracing::error!(worker = worker.as_str(), error = %e, "scheduler: batch failed");
            None
        }
    }
}

async fn run_batch(state: &AppState, worker: Worker) -> Result<BatchOutcome, ServiceError> {
    match worker {
        Worker::Sync => process_sync_batch(&state.pool, &state.config).await,
        Worker::Sales => process_sales_batch(&state.pool, &state.config.queue).await,
        Worker::Notifications => {
            process_notification_batch(&state.pool, &*state.mailer, &state.config.queue).await
        }
    }
}
