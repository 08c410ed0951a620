//! Multi-step operations shared by the HTTP handlers, the background
//! workers, and the CLI.

pub mod fulfillment;
pub mod notifications;
pub mod order_status;
pub mod quality;
pub mod reports;
pub mod sales;
pub mod sync;
pub mod workflow;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use omnidesk_channels::ChannelError;
use omnidesk_core::CoreError;
use omnidesk_db::DbError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("{0}")]
    Validation(String),
    #[error("report generation failed: {0}")]
    Report(String),
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(DbError::Sqlx(err))
    }
}

/// Counts reported after draining one batch of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// Abandoned claims handed back to the queue before this batch.
    pub expired: u64,
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// The background workers that must never overlap with themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Worker {
    Sync,
    Sales,
    Notifications,
}

impl Worker {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Worker::Sync => "sync",
            Worker::Sales => "sales",
            Worker::Notifications => "notifications",
        }
    }
}

/// One "is processing" flag per worker, shared by the scheduler and the
/// manual `process`/`run` endpoints.
#[derive(Debug, Clone, Default)]
pub struct WorkerFlags {
    sync: Arc<AtomicBool>,
    sales: Arc<AtomicBool>,
    notifications: Arc<AtomicBool>,
}

/// Clears its worker's flag when dropped.
#[derive(Debug)]
pub struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl WorkerFlags {
    fn flag(&self, worker: Worker) -> &Arc<AtomicBool> {
        match worker {
            Worker::Sync => &self.sync,
            Worker::Sales => &self.sales,
            Worker::Notifications => &self.notifications,
        }
    }

    /// Marks `worker` as running. Returns `None` if a run is already active.
    #[must_use]
    pub fn try_start(&self, worker: Worker) -> Option<RunGuard> {
        let flag = self.flag(worker);
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                flag: Arc::clone(flag),
            })
    }

    #[must_use]
    pub fn is_running(&self, worker: Worker) -> bool {
        self.flag(worker).load(Ordering::Acquire)
    }
}

/// Logs the result of writing a claimed row's outcome. A failed write is not
/// fatal to the batch: the claim expires and the row is retried later.
pub(crate) fn log_settlement(worker: Worker, row_id: i64, written: Result<bool, DbError>) {
    match written {
        Ok(true) => {}
        Ok(false) => tracing::warn!(
            worker = worker.as_str(),
            row_id,
            "queue row changed while it was being processed; outcome dropped"
        ),
        Err(e) => tracing::error!(
            worker = worker.as_str(),
            row_id,
            error = %e,
            "could not record queue row outcome"
        ),
    }
}

/// Truncates an error message before it is stored in a `last_error` column.
pub(crate) fn error_text(err: &impl std::fmt::Display) -> String {
    const MAX: usize = 1_000;
    let text = err.to_string();
    if text.len() <= MAX {
        return text;
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_flag_blocks_overlapping_runs() {
        let flags = WorkerFlags::default();

        let guard = flags.try_start(Worker::Sales).expect("first run starts");
        assert!(flags.is_running(Worker::Sales));
        assert!(flags.try_start(Worker::Sales).is_none());
        assert!(
            flags.try_start(Worker::Sync).is_some(),
            "flags are per worker"
        );

        drop(guard);
        assert!(!flags.is_running(Worker::Sales));
        assert!(flags.try_start(Worker::Sales).is_some());
    }

    #[test]
    fn error_text_truncates_on_char_boundary() {
        let long = "é".repeat(600);
        let text = error_text(&long);
        assert!(text.len() <= 1_000);
        assert!(text.chars().all(|c| c == 'é'));
        assert_eq!(error_text(&"short"), "short");
    }
}

#[cfg(test)]
#[path = "services_test.rs"]
mod flow_tests;
