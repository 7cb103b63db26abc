//! Bounded pool of dedicated worker threads.
//!
//! Each worker runs one job at a time on its own OS thread with a
//! single-threaded tokio runtime. Admission is slot based: a pool with
//! `worker_count` workers and a queue depth of `max_queue_depth` accepts at
//! most `worker_count + max_queue_depth` outstanding jobs, and callers can
//! ask how many slots are free before taking on new work.
//!
//! # Example
//!
//! ```rust,ignore
//! use emissions_scheduler::config::WorkerPoolConfig;
//! use emissions_scheduler::core::{JobMeta, WorkerPool};
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new().with_worker_count(4), my_executor)?;
//! let rx = pool.submit(job, "batch_0123456789abcdef")?;
//! let report = rx.await?;
//! ```

mod native;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::executor::JobMeta;

pub use native::WorkerPool;

/// Errors that can occur when using a `WorkerPool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The task queue is full; no more jobs can be accepted.
    QueueFull,

    /// Every slot is taken by a running or queued job.
    AtCapacity {
        /// Total slots of the pool.
        capacity: usize,
    },

    /// The pool has been shut down.
    PoolShutdown,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// Internal error (worker thread spawn failure, channel closed, etc.).
    Internal(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "task queue is full"),
            Self::AtCapacity { capacity } => write!(f, "all {capacity} worker slots are in use"),
            Self::PoolShutdown => write!(f, "pool has been shut down"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,

    /// Workers currently executing a job.
    pub busy_workers: u64,

    /// Workers waiting for a job.
    pub idle_workers: u64,

    /// Jobs waiting in the queue.
    pub queued_jobs: u64,

    /// Slots not taken by running or queued jobs.
    pub available_slots: usize,

    /// Total jobs completed.
    pub completed_jobs: u64,

    /// Jobs whose executor panicked.
    pub failed_jobs: u64,

    /// Total jobs submitted.
    pub submitted_jobs: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub busy_workers: AtomicU64,
    pub queued_jobs: AtomicU64,
    pub completed_jobs: AtomicU64,
    pub failed_jobs: AtomicU64,
    pub submitted_jobs: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize, available_slots: usize) -> PoolStats {
        let busy = self.busy_workers.load(Ordering::Relaxed);
        PoolStats {
            worker_count,
            busy_workers: busy,
            idle_workers: (worker_count as u64).saturating_sub(busy),
            queued_jobs: self.queued_jobs.load(Ordering::Relaxed),
            available_slots,
            completed_jobs: self.completed_jobs.load(Ordering::Relaxed),
            failed_jobs: self.failed_jobs.load(Ordering::Relaxed),
            submitted_jobs: self.submitted_jobs.load(Ordering::Relaxed),
        }
    }
}

/// A job submitted to the worker pool.
pub(crate) struct WorkerTask<P, R> {
    /// The payload to execute.
    pub payload: P,
    /// Job metadata.
    pub meta: JobMeta,
    /// Where the result goes.
    pub reply: tokio::sync::oneshot::Sender<R>,
}
