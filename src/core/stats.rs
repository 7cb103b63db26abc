//! Scheduler counters, statistics snapshots and health summary.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::batch::{BatchProgress, BatchStatus};
use crate::core::worker_pool::PoolStats;

/// Point-in-time scheduler statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Batches that reached Completed.
    pub batches_processed: u64,
    /// Batches that reached Failed (each attempt counts).
    pub batches_failed: u64,
    /// Failed batches returned to Pending.
    pub batches_retried: u64,
    /// Batches cancelled by a caller or an abort.
    pub batches_cancelled: u64,
    /// Activities calculated successfully.
    pub activities_succeeded: u64,
    /// Activities that failed.
    pub activities_failed: u64,
    /// Sum of emissions over finished attempts, kg CO2e.
    pub total_emissions_kg_co2e: f64,
    /// In-flight batches failed because their lease lapsed.
    pub orphans_recovered: u64,
    /// Leases not obtained within the bounded wait.
    pub lock_timeouts: u64,
    /// Pending batches seen by the last poll.
    pub pending_batches: usize,
    /// When the last poll ran.
    pub last_poll_at: Option<DateTime<Utc>>,
    /// When the next poll is due.
    pub next_poll_at: Option<DateTime<Utc>>,
    /// Worker pool utilization.
    pub workers: PoolStats,
}

/// Liveness summary for health endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// `healthy` or `degraded`.
    pub status: String,
    /// Whether the poll loop is running.
    pub scheduler_running: bool,
    /// Batches that reached Completed.
    pub batches_processed: u64,
    /// Workers currently processing a batch.
    pub workers_active: u64,
    /// Pending batches seen by the last poll.
    pub pending_batches: usize,
    /// Sum of emissions over finished attempts, kg CO2e.
    pub total_emissions_kg_co2e: f64,
    /// When the summary was taken.
    pub timestamp: DateTime<Utc>,
}

/// Shared, lock-free-ish counters updated by the scheduler and its workers.
#[derive(Debug, Default)]
pub(crate) struct SchedulerCounters {
    batches_processed: AtomicU64,
    batches_failed: AtomicU64,
    batches_retried: AtomicU64,
    batches_cancelled: AtomicU64,
    activities_succeeded: AtomicU64,
    activities_failed: AtomicU64,
    orphans_recovered: AtomicU64,
    lock_timeouts: AtomicU64,
    polls: Mutex<PollTimes>,
    total_emissions: Mutex<f64>,
}

#[derive(Debug, Default, Clone, Copy)]
struct PollTimes {
    last: Option<DateTime<Utc>>,
    next: Option<DateTime<Utc>>,
    pending: usize,
}

impl SchedulerCounters {
    pub(crate) fn record_finish(&self, status: BatchStatus, progress: &BatchProgress) {
        match status {
            BatchStatus::Completed => self.batches_processed.fetch_add(1, Ordering::Relaxed),
            BatchStatus::Failed => self.batches_failed.fetch_add(1, Ordering::Relaxed),
            BatchStatus::Cancelled => self.batches_cancelled.fetch_add(1, Ordering::Relaxed),
            _ => return,
        };
        self.activities_succeeded
            .fetch_add(progress.success_count as u64, Ordering::Relaxed);
        self.activities_failed
            .fetch_add(progress.error_count as u64, Ordering::Relaxed);
        *self.total_emissions.lock() += progress.total_emissions_kg_co2e;
    }

    pub(crate) fn record_failure(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancel(&self) {
        self.batches_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.batches_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_orphan(&self) {
        self.orphans_recovered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_poll(&self, at: DateTime<Utc>, pending: usize) {
        let mut polls = self.polls.lock();
        polls.last = Some(at);
        polls.pending = pending;
    }

    pub(crate) fn set_next_poll(&self, at: DateTime<Utc>) {
        self.polls.lock().next = Some(at);
    }

    pub(crate) fn snapshot(&self, workers: PoolStats) -> SchedulerStats {
        let polls = *self.polls.lock();
        SchedulerStats {
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            batches_retried: self.batches_retried.load(Ordering::Relaxed),
            batches_cancelled: self.batches_cancelled.load(Ordering::Relaxed),
            activities_succeeded: self.activities_succeeded.load(Ordering::Relaxed),
            activities_failed: self.activities_failed.load(Ordering::Relaxed),
            total_emissions_kg_co2e: *self.total_emissions.lock(),
            orphans_recovered: self.orphans_recovered.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            pending_batches: polls.pending,
            last_poll_at: polls.last,
            next_poll_at: polls.next,
            workers,
        }
    }
}
