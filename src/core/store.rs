//! Persistence and ingestion ports used by the scheduler and its workers.
//!
//! Implementations live in `infra`. All batch mutations are
//! compare-and-transition on the current status so two writers cannot both
//! win the same edge.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::batch::{
    ActivityOutcome, BatchFilter, BatchJob, BatchProgress, BatchStatus, ProgressLogEntry, TransitionPatch,
};
use crate::core::error::{CalculationError, SchedulerError};
use crate::emissions::model::{Activity, EmissionRecord};

/// Exclusive, expiring right to process one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Leased batch.
    pub batch_id: String,
    /// Holder.
    pub worker_id: String,
    /// Fencing token; changes on every acquisition.
    pub token: Uuid,
    /// When the lease lapses unless renewed.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Whether the lease has lapsed at `at`.
    #[must_use]
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_at <= at
    }
}

/// Durable storage of batches, their records and transition history.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Insert a new batch.
    ///
    /// # Errors
    ///
    /// `Conflict` if the id exists; `Persistence` on backend failure.
    async fn create_batch(&self, job: BatchJob) -> Result<(), SchedulerError>;

    /// Fetch a batch.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids.
    async fn get_batch(&self, batch_id: &str) -> Result<BatchJob, SchedulerError>;

    /// Batches of `org_id`, newest first, filtered and paged.
    ///
    /// # Errors
    ///
    /// `Persistence` on backend failure.
    async fn list_batches(&self, org_id: &str, filter: &BatchFilter) -> Result<Vec<BatchJob>, SchedulerError>;

    /// Pending batches ordered by priority (descending) then age (ascending).
    ///
    /// # Errors
    ///
    /// `Persistence` on backend failure.
    async fn list_pending(&self, limit: usize) -> Result<Vec<BatchJob>, SchedulerError>;

    /// Queued and Processing batches.
    ///
    /// # Errors
    ///
    /// `Persistence` on backend failure.
    async fn list_in_flight(&self) -> Result<Vec<BatchJob>, SchedulerError>;

    /// Move a batch from `from` to `to`, applying `patch` and the state
    /// machine's side effects atomically. Entering Processing also deletes
    /// the records of earlier attempts.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids; `Conflict` if the batch is not in `from`
    /// or the edge is illegal.
    async fn update_batch_status(
        &self,
        batch_id: &str,
        from: BatchStatus,
        to: BatchStatus,
        patch: TransitionPatch,
    ) -> Result<BatchJob, SchedulerError>;

    /// Apply one activity's outcome to a Processing batch.
    ///
    /// `attempt` must equal the batch's `retry_count`; writes from stale
    /// attempts are rejected.
    ///
    /// # Errors
    ///
    /// `Conflict` if the batch is not Processing, the attempt is stale, or
    /// every activity is already accounted for.
    async fn record_outcome(
        &self,
        batch_id: &str,
        attempt: u32,
        outcome: ActivityOutcome,
    ) -> Result<BatchProgress, SchedulerError>;

    /// Emission records of the batch's current attempt.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids.
    async fn list_records(&self, batch_id: &str) -> Result<Vec<EmissionRecord>, SchedulerError>;

    /// Transition history, oldest first.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids.
    async fn progress_log(&self, batch_id: &str) -> Result<Vec<ProgressLogEntry>, SchedulerError>;

    /// Remove a terminal batch with its records and history.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids; `Conflict` if the batch is not terminal.
    async fn delete_batch(&self, batch_id: &str) -> Result<(), SchedulerError>;
}

/// Expiring mutual exclusion over batch ids.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Grant a lease if the batch is free or its lease expired; `None` when
    /// another holder has a live lease.
    ///
    /// # Errors
    ///
    /// `Persistence` on backend failure.
    async fn acquire_lease(
        &self,
        batch_id: &str,
        worker_id: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>, SchedulerError>;

    /// Extend a held lease.
    ///
    /// # Errors
    ///
    /// `LeaseLost` if the token no longer matches or the lease lapsed.
    async fn renew_lease(&self, lease: &Lease, ttl: Duration) -> Result<Lease, SchedulerError>;

    /// Release a held lease; releasing a lease that was lost is a no-op.
    ///
    /// # Errors
    ///
    /// `Persistence` on backend failure.
    async fn release_lease(&self, lease: &Lease) -> Result<(), SchedulerError>;

    /// The live lease on a batch, if any.
    ///
    /// # Errors
    ///
    /// `Persistence` on backend failure.
    async fn current_lease(&self, batch_id: &str) -> Result<Option<Lease>, SchedulerError>;
}

/// Read access to ingested activities.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Fetch one activity.
    ///
    /// # Errors
    ///
    /// `ActivityNotFound` for unknown ids; `Source` on backend failure.
    async fn get_activity(&self, activity_id: &str) -> Result<Activity, CalculationError>;
}
