//! In-memory batch and lease store for development and tests.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::core::batch::{
    ActivityOutcome, BatchFilter, BatchJob, BatchProgress, BatchStatus, ProgressLogEntry, TransitionPatch,
};
use crate::core::error::SchedulerError;
use crate::core::store::{BatchStore, Lease, LeaseStore};
use crate::emissions::model::EmissionRecord;
use crate::util::clock::now;

use super::{LeaseTable, StoreState};

/// Batch store and lease store backed by process memory.
///
/// A single instance shared between several schedulers gives them the same
/// mutual exclusion a shared database would.
#[derive(Debug, Default)]
pub struct InMemoryBatchStore {
    state: Mutex<StoreState>,
    leases: Mutex<LeaseTable>,
}

impl InMemoryBatchStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored batches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    /// Whether the store holds no batches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BatchStore for InMemoryBatchStore {
    async fn create_batch(&self, job: BatchJob) -> Result<(), SchedulerError> {
        debug!(batch_id = %job.id, org_id = %job.org_id, "Creating batch");
        self.state.lock().create(job)
    }

    async fn get_batch(&self, batch_id: &str) -> Result<BatchJob, SchedulerError> {
        self.state.lock().get(batch_id)
    }

    async fn list_batches(&self, org_id: &str, filter: &BatchFilter) -> Result<Vec<BatchJob>, SchedulerError> {
        Ok(self.state.lock().list(org_id, filter))
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<BatchJob>, SchedulerError> {
        Ok(self.state.lock().pending(limit))
    }

    async fn list_in_flight(&self) -> Result<Vec<BatchJob>, SchedulerError> {
        Ok(self.state.lock().in_flight())
    }

    async fn update_batch_status(
        &self,
        batch_id: &str,
        from: BatchStatus,
        to: BatchStatus,
        patch: TransitionPatch,
    ) -> Result<BatchJob, SchedulerError> {
        self.state.lock().transition(batch_id, from, to, patch, now())
    }

    async fn record_outcome(
        &self,
        batch_id: &str,
        attempt: u32,
        outcome: ActivityOutcome,
    ) -> Result<BatchProgress, SchedulerError> {
        self.state.lock().record(batch_id, attempt, outcome, now())
    }

    async fn list_records(&self, batch_id: &str) -> Result<Vec<EmissionRecord>, SchedulerError> {
        self.state.lock().records(batch_id)
    }

    async fn progress_log(&self, batch_id: &str) -> Result<Vec<ProgressLogEntry>, SchedulerError> {
        self.state.lock().progress_log(batch_id)
    }

    async fn delete_batch(&self, batch_id: &str) -> Result<(), SchedulerError> {
        self.state.lock().delete(batch_id)
    }
}

#[async_trait]
impl LeaseStore for InMemoryBatchStore {
    async fn acquire_lease(
        &self,
        batch_id: &str,
        worker_id: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>, SchedulerError> {
        Ok(self.leases.lock().acquire(batch_id, worker_id, ttl, now()))
    }

    async fn renew_lease(&self, lease: &Lease, ttl: Duration) -> Result<Lease, SchedulerError> {
        self.leases.lock().renew(lease, ttl, now())
    }

    async fn release_lease(&self, lease: &Lease) -> Result<(), SchedulerError> {
        self.leases.lock().release(lease);
        Ok(())
    }

    async fn current_lease(&self, batch_id: &str) -> Result<Option<Lease>, SchedulerError> {
        Ok(self.leases.lock().current(batch_id, now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::batch::BatchSubmission;
    use crate::emissions::model::{DataQuality, Methodology, Scope};
    use crate::util::clock::now;

    fn job(id: &str, priority: i32) -> BatchJob {
        BatchJob::new(
            id.into(),
            BatchSubmission {
                org_id: "org".into(),
                workspace_id: "ws".into(),
                activity_ids: vec!["a1".into(), "a2".into()],
                max_retries: None,
                priority: Some(priority),
            },
            1,
            now(),
        )
    }

    fn record(activity_id: &str, kg: f64) -> ActivityOutcome {
        let at = now();
        ActivityOutcome::Success(Box::new(EmissionRecord {
            id: format!("rec_{activity_id}"),
            activity_id: activity_id.into(),
            scope: Scope::Scope2,
            emissions_kg_co2e: kg,
            emissions_tonnes_co2e: kg / 1000.0,
            methodology: Methodology::LocationBased,
            data_quality: DataQuality::Measured,
            factor_id: "f".into(),
            factor_value: kg,
            input_quantity: 1.0,
            input_unit: "kwh".into(),
            normalized_quantity: 1.0,
            normalized_unit: "kwh".into(),
            region: "US".into(),
            org_id: "org".into(),
            workspace_id: "ws".into(),
            scope3_category: None,
            period_start: at,
            period_end: at,
            calculated_at: at,
        }))
    }

    async fn processing(store: &InMemoryBatchStore, id: &str) {
        store.create_batch(job(id, 5)).await.unwrap();
        store
            .update_batch_status(id, BatchStatus::Pending, BatchStatus::Queued, TransitionPatch::default())
            .await
            .unwrap();
        store
            .update_batch_status(id, BatchStatus::Queued, BatchStatus::Processing, TransitionPatch::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_compare_and_transition_has_one_winner() {
        let store = InMemoryBatchStore::new();
        store.create_batch(job("b1", 5)).await.unwrap();

        let first = store
            .update_batch_status("b1", BatchStatus::Pending, BatchStatus::Queued, TransitionPatch::default())
            .await;
        let second = store
            .update_batch_status("b1", BatchStatus::Pending, BatchStatus::Queued, TransitionPatch::default())
            .await;
        assert!(first.is_ok());
        assert!(matches!(second, Err(SchedulerError::Conflict(_))));
        assert_eq!(store.progress_log("b1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_outcomes_are_fenced_by_attempt_and_bounded() {
        let store = InMemoryBatchStore::new();
        processing(&store, "b1").await;

        let stale = store.record_outcome("b1", 1, record("a1", 1.0)).await;
        assert!(matches!(stale, Err(SchedulerError::Conflict(_))));

        store.record_outcome("b1", 0, record("a1", 1.5)).await.unwrap();
        let progress = store
            .record_outcome(
                "b1",
                0,
                ActivityOutcome::Failure {
                    activity_id: "a2".into(),
                    error: Some("boom".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(progress.processed(), 2);
        assert!((progress.total_emissions_kg_co2e - 1.5).abs() < f64::EPSILON);

        let overflow = store.record_outcome("b1", 0, record("a3", 1.0)).await;
        assert!(matches!(overflow, Err(SchedulerError::Conflict(_))));

        let job = store.get_batch("b1").await.unwrap();
        assert_eq!(job.error_summary, vec!["a2: boom".to_string()]);
        assert_eq!(store.list_records("b1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reprocessing_discards_previous_records() {
        let store = InMemoryBatchStore::new();
        processing(&store, "b1").await;
        store.record_outcome("b1", 0, record("a1", 2.0)).await.unwrap();
        store
            .update_batch_status("b1", BatchStatus::Processing, BatchStatus::Failed, TransitionPatch::default())
            .await
            .unwrap();
        store
            .update_batch_status("b1", BatchStatus::Failed, BatchStatus::Pending, TransitionPatch::default())
            .await
            .unwrap();
        store
            .update_batch_status("b1", BatchStatus::Pending, BatchStatus::Queued, TransitionPatch::default())
            .await
            .unwrap();
        store
            .update_batch_status("b1", BatchStatus::Queued, BatchStatus::Processing, TransitionPatch::default())
            .await
            .unwrap();

        assert!(store.list_records("b1").await.unwrap().is_empty());
        let job = store.get_batch("b1").await.unwrap();
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.processed_count(), 0);
        store.record_outcome("b1", 1, record("a1", 2.0)).await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_is_ordered_by_priority_then_age() {
        let store = InMemoryBatchStore::new();
        store.create_batch(job("low", 1)).await.unwrap();
        store.create_batch(job("high", 9)).await.unwrap();
        store.create_batch(job("mid", 5)).await.unwrap();

        let ids: Vec<String> = store.list_pending(10).await.unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["high", "mid", "low"]);
        assert_eq!(store.list_pending(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_only_terminal_batches_can_be_deleted() {
        let store = InMemoryBatchStore::new();
        store.create_batch(job("b1", 5)).await.unwrap();
        assert!(matches!(
            store.delete_batch("b1").await,
            Err(SchedulerError::Conflict(_))
        ));
        store
            .update_batch_status("b1", BatchStatus::Pending, BatchStatus::Cancelled, TransitionPatch::default())
            .await
            .unwrap();
        store.delete_batch("b1").await.unwrap();
        assert!(store.is_empty());
        assert!(matches!(store.get_batch("b1").await, Err(SchedulerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_leases_are_exclusive_until_expiry() {
        let store = InMemoryBatchStore::new();
        let ttl = Duration::from_secs(60);
        let lease = store.acquire_lease("b1", "w1", ttl).await.unwrap().unwrap();
        assert!(store.acquire_lease("b1", "w2", ttl).await.unwrap().is_none());

        let renewed = store.renew_lease(&lease, ttl).await.unwrap();
        assert_eq!(renewed.token, lease.token);

        store.release_lease(&lease).await.unwrap();
        assert!(store.current_lease("b1").await.unwrap().is_none());
        assert!(matches!(
            store.renew_lease(&lease, ttl).await,
            Err(SchedulerError::LeaseLost(_))
        ));

        let short = store.acquire_lease("b2", "w1", Duration::ZERO).await.unwrap().unwrap();
        let taken = store.acquire_lease("b2", "w2", ttl).await.unwrap().unwrap();
        assert_ne!(short.token, taken.token);
        // releasing the stale lease must not free the new holder's lease
        store.release_lease(&short).await.unwrap();
        assert_eq!(store.current_lease("b2").await.unwrap().map(|l| l.worker_id), Some("w2".into()));
    }
}
