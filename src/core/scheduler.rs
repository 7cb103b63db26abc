//! Batch scheduler: submission, queries, the poll loop and dispatch to the
//! worker pool.
//!
//! Several schedulers may share one store. Mutual exclusion per batch comes
//! from the lease store plus compare-and-transition on the batch status, so a
//! batch is processed by at most one worker at a time.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{SchedulerConfig, WorkerPoolConfig};
use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::batch::{
    BatchFilter, BatchJob, BatchProgress, BatchStatus, BatchSubmission, ProgressLogEntry, ProgressSnapshot,
    TransitionPatch,
};
use crate::core::error::SchedulerError;
use crate::core::processor::{schedule_retry, BatchAssignment, BatchProcessor, BatchRunReport};
use crate::core::stats::{HealthStatus, SchedulerCounters, SchedulerStats};
use crate::core::store::{ActivitySource, BatchStore, Lease, LeaseStore};
use crate::core::worker_pool::{PoolError, WorkerPool};
use crate::emissions::engine::Engine;
use crate::emissions::model::EmissionRecord;
use crate::util::clock::{now, to_chrono};
use crate::util::ids::{generate_batch_id, generate_worker_id};

/// Interval between lease acquisition attempts while waiting.
const LEASE_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Collaborators injected into a scheduler.
#[derive(Clone)]
pub struct SchedulerDeps {
    /// Batch persistence.
    pub store: Arc<dyn BatchStore>,
    /// Batch leases; usually the same object as `store`.
    pub leases: Arc<dyn LeaseStore>,
    /// Ingested activities.
    pub source: Arc<dyn ActivitySource>,
    /// Emissions engine.
    pub engine: Arc<Engine>,
    /// Audit event sink.
    pub audit: Arc<dyn AuditSink>,
}

/// What one poll did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// In-flight batches with lapsed leases moved to Failed.
    pub orphans_recovered: usize,
    /// Pending batches returned by the store.
    pub pending_seen: usize,
    /// Batches handed to the worker pool.
    pub dispatched: usize,
    /// Batches skipped because their lease was held elsewhere.
    pub lock_timeouts: usize,
}

type BatchPool = WorkerPool<BatchAssignment, BatchRunReport, BatchProcessor>;

/// Batch scheduler.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct BatchScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    store: Arc<dyn BatchStore>,
    leases: Arc<dyn LeaseStore>,
    audit: Arc<dyn AuditSink>,
    config: SchedulerConfig,
    worker_id: String,
    pool: BatchPool,
    counters: Arc<SchedulerCounters>,
    running: AtomicBool,
    stop: Notify,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    in_flight: Mutex<HashMap<String, Arc<AtomicBool>>>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("worker_id", &self.inner.worker_id)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl BatchScheduler {
    /// Create a scheduler and its worker pool. Polling starts with
    /// [`start`](Self::start); submissions are accepted immediately.
    ///
    /// # Errors
    ///
    /// `Config` for invalid configuration; `Pool` if the worker threads
    /// cannot be spawned.
    pub fn new(
        deps: SchedulerDeps,
        config: SchedulerConfig,
        pool_config: WorkerPoolConfig,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::Config)?;
        let worker_id = generate_worker_id(&config.worker_id_prefix);
        let counters = Arc::new(SchedulerCounters::default());
        let processor = BatchProcessor::new(
            Arc::clone(&deps.store),
            Arc::clone(&deps.leases),
            deps.source,
            deps.engine,
            Arc::clone(&deps.audit),
            config.clone(),
            Arc::clone(&counters),
            worker_id.clone(),
        );
        let pool = WorkerPool::new(pool_config, processor)?;

        info!(
            worker_id = %worker_id,
            poll_interval_ms = config.poll_interval_ms,
            max_batches_per_poll = config.max_batches_per_poll,
            "Batch scheduler created"
        );

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                store: deps.store,
                leases: deps.leases,
                audit: deps.audit,
                config,
                worker_id,
                pool,
                counters,
                running: AtomicBool::new(false),
                stop: Notify::new(),
                poll_task: Mutex::new(None),
                in_flight: Mutex::new(HashMap::new()),
                watchers: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Identifier used for leases and audit events.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    /// Scheduler configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Submit a batch with default priority.
    ///
    /// # Errors
    ///
    /// `Validation` for an invalid request; `Persistence` on store failure.
    pub async fn submit_batch(
        &self,
        org_id: &str,
        workspace_id: &str,
        activity_ids: Vec<String>,
        max_retries: u32,
    ) -> Result<String, SchedulerError> {
        self.submit(BatchSubmission {
            org_id: org_id.to_owned(),
            workspace_id: workspace_id.to_owned(),
            activity_ids,
            max_retries: Some(max_retries),
            priority: None,
        })
        .await
    }

    /// Submit a batch; returns its id. The batch is Pending until a poll
    /// picks it up.
    ///
    /// # Errors
    ///
    /// `Validation` for an invalid request; `Persistence` on store failure.
    pub async fn submit(&self, submission: BatchSubmission) -> Result<String, SchedulerError> {
        let config = &self.inner.config;
        let max_retries = self.validate_submission(&submission)?;

        let job = BatchJob::new(generate_batch_id(), submission, max_retries, now());
        let batch_id = job.id.clone();
        let org_id = job.org_id.clone();
        let activity_count = job.activity_count;
        self.inner.store.create_batch(job).await?;

        self.inner.audit.record(
            build_audit_event(&batch_id, &org_id, &self.inner.worker_id, AuditAction::Submitted)
                .with_detail(format!("{activity_count} activities")),
        );
        debug!(
            batch_id = %batch_id,
            org_id = %org_id,
            activity_count,
            max_retries,
            retries_limit = config.max_retries_limit,
            "Batch submitted"
        );
        Ok(batch_id)
    }

    fn validate_submission(&self, submission: &BatchSubmission) -> Result<u32, SchedulerError> {
        let config = &self.inner.config;
        if submission.org_id.trim().is_empty() {
            return Err(SchedulerError::Validation("org_id must not be empty".into()));
        }
        if submission.activity_ids.is_empty() {
            return Err(SchedulerError::Validation("activity_ids cannot be empty".into()));
        }
        if submission.activity_ids.len() > config.max_activities_per_batch {
            return Err(SchedulerError::Validation(format!(
                "batch has {} activities, limit is {}",
                submission.activity_ids.len(),
                config.max_activities_per_batch
            )));
        }
        let mut seen = HashSet::with_capacity(submission.activity_ids.len());
        for id in &submission.activity_ids {
            if id.trim().is_empty() {
                return Err(SchedulerError::Validation("activity ids must not be blank".into()));
            }
            if !seen.insert(id.as_str()) {
                return Err(SchedulerError::Validation(format!("duplicate activity id `{id}`")));
            }
        }
        let max_retries = submission.max_retries.unwrap_or(config.default_max_retries);
        if max_retries > config.max_retries_limit {
            return Err(SchedulerError::Validation(format!(
                "max_retries {max_retries} exceeds limit {}",
                config.max_retries_limit
            )));
        }
        Ok(max_retries)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Fetch a batch owned by `org_id`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the batch does not exist or belongs to another org.
    pub async fn get_batch(&self, org_id: &str, batch_id: &str) -> Result<BatchJob, SchedulerError> {
        let job = self.inner.store.get_batch(batch_id).await?;
        if job.org_id != org_id {
            return Err(SchedulerError::NotFound(format!("batch {batch_id}")));
        }
        Ok(job)
    }

    /// List an org's batches, newest first.
    ///
    /// # Errors
    ///
    /// `Persistence` on store failure.
    pub async fn list_batches(&self, org_id: &str, filter: &BatchFilter) -> Result<Vec<BatchJob>, SchedulerError> {
        self.inner.store.list_batches(org_id, filter).await
    }

    /// Progress of a batch.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown or foreign batches.
    pub async fn get_progress(&self, org_id: &str, batch_id: &str) -> Result<ProgressSnapshot, SchedulerError> {
        let job = self.get_batch(org_id, batch_id).await?;
        Ok(ProgressSnapshot::of(&job, now()))
    }

    /// Transition history of a batch.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown or foreign batches.
    pub async fn progress_log(&self, org_id: &str, batch_id: &str) -> Result<Vec<ProgressLogEntry>, SchedulerError> {
        self.get_batch(org_id, batch_id).await?;
        self.inner.store.progress_log(batch_id).await
    }

    /// Emission records of a batch's current attempt.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown or foreign batches.
    pub async fn list_records(&self, org_id: &str, batch_id: &str) -> Result<Vec<EmissionRecord>, SchedulerError> {
        self.get_batch(org_id, batch_id).await?;
        self.inner.store.list_records(batch_id).await
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Cancel a Pending or Queued batch.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown or foreign batches; `Conflict` if the batch is
    /// Processing or terminal.
    pub async fn cancel_batch(&self, org_id: &str, batch_id: &str) -> Result<BatchJob, SchedulerError> {
        let job = self.get_batch(org_id, batch_id).await?;
        if !matches!(job.status, BatchStatus::Pending | BatchStatus::Queued) {
            return Err(SchedulerError::Conflict(format!(
                "batch {batch_id} is {} and cannot be cancelled",
                job.status
            )));
        }
        let cancelled = self
            .inner
            .store
            .update_batch_status(
                batch_id,
                job.status,
                BatchStatus::Cancelled,
                TransitionPatch {
                    error_message: Some("cancelled by request".into()),
                    final_progress: Some(BatchProgress::default().settled(job.activity_count)),
                },
            )
            .await?;
        self.inner.counters.record_cancel();
        self.inner.audit.record(
            build_audit_event(batch_id, org_id, &self.inner.worker_id, AuditAction::Cancelled)
                .with_transition(job.status, BatchStatus::Cancelled),
        );
        info!(batch_id = %batch_id, from = %job.status, "Batch cancelled");
        Ok(cancelled)
    }

    /// Return a Failed batch with retry budget to Pending.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown or foreign batches; `Conflict` if the batch is
    /// not Failed or has no retries left.
    pub async fn retry_batch(&self, org_id: &str, batch_id: &str) -> Result<BatchJob, SchedulerError> {
        let job = self.get_batch(org_id, batch_id).await?;
        if !job.can_retry() {
            return Err(SchedulerError::Conflict(format!(
                "batch {batch_id} is {} with {} of {} retries used",
                job.status, job.retry_count, job.max_retries
            )));
        }
        let retried = schedule_retry(
            self.inner.store.as_ref(),
            self.inner.audit.as_ref(),
            &self.inner.counters,
            &job,
            &self.inner.worker_id,
        )
        .await;
        if !retried {
            return Err(SchedulerError::Conflict(format!("batch {batch_id} changed state")));
        }
        self.inner.store.get_batch(batch_id).await
    }

    /// Delete a terminal batch with its records and history.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown or foreign batches; `Conflict` if the batch is
    /// not terminal.
    pub async fn delete_batch(&self, org_id: &str, batch_id: &str) -> Result<(), SchedulerError> {
        self.get_batch(org_id, batch_id).await?;
        self.inner.store.delete_batch(batch_id).await?;
        info!(batch_id = %batch_id, "Batch deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Whether the poll loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Start the poll loop on the current tokio runtime. The first poll runs
    /// immediately.
    ///
    /// # Errors
    ///
    /// `Conflict` if already running; `Config` outside a tokio runtime.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SchedulerError::Config(format!("start requires a tokio runtime: {e}")))?;
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::Conflict("scheduler already running".into()));
        }

        let scheduler = self.clone();
        let handle = runtime.spawn(async move { scheduler.poll_loop().await });
        *self.inner.poll_task.lock() = Some(handle);

        info!(
            worker_id = %self.inner.worker_id,
            workers = self.inner.pool.stats().worker_count,
            poll_interval_ms = self.inner.config.poll_interval_ms,
            "Batch scheduler started"
        );
        Ok(())
    }

    async fn poll_loop(&self) {
        loop {
            match self.poll_once().await {
                Ok(summary) if summary.dispatched > 0 || summary.orphans_recovered > 0 => {
                    debug!(?summary, "Poll finished");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Poll failed"),
            }

            let delay = self.next_delay();
            self.inner.counters.set_next_poll(now() + to_chrono(delay));
            // A stale stop permit only triggers an early poll
            tokio::select! {
                () = self.inner.stop.notified() => {}
                () = tokio::time::sleep(delay) => {}
            }
            if !self.is_running() {
                break;
            }
        }
        info!(worker_id = %self.inner.worker_id, "Poll loop stopped");
    }

    fn next_delay(&self) -> Duration {
        let config = &self.inner.config;
        let jitter = if config.poll_jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=config.poll_jitter_ms)
        };
        Duration::from_millis(config.poll_interval_ms + jitter)
    }

    /// Stop polling and wait up to `drain_timeout_ms` for in-flight batches.
    /// A no-op when not running.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!(worker_id = %self.inner.worker_id, "Stopping batch scheduler");
        self.inner.stop.notify_one();

        let poll_task = self.inner.poll_task.lock().take();
        if let Some(task) = poll_task {
            if let Err(e) = task.await {
                warn!(error = %e, "Poll task ended abnormally");
            }
        }

        let watchers: Vec<JoinHandle<()>> = self.inner.watchers.lock().drain(..).collect();
        let pending = watchers.len();
        let drained = tokio::time::timeout(
            self.inner.config.drain_timeout(),
            futures::future::join_all(watchers),
        )
        .await;
        match drained {
            Ok(_) => info!(drained = pending, "Batch scheduler stopped"),
            Err(_) => warn!(
                in_flight = self.inner.in_flight.lock().len(),
                "Drain timed out; batches keep running on the worker pool"
            ),
        }
    }

    /// Stop, drain, then shut the worker pool down. The scheduler cannot be
    /// restarted afterwards.
    pub async fn shutdown(&self) {
        self.stop().await;
        let scheduler = self.clone();
        let joined = tokio::task::spawn_blocking(move || scheduler.inner.pool.shutdown()).await;
        if let Err(e) = joined {
            warn!(error = %e, "Worker pool shutdown panicked");
        }
    }

    /// Stop polling and ask in-flight workers to cancel between activities.
    /// Returns without waiting; affected batches end as Cancelled.
    pub fn abort(&self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.stop.notify_one();
        if let Some(task) = self.inner.poll_task.lock().take() {
            task.abort();
        }
        let in_flight = self.inner.in_flight.lock();
        for flag in in_flight.values() {
            flag.store(true, Ordering::Release);
        }
        warn!(in_flight = in_flight.len(), "Batch scheduler aborted");
    }

    /// Wait until no batch dispatched by this scheduler is in flight, or
    /// `timeout` elapses. Returns whether everything finished.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let watchers: Vec<JoinHandle<()>> = self.inner.watchers.lock().drain(..).collect();
        tokio::time::timeout(timeout, futures::future::join_all(watchers))
            .await
            .is_ok()
    }

    /// Statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.inner.counters.snapshot(self.inner.pool.stats())
    }

    /// Health summary; `degraded` when not running or the worker pool is
    /// shut down.
    #[must_use]
    pub fn health(&self) -> HealthStatus {
        let stats = self.stats();
        let running = self.is_running();
        let healthy = running && !self.inner.pool.is_shutdown();
        HealthStatus {
            status: if healthy { "healthy" } else { "degraded" }.to_owned(),
            scheduler_running: running,
            batches_processed: stats.batches_processed,
            workers_active: stats.workers.busy_workers,
            pending_batches: stats.pending_batches,
            total_emissions_kg_co2e: stats.total_emissions_kg_co2e,
            timestamp: now(),
        }
    }

    // ------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------

    /// Run one poll: recover orphans, then lease and dispatch Pending
    /// batches while worker slots are free.
    ///
    /// # Errors
    ///
    /// `Persistence` if the store cannot be listed.
    pub async fn poll_once(&self) -> Result<PollSummary, SchedulerError> {
        let mut summary = PollSummary::default();
        self.inner.watchers.lock().retain(|h| !h.is_finished());

        if self.inner.config.recover_orphans {
            summary.orphans_recovered = self.recover_orphans().await?;
        }

        let slots = self.inner.pool.available_slots();
        let limit = self.inner.config.max_batches_per_poll.min(slots);
        if limit == 0 {
            self.inner.counters.record_poll(now(), 0);
            debug!("No free worker slots; skipping dispatch");
            return Ok(summary);
        }

        let pending = self.inner.store.list_pending(limit).await?;
        summary.pending_seen = pending.len();
        self.inner.counters.record_poll(now(), pending.len());

        for job in pending {
            let Some(lease) = self.acquire_lease(&job).await? else {
                summary.lock_timeouts += 1;
                continue;
            };
            match self.dispatch(&job, lease).await {
                Ok(()) => summary.dispatched += 1,
                Err(SchedulerError::Pool(PoolError::AtCapacity { .. })) => break,
                Err(e) => debug!(batch_id = %job.id, error = %e, "Batch not dispatched"),
            }
        }
        Ok(summary)
    }

    async fn acquire_lease(&self, job: &BatchJob) -> Result<Option<Lease>, SchedulerError> {
        let inner = &self.inner;
        let wait = inner.config.lock_wait();
        let started = Instant::now();
        loop {
            if let Some(lease) = inner
                .leases
                .acquire_lease(&job.id, &inner.worker_id, inner.config.lease_ttl())
                .await?
            {
                inner.audit.record(build_audit_event(
                    &job.id,
                    &job.org_id,
                    &inner.worker_id,
                    AuditAction::LockAcquired,
                ));
                return Ok(Some(lease));
            }
            let waited = started.elapsed();
            if waited >= wait {
                let waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
                let timeout = SchedulerError::LockTimeout {
                    batch_id: job.id.clone(),
                    waited_ms,
                };
                inner.counters.record_lock_timeout();
                inner.audit.record(
                    build_audit_event(&job.id, &job.org_id, &inner.worker_id, AuditAction::LockTimedOut)
                        .with_detail(timeout.to_string()),
                );
                warn!(batch_id = %job.id, waited_ms, "Batch lease held elsewhere; skipping until next poll");
                return Ok(None);
            }
            tokio::time::sleep(LEASE_RETRY_INTERVAL.min(wait - waited)).await;
        }
    }

    async fn dispatch(&self, job: &BatchJob, lease: Lease) -> Result<(), SchedulerError> {
        let inner = &self.inner;
        let queued = inner
            .store
            .update_batch_status(&job.id, BatchStatus::Pending, BatchStatus::Queued, TransitionPatch::default())
            .await;
        if let Err(e) = queued {
            self.release(&lease).await;
            return Err(e);
        }
        inner.audit.record(
            build_audit_event(&job.id, &job.org_id, &inner.worker_id, AuditAction::StateTransition)
                .with_transition(BatchStatus::Pending, BatchStatus::Queued),
        );

        let cancel = Arc::new(AtomicBool::new(false));
        let assignment = BatchAssignment {
            batch_id: job.id.clone(),
            org_id: job.org_id.clone(),
            lease: lease.clone(),
            cancel: Arc::clone(&cancel),
        };
        // Register before submitting so an abort racing the hand-off is seen
        inner.in_flight.lock().insert(job.id.clone(), cancel);

        match inner.pool.submit(assignment, job.id.clone()) {
            Ok(rx) => {
                let scheduler = self.clone();
                let batch_id = job.id.clone();
                let watcher = tokio::spawn(async move {
                    let mut rx = rx;
                    // Renewal covers the wait in the pool queue; the worker
                    // renews the same lease once it starts
                    let report = tokio::select! {
                        report = &mut rx => report,
                        lost = scheduler.hold_lease(lease) => {
                            debug!(batch_id = %batch_id, error = %lost, "Stopped renewing dispatched lease");
                            rx.await
                        }
                    };
                    match report {
                        Ok(report) => debug!(
                            batch_id = %report.batch_id,
                            status = ?report.final_status,
                            retry_scheduled = report.retry_scheduled,
                            "Worker returned batch"
                        ),
                        // The lease lapses and orphan recovery takes over
                        Err(_) => error!(batch_id = %batch_id, "Worker dropped batch without a report"),
                    }
                    scheduler.inner.in_flight.lock().remove(&batch_id);
                });
                inner.watchers.lock().push(watcher);
                debug!(batch_id = %job.id, "Batch dispatched");
                Ok(())
            }
            Err(e) => {
                inner.in_flight.lock().remove(&job.id);
                warn!(batch_id = %job.id, error = %e, "Worker pool rejected batch; returning it to Pending");
                if let Err(revert) = inner
                    .store
                    .update_batch_status(&job.id, BatchStatus::Queued, BatchStatus::Pending, TransitionPatch::default())
                    .await
                {
                    warn!(batch_id = %job.id, error = %revert, "Could not return batch to Pending");
                }
                self.release(&lease).await;
                Err(e.into())
            }
        }
    }

    /// Renew a dispatched batch's lease every third of its TTL; returns only
    /// once renewal fails.
    async fn hold_lease(&self, mut lease: Lease) -> SchedulerError {
        let ttl = self.inner.config.lease_ttl();
        let period = (ttl / 3).max(Duration::from_millis(1));
        loop {
            tokio::time::sleep(period).await;
            match self.inner.leases.renew_lease(&lease, ttl).await {
                Ok(renewed) => lease = renewed,
                Err(e) => return e,
            }
        }
    }

    async fn recover_orphans(&self) -> Result<usize, SchedulerError> {
        let inner = &self.inner;
        let mut recovered = 0;
        for job in inner.store.list_in_flight().await? {
            let dispatched_here = inner.in_flight.lock().contains_key(&job.id);
            if dispatched_here || inner.leases.current_lease(&job.id).await?.is_some() {
                continue;
            }
            let progress = job.progress().settled(job.activity_count);
            let failed = inner
                .store
                .update_batch_status(
                    &job.id,
                    job.status,
                    BatchStatus::Failed,
                    TransitionPatch {
                        error_message: Some("lease expired".into()),
                        final_progress: Some(progress),
                    },
                )
                .await;
            let failed = match failed {
                Ok(failed) => failed,
                Err(e) => {
                    debug!(batch_id = %job.id, error = %e, "Orphan moved on before recovery");
                    continue;
                }
            };
            recovered += 1;
            inner.counters.record_orphan();
            inner.counters.record_failure();
            inner.audit.record(
                build_audit_event(&job.id, &job.org_id, &inner.worker_id, AuditAction::OrphanRecovered)
                    .with_transition(job.status, BatchStatus::Failed),
            );
            warn!(batch_id = %job.id, from = %job.status, "Recovered orphaned batch");
            if failed.can_retry() {
                schedule_retry(
                    inner.store.as_ref(),
                    inner.audit.as_ref(),
                    &inner.counters,
                    &failed,
                    &inner.worker_id,
                )
                .await;
            }
        }
        Ok(recovered)
    }

    async fn release(&self, lease: &Lease) {
        if let Err(e) = self.inner.leases.release_lease(lease).await {
            warn!(batch_id = %lease.batch_id, error = %e, "Failed to release lease");
        }
    }
}
