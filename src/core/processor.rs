//! Batch processing on worker threads.
//!
//! A [`BatchProcessor`] runs one leased batch to a terminal state:
//!
//! 1. the lease is confirmed, then `Queued -> Processing` (fails harmlessly
//!    if the batch was cancelled meanwhile);
//! 2. every activity is fetched from the [`ActivitySource`] and calculated by
//!    the [`Engine`], with at most `max_batch_concurrency` in flight, and its
//!    outcome is written to the store under the current attempt;
//! 3. the lease is renewed every third of its TTL for the whole run;
//! 4. the deterministic aggregate (summed in submission order) is written
//!    with the terminal transition, the lease is released, and a Failed batch
//!    with retry budget goes straight back to Pending.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::batch::{ActivityOutcome, BatchJob, BatchProgress, BatchStatus, TransitionPatch};
use crate::core::error::{CalculationError, SchedulerError};
use crate::core::executor::{JobMeta, WorkerExecutor};
use crate::core::stats::SchedulerCounters;
use crate::core::store::{ActivitySource, BatchStore, Lease, LeaseStore};
use crate::emissions::engine::Engine;
use crate::emissions::model::EmissionRecord;

/// A leased batch handed to a worker.
#[derive(Debug, Clone)]
pub struct BatchAssignment {
    /// Batch to process.
    pub batch_id: String,
    /// Owning organization, for audit events.
    pub org_id: String,
    /// Lease acquired by the scheduler.
    pub lease: Lease,
    /// Set by the scheduler to request cooperative cancellation.
    pub cancel: Arc<AtomicBool>,
}

/// What a worker did with an assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRunReport {
    /// Processed batch.
    pub batch_id: String,
    /// Terminal status reached, `None` if the batch never entered Processing.
    pub final_status: Option<BatchStatus>,
    /// Final counters of the attempt.
    pub progress: BatchProgress,
    /// Whether the batch was returned to Pending for another attempt.
    pub retry_scheduled: bool,
    /// Batch-level error, if any.
    pub error: Option<String>,
}

impl BatchRunReport {
    fn skipped(batch_id: String, error: &SchedulerError) -> Self {
        Self {
            batch_id,
            final_status: None,
            progress: BatchProgress::default(),
            retry_scheduled: false,
            error: Some(error.to_string()),
        }
    }
}

/// Counters of one attempt, folded in submission order.
#[derive(Debug, Default)]
struct AttemptTally {
    progress: BatchProgress,
    cancelled: bool,
}

/// Worker-side batch executor.
#[derive(Clone)]
pub struct BatchProcessor {
    inner: Arc<ProcessorInner>,
}

struct ProcessorInner {
    store: Arc<dyn BatchStore>,
    leases: Arc<dyn LeaseStore>,
    source: Arc<dyn ActivitySource>,
    engine: Arc<Engine>,
    audit: Arc<dyn AuditSink>,
    config: SchedulerConfig,
    counters: Arc<SchedulerCounters>,
    worker_id: String,
}

impl std::fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("worker_id", &self.inner.worker_id)
            .finish_non_exhaustive()
    }
}

impl BatchProcessor {
    /// Create a processor.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<dyn BatchStore>,
        leases: Arc<dyn LeaseStore>,
        source: Arc<dyn ActivitySource>,
        engine: Arc<Engine>,
        audit: Arc<dyn AuditSink>,
        config: SchedulerConfig,
        counters: Arc<SchedulerCounters>,
        worker_id: String,
    ) -> Self {
        Self {
            inner: Arc::new(ProcessorInner {
                store,
                leases,
                source,
                engine,
                audit,
                config,
                counters,
                worker_id,
            }),
        }
    }

    /// Run one assignment to completion.
    pub async fn run(&self, assignment: BatchAssignment, worker: &str) -> BatchRunReport {
        let BatchAssignment {
            batch_id,
            org_id,
            lease,
            cancel,
        } = assignment;
        let inner = &self.inner;
        inner
            .audit
            .record(build_audit_event(&batch_id, &org_id, worker, AuditAction::WorkerBusy));

        // The lease may have lapsed while the batch waited in the pool queue
        let lease = match inner.leases.renew_lease(&lease, inner.config.lease_ttl()).await {
            Ok(renewed) => renewed,
            Err(e) => {
                warn!(batch_id = %batch_id, error = %e, "Lease lost before processing; leaving batch to recovery");
                inner
                    .audit
                    .record(build_audit_event(&batch_id, &org_id, worker, AuditAction::WorkerIdle));
                return BatchRunReport::skipped(batch_id, &e);
            }
        };

        let report = match inner
            .store
            .update_batch_status(
                &batch_id,
                BatchStatus::Queued,
                BatchStatus::Processing,
                TransitionPatch::default(),
            )
            .await
        {
            Ok(job) => {
                self.transitioned(&job, BatchStatus::Queued, worker);
                info!(
                    batch_id = %batch_id,
                    worker = worker,
                    activity_count = job.activity_count,
                    attempt = job.retry_count,
                    "Processing batch"
                );
                let outcome = tokio::select! {
                    outcome = self.process_activities(&job, &cancel, worker) => outcome,
                    lost = self.keep_lease(lease.clone()) => Err(lost),
                };
                self.finish(&job, outcome, &lease, worker).await
            }
            Err(e) => {
                // Typically a cancel that won the race for the Queued batch
                warn!(batch_id = %batch_id, error = %e, "Batch not accepted for processing");
                self.release(&lease).await;
                BatchRunReport::skipped(batch_id.clone(), &e)
            }
        };

        inner
            .audit
            .record(build_audit_event(&batch_id, &org_id, worker, AuditAction::WorkerIdle));
        report
    }

    /// Renew `lease` every third of its TTL; returns only once renewal fails.
    async fn keep_lease(&self, mut lease: Lease) -> SchedulerError {
        let ttl = self.inner.config.lease_ttl();
        let period = (ttl / 3).max(Duration::from_millis(1));
        loop {
            tokio::time::sleep(period).await;
            match self.inner.leases.renew_lease(&lease, ttl).await {
                Ok(renewed) => {
                    debug!(batch_id = %renewed.batch_id, "Lease renewed");
                    lease = renewed;
                }
                Err(e) => {
                    error!(batch_id = %lease.batch_id, error = %e, "Lease renewal failed");
                    return e;
                }
            }
        }
    }

    async fn calculate_one(&self, activity_id: &str) -> Result<EmissionRecord, CalculationError> {
        let activity = self.inner.source.get_activity(activity_id).await?;
        self.inner.engine.calculate(&activity).await
    }

    async fn process_activities(
        &self,
        job: &BatchJob,
        cancel: &AtomicBool,
        worker: &str,
    ) -> Result<AttemptTally, SchedulerError> {
        let inner = &self.inner;
        let engine_cfg = inner.engine.config();
        let concurrency = if engine_cfg.enable_parallel_batch {
            engine_cfg.max_batch_concurrency.max(1)
        } else {
            1
        };
        let attempt = job.retry_count;

        let units: Vec<(usize, String)> = job.activity_ids.iter().cloned().enumerate().collect();
        let mut results = stream::iter(units)
            .map(|(idx, activity_id)| {
                let processor = self.clone();
                let cancelled = cancel.load(Ordering::Acquire);
                async move {
                    if cancelled {
                        return (idx, activity_id, None);
                    }
                    let outcome = processor.calculate_one(&activity_id).await;
                    (idx, activity_id, Some(outcome))
                }
            })
            .buffer_unordered(concurrency);

        let mut tally = AttemptTally::default();
        let mut settled: Vec<(usize, Option<f64>)> = Vec::with_capacity(job.activity_count);
        let mut failures = 0usize;

        while let Some((idx, activity_id, outcome)) = results.next().await {
            let Some(outcome) = outcome else {
                tally.cancelled = true;
                continue;
            };
            let (store_outcome, emitted) = match outcome {
                Ok(record) => {
                    let kg = record.emissions_kg_co2e;
                    debug!(batch_id = %job.id, activity_id = %activity_id, kg_co2e = kg, "Activity calculated");
                    (ActivityOutcome::Success(Box::new(record)), Some(kg))
                }
                Err(e) => {
                    debug!(batch_id = %job.id, activity_id = %activity_id, error = %e, "Activity failed");
                    failures += 1;
                    let error = (failures <= inner.config.error_summary_limit).then(|| e.to_string());
                    (
                        ActivityOutcome::Failure {
                            activity_id: activity_id.clone(),
                            error,
                        },
                        None,
                    )
                }
            };
            inner.store.record_outcome(&job.id, attempt, store_outcome).await?;
            settled.push((idx, emitted));
            inner.audit.record(
                build_audit_event(&job.id, &job.org_id, worker, AuditAction::ActivityProcessed).with_detail(
                    format!("{activity_id}: {}", if emitted.is_some() { "ok" } else { "error" }),
                ),
            );
        }

        settled.sort_by_key(|(idx, _)| *idx);
        for (_, emitted) in settled {
            match emitted {
                Some(kg) => {
                    tally.progress.success_count += 1;
                    tally.progress.total_emissions_kg_co2e += kg;
                }
                None => tally.progress.error_count += 1,
            }
        }
        if cancel.load(Ordering::Acquire) && tally.progress.processed() < job.activity_count {
            tally.cancelled = true;
        }
        Ok(tally)
    }

    async fn finish(
        &self,
        job: &BatchJob,
        outcome: Result<AttemptTally, SchedulerError>,
        lease: &Lease,
        worker: &str,
    ) -> BatchRunReport {
        let inner = &self.inner;
        let (status, progress, message) = match outcome {
            Ok(tally) if tally.cancelled => (
                BatchStatus::Cancelled,
                tally.progress.settled(job.activity_count),
                Some("cancelled while processing".to_owned()),
            ),
            Ok(tally) => {
                let progress = tally.progress;
                let status = inner
                    .config
                    .completion_policy
                    .decide(progress.success_count, progress.error_count);
                let message = (progress.error_count > 0)
                    .then(|| failure_message(progress.error_count, job.activity_count, inner.config.error_summary_limit));
                (status, progress, message)
            }
            Err(e) => {
                error!(batch_id = %job.id, error = %e, "Batch attempt aborted");
                (BatchStatus::Failed, self.aborted_progress(job).await, Some(e.to_string()))
            }
        };

        let finished = inner
            .store
            .update_batch_status(
                &job.id,
                BatchStatus::Processing,
                status,
                TransitionPatch {
                    error_message: message.clone(),
                    final_progress: Some(progress),
                },
            )
            .await;
        self.release(lease).await;

        let finished = match finished {
            Ok(finished) => finished,
            Err(e) => {
                // Another party (orphan recovery) already moved the batch on
                warn!(batch_id = %job.id, error = %e, "Terminal transition rejected");
                return BatchRunReport {
                    batch_id: job.id.clone(),
                    final_status: None,
                    progress,
                    retry_scheduled: false,
                    error: Some(e.to_string()),
                };
            }
        };

        inner.counters.record_finish(status, &progress);
        if let Some(action) = AuditAction::for_terminal(status) {
            inner.audit.record(
                build_audit_event(&job.id, &job.org_id, worker, action)
                    .with_transition(BatchStatus::Processing, status),
            );
        }
        info!(
            batch_id = %job.id,
            status = %status,
            success_count = progress.success_count,
            error_count = progress.error_count,
            total_kg_co2e = progress.total_emissions_kg_co2e,
            "Batch finished"
        );

        let retry_scheduled = finished.can_retry() && self.schedule_retry(&finished, worker).await;
        BatchRunReport {
            batch_id: job.id.clone(),
            final_status: Some(status),
            progress,
            retry_scheduled,
            error: message,
        }
    }

    /// Counters for an attempt cut short by an infrastructure error: what was
    /// recorded so far, with every unaccounted activity counted as failed.
    async fn aborted_progress(&self, job: &BatchJob) -> BatchProgress {
        let recorded = match self.inner.store.get_batch(&job.id).await {
            Ok(current) => current.progress(),
            Err(_) => BatchProgress::default(),
        };
        recorded.settled(job.activity_count)
    }

    async fn schedule_retry(&self, job: &BatchJob, worker: &str) -> bool {
        schedule_retry(
            self.inner.store.as_ref(),
            self.inner.audit.as_ref(),
            &self.inner.counters,
            job,
            worker,
        )
        .await
    }

    async fn release(&self, lease: &Lease) {
        if let Err(e) = self.inner.leases.release_lease(lease).await {
            warn!(batch_id = %lease.batch_id, error = %e, "Failed to release lease");
        }
    }

    fn transitioned(&self, job: &BatchJob, from: BatchStatus, worker: &str) {
        self.inner.audit.record(
            build_audit_event(&job.id, &job.org_id, worker, AuditAction::StateTransition)
                .with_transition(from, job.status),
        );
    }
}

/// Move a Failed batch with retry budget back to Pending.
pub(crate) async fn schedule_retry(
    store: &dyn BatchStore,
    audit: &dyn AuditSink,
    counters: &SchedulerCounters,
    job: &BatchJob,
    worker: &str,
) -> bool {
    match store
        .update_batch_status(&job.id, BatchStatus::Failed, BatchStatus::Pending, TransitionPatch::default())
        .await
    {
        Ok(pending) => {
            counters.record_retry();
            audit.record(
                build_audit_event(&job.id, &job.org_id, worker, AuditAction::RetryScheduled)
                    .with_transition(BatchStatus::Failed, BatchStatus::Pending)
                    .with_detail(format!("attempt {} of {}", pending.retry_count, pending.max_retries)),
            );
            info!(
                batch_id = %job.id,
                retry_count = pending.retry_count,
                max_retries = pending.max_retries,
                "Batch scheduled for retry"
            );
            true
        }
        Err(e) => {
            warn!(batch_id = %job.id, error = %e, "Retry not scheduled");
            false
        }
    }
}

fn failure_message(failed: usize, total: usize, summary_limit: usize) -> String {
    if failed > summary_limit {
        format!(
            "{failed} of {total} activities failed (... and {} more)",
            failed - summary_limit
        )
    } else {
        format!("{failed} of {total} activities failed")
    }
}

#[async_trait]
impl WorkerExecutor<BatchAssignment, BatchRunReport> for BatchProcessor {
    async fn execute(&self, payload: BatchAssignment, meta: JobMeta) -> BatchRunReport {
        let worker = match meta.worker_index {
            Some(index) => format!("{}-{index}", self.inner.worker_id),
            None => self.inner.worker_id.clone(),
        };
        self.run(payload, &worker).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_mentions_overflow() {
        assert_eq!(failure_message(1, 3, 10), "1 of 3 activities failed");
        assert_eq!(
            failure_message(12, 20, 10),
            "12 of 20 activities failed (... and 2 more)"
        );
    }
}
