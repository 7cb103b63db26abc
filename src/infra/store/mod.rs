//! Batch and lease store adapters.
//!
//! Both adapters share [`StoreState`], which implements the state-machine
//! bookkeeping over plain maps, and [`LeaseTable`] for leases.

pub mod file;
pub mod memory;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::batch::{
    ActivityOutcome, BatchFilter, BatchJob, BatchProgress, BatchStatus, ProgressLogEntry, TransitionPatch,
};
use crate::core::error::SchedulerError;
use crate::core::store::Lease;
use crate::emissions::model::EmissionRecord;
use crate::util::clock::to_chrono;

pub use file::FileBatchStore;
pub use memory::InMemoryBatchStore;

fn not_found(batch_id: &str) -> SchedulerError {
    SchedulerError::NotFound(format!("batch {batch_id}"))
}

/// Serializable store contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    batches: HashMap<String, BatchJob>,
    #[serde(default)]
    records: HashMap<String, Vec<EmissionRecord>>,
    #[serde(default)]
    log: HashMap<String, Vec<ProgressLogEntry>>,
}

impl StoreState {
    pub(crate) fn create(&mut self, job: BatchJob) -> Result<(), SchedulerError> {
        if self.batches.contains_key(&job.id) {
            return Err(SchedulerError::Conflict(format!("batch {} already exists", job.id)));
        }
        self.log
            .entry(job.id.clone())
            .or_default()
            .push(ProgressLogEntry::after(&job, None));
        self.batches.insert(job.id.clone(), job);
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.batches.len()
    }

    pub(crate) fn get(&self, batch_id: &str) -> Result<BatchJob, SchedulerError> {
        self.batches.get(batch_id).cloned().ok_or_else(|| not_found(batch_id))
    }

    pub(crate) fn list(&self, org_id: &str, filter: &BatchFilter) -> Vec<BatchJob> {
        let filter = filter.clone().normalized();
        let mut jobs: Vec<&BatchJob> = self
            .batches
            .values()
            .filter(|j| j.org_id == org_id && filter.status.is_none_or(|s| j.status == s))
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        jobs.into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .cloned()
            .collect()
    }

    pub(crate) fn pending(&self, limit: usize) -> Vec<BatchJob> {
        let mut jobs: Vec<&BatchJob> = self
            .batches
            .values()
            .filter(|j| j.status == BatchStatus::Pending)
            .collect();
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        jobs.into_iter().take(limit).cloned().collect()
    }

    pub(crate) fn in_flight(&self) -> Vec<BatchJob> {
        self.batches
            .values()
            .filter(|j| matches!(j.status, BatchStatus::Queued | BatchStatus::Processing))
            .cloned()
            .collect()
    }

    pub(crate) fn transition(
        &mut self,
        batch_id: &str,
        from: BatchStatus,
        to: BatchStatus,
        patch: TransitionPatch,
        at: DateTime<Utc>,
    ) -> Result<BatchJob, SchedulerError> {
        let job = self.batches.get_mut(batch_id).ok_or_else(|| not_found(batch_id))?;
        job.apply_transition(from, to, patch, at)?;
        if to == BatchStatus::Processing {
            self.records.remove(batch_id);
        }
        let job = job.clone();
        self.log
            .entry(batch_id.to_owned())
            .or_default()
            .push(ProgressLogEntry::after(&job, Some(from)));
        Ok(job)
    }

    pub(crate) fn record(
        &mut self,
        batch_id: &str,
        attempt: u32,
        outcome: ActivityOutcome,
        at: DateTime<Utc>,
    ) -> Result<BatchProgress, SchedulerError> {
        let job = self.batches.get_mut(batch_id).ok_or_else(|| not_found(batch_id))?;
        if job.status != BatchStatus::Processing {
            return Err(SchedulerError::Conflict(format!(
                "batch {batch_id} is {}, not processing",
                job.status
            )));
        }
        if job.retry_count != attempt {
            return Err(SchedulerError::Conflict(format!(
                "stale write for batch {batch_id}: attempt {attempt}, current {}",
                job.retry_count
            )));
        }
        if job.processed_count() >= job.activity_count {
            return Err(SchedulerError::Conflict(format!(
                "batch {batch_id} already accounted for all {} activities",
                job.activity_count
            )));
        }

        match outcome {
            ActivityOutcome::Success(record) => {
                job.success_count += 1;
                job.total_emissions_kg_co2e += record.emissions_kg_co2e;
                self.records.entry(batch_id.to_owned()).or_default().push(*record);
            }
            ActivityOutcome::Failure { activity_id, error } => {
                job.error_count += 1;
                if let Some(error) = error {
                    job.error_summary.push(format!("{activity_id}: {error}"));
                }
            }
        }
        job.updated_at = at;
        Ok(job.progress())
    }

    pub(crate) fn records(&self, batch_id: &str) -> Result<Vec<EmissionRecord>, SchedulerError> {
        if !self.batches.contains_key(batch_id) {
            return Err(not_found(batch_id));
        }
        Ok(self.records.get(batch_id).cloned().unwrap_or_default())
    }

    pub(crate) fn progress_log(&self, batch_id: &str) -> Result<Vec<ProgressLogEntry>, SchedulerError> {
        if !self.batches.contains_key(batch_id) {
            return Err(not_found(batch_id));
        }
        Ok(self.log.get(batch_id).cloned().unwrap_or_default())
    }

    pub(crate) fn delete(&mut self, batch_id: &str) -> Result<(), SchedulerError> {
        let job = self.batches.get(batch_id).ok_or_else(|| not_found(batch_id))?;
        if !job.status.is_terminal() {
            return Err(SchedulerError::Conflict(format!(
                "batch {batch_id} is {} and cannot be deleted",
                job.status
            )));
        }
        self.batches.remove(batch_id);
        self.records.remove(batch_id);
        self.log.remove(batch_id);
        Ok(())
    }
}

/// Process-local lease table.
#[derive(Debug, Default)]
pub(crate) struct LeaseTable {
    leases: HashMap<String, Lease>,
}

impl LeaseTable {
    pub(crate) fn acquire(
        &mut self,
        batch_id: &str,
        worker_id: &str,
        ttl: Duration,
        at: DateTime<Utc>,
    ) -> Option<Lease> {
        if self.leases.get(batch_id).is_some_and(|l| !l.is_expired_at(at)) {
            return None;
        }
        let lease = Lease {
            batch_id: batch_id.to_owned(),
            worker_id: worker_id.to_owned(),
            token: Uuid::new_v4(),
            expires_at: at + to_chrono(ttl),
        };
        self.leases.insert(batch_id.to_owned(), lease.clone());
        Some(lease)
    }

    pub(crate) fn renew(&mut self, lease: &Lease, ttl: Duration, at: DateTime<Utc>) -> Result<Lease, SchedulerError> {
        match self.leases.get_mut(&lease.batch_id) {
            Some(current) if current.token == lease.token && !current.is_expired_at(at) => {
                current.expires_at = at + to_chrono(ttl);
                Ok(current.clone())
            }
            _ => Err(SchedulerError::LeaseLost(lease.batch_id.clone())),
        }
    }

    pub(crate) fn release(&mut self, lease: &Lease) {
        if self
            .leases
            .get(&lease.batch_id)
            .is_some_and(|current| current.token == lease.token)
        {
            self.leases.remove(&lease.batch_id);
        }
    }

    pub(crate) fn current(&self, batch_id: &str, at: DateTime<Utc>) -> Option<Lease> {
        self.leases
            .get(batch_id)
            .filter(|l| !l.is_expired_at(at))
            .cloned()
    }
}
