//! File-backed batch store.
//!
//! The whole store is kept in memory and written to a single JSON snapshot
//! after every mutation. Writes go to a temporary sibling file which is then
//! renamed over the snapshot, so a crash leaves either the old or the new
//! contents. Leases are process-local.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::core::batch::{
    ActivityOutcome, BatchFilter, BatchJob, BatchProgress, BatchStatus, ProgressLogEntry, TransitionPatch,
};
use crate::core::error::SchedulerError;
use crate::core::store::{BatchStore, Lease, LeaseStore};
use crate::emissions::model::EmissionRecord;
use crate::util::clock::now;

use super::{LeaseTable, StoreState};

fn persistence(e: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Persistence(e.to_string())
}

/// Batch store persisted as a JSON snapshot file.
#[derive(Debug)]
pub struct FileBatchStore {
    path: PathBuf,
    state: Mutex<StoreState>,
    leases: Mutex<LeaseTable>,
}

impl FileBatchStore {
    /// Open the store at `path`, loading an existing snapshot and creating
    /// the parent directory when needed.
    ///
    /// # Errors
    ///
    /// `Persistence` if the directory cannot be created or the snapshot
    /// cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(persistence)?;
        }
        let state = if path.exists() {
            let file = File::open(&path).map_err(persistence)?;
            serde_json::from_reader(BufReader::new(file)).map_err(persistence)?
        } else {
            StoreState::default()
        };
        info!(path = %path.display(), batches = state.len(), "Opened file batch store");
        Ok(Self {
            path,
            state: Mutex::new(state),
            leases: Mutex::new(LeaseTable::default()),
        })
    }

    /// Snapshot location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_snapshot(&self, state: &StoreState) -> Result<(), SchedulerError> {
        let tmp = self.path.with_extension("json.tmp");
        let file = File::create(&tmp).map_err(persistence)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, state).map_err(persistence)?;
        writer.flush().map_err(persistence)?;
        fs::rename(&tmp, &self.path).map_err(persistence)?;
        debug!(path = %self.path.display(), "Wrote store snapshot");
        Ok(())
    }

    /// Apply `f` to a copy of the state and publish it only once the copy is
    /// on disk.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, SchedulerError>,
    ) -> Result<T, SchedulerError> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let out = f(&mut next)?;
        self.write_snapshot(&next)?;
        *state = next;
        Ok(out)
    }
}

#[async_trait]
impl BatchStore for FileBatchStore {
    async fn create_batch(&self, job: BatchJob) -> Result<(), SchedulerError> {
        self.mutate(|s| s.create(job))
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
        self.mutate(|s| s.transition(batch_id, from, to, patch, now()))
    }

    async fn record_outcome(
        &self,
        batch_id: &str,
        attempt: u32,
        outcome: ActivityOutcome,
    ) -> Result<BatchProgress, SchedulerError> {
        self.mutate(|s| s.record(batch_id, attempt, outcome, now()))
    }

    async fn list_records(&self, batch_id: &str) -> Result<Vec<EmissionRecord>, SchedulerError> {
        self.state.lock().records(batch_id)
    }

    async fn progress_log(&self, batch_id: &str) -> Result<Vec<ProgressLogEntry>, SchedulerError> {
        self.state.lock().progress_log(batch_id)
    }

    async fn delete_batch(&self, batch_id: &str) -> Result<(), SchedulerError> {
        self.mutate(|s| s.delete(batch_id))
    }
}

#[async_trait]
impl LeaseStore for FileBatchStore {
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
