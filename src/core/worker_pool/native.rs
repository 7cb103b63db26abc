//! Native implementation of `WorkerPool` using OS threads.
//!
//! This implementation spawns dedicated OS threads that each have their own
//! single-threaded tokio runtime, so batch calculations do not block the
//! scheduler's runtime.
//!
//! # Design Principles
//!
//! - **No polling**: workers block on channel recv; results travel over oneshot channels
//! - **Slot admission**: a CAS on the outstanding-job counter bounds running plus queued jobs
//! - **Draining shutdown**: dropping the sender lets workers finish queued jobs, then exit

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::executor::{JobMeta, WorkerExecutor};
use crate::util::clock::now_ms;

use super::{PoolCounters, PoolError, PoolStats, WorkerTask};

/// Outstanding-job accounting shared between the pool and its workers.
#[derive(Debug)]
struct Slots {
    capacity: usize,
    taken: AtomicUsize,
}

impl Slots {
    fn try_reserve(&self) -> bool {
        self.taken
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |taken| {
                (taken < self.capacity).then_some(taken + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        let _ = self
            .taken
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |taken| taken.checked_sub(1));
    }

    fn available(&self) -> usize {
        self.capacity.saturating_sub(self.taken.load(Ordering::Acquire))
    }
}

/// Worker pool with dedicated OS threads.
///
/// Each worker thread has its own single-threaded tokio runtime and runs one
/// job at a time.
pub struct WorkerPool<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    /// Pool configuration.
    config: WorkerPoolConfig,

    /// Job sender (to workers). Option allows clean shutdown by dropping.
    task_tx: Mutex<Option<Sender<WorkerTask<P, R>>>>,

    /// Pool statistics counters (lock-free atomics).
    counters: Arc<PoolCounters>,

    /// Outstanding-job slots.
    slots: Arc<Slots>,

    /// Shutdown flag (lock-free atomic).
    shutdown: Arc<AtomicBool>,

    /// Worker thread handles.
    workers: Mutex<Vec<JoinHandle<()>>>,

    /// Job ID counter (lock-free atomic).
    job_id_counter: AtomicU64,

    /// Phantom data for executor type.
    _executor: std::marker::PhantomData<E>,
}

impl<P, R, E> WorkerPool<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    /// Create a new worker pool with the given configuration and executor.
    ///
    /// This spawns `config.worker_count` OS threads, each with its own
    /// single-threaded tokio runtime for executing jobs.
    ///
    /// # Errors
    ///
    /// `PoolError::InvalidConfig` if the configuration is invalid;
    /// `PoolError::Internal` if a worker thread cannot be spawned.
    pub fn new(config: WorkerPoolConfig, executor: E) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        // The channel never holds more than the slots admit
        let capacity = config.worker_count + config.max_queue_depth;
        let (task_tx, task_rx) = bounded::<WorkerTask<P, R>>(capacity);
        let counters = Arc::new(PoolCounters::default());
        let slots = Arc::new(Slots {
            capacity,
            taken: AtomicUsize::new(0),
        });
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_index in 0..config.worker_count {
            let worker = spawn_worker(
                worker_index,
                task_rx.clone(),
                Arc::clone(&counters),
                Arc::clone(&slots),
                executor.clone(),
                config.thread_stack_size,
            )?;
            workers.push(worker);
        }

        info!(
            worker_count = config.worker_count,
            max_queue_depth = config.max_queue_depth,
            "WorkerPool initialized with dedicated OS threads"
        );

        Ok(Self {
            config,
            task_tx: Mutex::new(Some(task_tx)),
            counters,
            slots,
            shutdown,
            workers: Mutex::new(workers),
            job_id_counter: AtomicU64::new(0),
            _executor: std::marker::PhantomData,
        })
    }

    /// Submit a job.
    ///
    /// Never blocks: the job is either admitted or rejected immediately. The
    /// returned receiver resolves with the executor's result; it errors if
    /// the worker dropped the job (executor panic).
    ///
    /// # Errors
    ///
    /// - `PoolError::AtCapacity` if every slot is taken
    /// - `PoolError::QueueFull` if the channel is full
    /// - `PoolError::PoolShutdown` if the pool has been shut down
    pub fn submit(&self, payload: P, label: impl Into<String>) -> Result<oneshot::Receiver<R>, PoolError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::PoolShutdown);
        }
        if !self.slots.try_reserve() {
            return Err(PoolError::AtCapacity {
                capacity: self.slots.capacity,
            });
        }

        let job_id = self.job_id_counter.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        let task = WorkerTask {
            payload,
            meta: JobMeta {
                job_id,
                label: label.into(),
                worker_index: None,
                submitted_at_ms: now_ms(),
            },
            reply,
        };

        let task_tx_guard = self.task_tx.lock();
        let Some(task_tx) = task_tx_guard.as_ref() else {
            self.slots.release();
            return Err(PoolError::PoolShutdown);
        };

        self.counters.queued_jobs.fetch_add(1, Ordering::Relaxed);
        match task_tx.try_send(task) {
            Ok(()) => {
                self.counters.submitted_jobs.fetch_add(1, Ordering::Relaxed);
                debug!(job_id, "Job submitted to worker pool");
                Ok(rx)
            }
            Err(err) => {
                self.counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
                self.slots.release();
                if matches!(err, TrySendError::Full(_)) {
                    warn!("Worker pool queue is full");
                    Err(PoolError::QueueFull)
                } else {
                    Err(PoolError::PoolShutdown)
                }
            }
        }
    }

    /// Slots free for new jobs.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        if self.is_shutdown() {
            return 0;
        }
        self.slots.available()
    }

    /// Total slots (workers plus queue depth).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.capacity
    }

    /// Whether `shutdown` has been called or the pool was dropped.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters
            .snapshot(self.config.worker_count, self.available_slots())
    }

    /// Shut down the pool gracefully with timeout.
    ///
    /// New submissions are rejected immediately. Workers finish the jobs
    /// already queued, then exit; each is joined for at most
    /// `shutdown_timeout_ms` and detached afterwards.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("Shutting down worker pool");

        // Drop the sender so workers exit once the queue is drained
        {
            let mut task_tx = self.task_tx.lock();
            *task_tx = None;
        }

        let timeout = Duration::from_millis(self.config.shutdown_timeout_ms);
        let mut workers = self.workers.lock();
        let worker_count = workers.len();

        for (idx, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = std::sync::mpsc::channel();
            let join_thread = thread::spawn(move || {
                let result = worker.join();
                let _ = tx.send(result.is_ok());
            });

            match rx.recv_timeout(timeout) {
                Ok(true) => {
                    debug!(worker_index = idx, "Worker joined successfully");
                    let _ = join_thread.join();
                }
                Ok(false) => {
                    warn!(worker_index = idx, "Worker panicked");
                    let _ = join_thread.join();
                }
                Err(_) => {
                    warn!(worker_index = idx, "Worker did not exit within timeout - detaching");
                }
            }
        }

        info!(worker_count, "Worker pool shut down complete");
    }
}

impl<P, R, E> Drop for WorkerPool<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    fn drop(&mut self) {
        // Signal shutdown but don't join workers in Drop
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            let mut task_tx = self.task_tx.lock();
            *task_tx = None;
            debug!("WorkerPool dropped without explicit shutdown - workers will be detached");
        }
    }
}

/// Spawn a worker thread.
fn spawn_worker<P, R, E>(
    worker_index: usize,
    task_rx: Receiver<WorkerTask<P, R>>,
    counters: Arc<PoolCounters>,
    slots: Arc<Slots>,
    executor: E,
    stack_size: usize,
) -> Result<JoinHandle<()>, PoolError>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    thread::Builder::new()
        .name(format!("emissions-worker-{worker_index}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(worker_index, "Worker thread started");

            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(worker_index, error = %e, "Failed to create worker runtime");
                    return;
                }
            };

            // Blocking recv; returns Err once the sender is dropped and the
            // queue is empty
            while let Ok(task) = task_rx.recv() {
                counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
                counters.busy_workers.fetch_add(1, Ordering::Relaxed);

                let WorkerTask { payload, mut meta, reply } = task;
                meta.worker_index = Some(worker_index);
                let job_id = meta.job_id;
                debug!(worker_index, job_id, label = %meta.label, "Worker executing job");

                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    rt.block_on(executor.execute(payload, meta))
                }));

                // Free the slot before replying so a caller that sees the
                // result also sees the capacity
                counters.busy_workers.fetch_sub(1, Ordering::Relaxed);
                slots.release();

                match outcome {
                    Ok(result) => {
                        counters.completed_jobs.fetch_add(1, Ordering::Relaxed);
                        if reply.send(result).is_err() {
                            debug!(worker_index, job_id, "Job result receiver dropped");
                        }
                    }
                    Err(_) => {
                        error!(worker_index, job_id, "Executor panicked; job dropped");
                        counters.failed_jobs.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }

            debug!(worker_index, "Worker thread exiting");
        })
        .map_err(|e| PoolError::Internal(format!("failed to spawn worker thread: {e}")))
}
