//! Worker pool configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the batch worker pool.
///
/// ```rust
/// use emissions_scheduler::config::WorkerPoolConfig;
///
/// let cfg = WorkerPoolConfig::new()
///     .with_worker_count(4)
///     .with_max_queue_depth(16);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of dedicated worker threads; each processes one batch at a time.
    pub worker_count: usize,
    /// Assignments that may wait for a free worker before submission is rejected.
    pub max_queue_depth: usize,
    /// Stack size for worker threads in bytes.
    pub thread_stack_size: usize,
    /// How long `shutdown` waits for each worker to exit.
    pub shutdown_timeout_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().clamp(2, 8),
            max_queue_depth: 64,
            thread_stack_size: 2 * 1024 * 1024,
            shutdown_timeout_ms: 2_000,
        }
    }
}

impl WorkerPoolConfig {
    /// Defaults sized to the host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker thread count.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the queue depth.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, max_queue_depth: usize) -> Self {
        self.max_queue_depth = max_queue_depth;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, thread_stack_size: usize) -> Self {
        self.thread_stack_size = thread_stack_size;
        self
    }

    /// Set the per-worker shutdown timeout.
    #[must_use]
    pub const fn with_shutdown_timeout_ms(mut self, shutdown_timeout_ms: u64) -> Self {
        self.shutdown_timeout_ms = shutdown_timeout_ms;
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        Ok(())
    }
}
