//! Execution trait for work run on the worker pool.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Metadata attached to each job handed to the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMeta {
    /// Pool-assigned sequence number.
    pub job_id: u64,
    /// Caller-supplied label, e.g. the batch id.
    pub label: String,
    /// Index of the worker thread running the job; set by the worker.
    pub worker_index: Option<usize>,
    /// Submission time in milliseconds since the epoch.
    pub submitted_at_ms: u128,
}

/// Executor trait for worker pools.
///
/// Results do not need to be serializable; they travel back to the
/// submitter over a oneshot channel.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use emissions_scheduler::core::{JobMeta, WorkerExecutor};
///
/// #[derive(Clone)]
/// struct Echo;
///
/// #[async_trait]
/// impl WorkerExecutor<String, String> for Echo {
///     async fn execute(&self, payload: String, meta: JobMeta) -> String {
///         format!("{}: {payload}", meta.label)
///     }
/// }
/// ```
#[async_trait]
pub trait WorkerExecutor<P, R>: Send + Sync + Clone + 'static
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Execute a payload and return the result.
    ///
    /// # Threading
    ///
    /// Called from a dedicated worker thread with its own single-threaded
    /// tokio runtime, so long-running calculations do not starve the
    /// caller's runtime.
    async fn execute(&self, payload: P, meta: JobMeta) -> R;
}
