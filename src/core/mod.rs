//! Batch lifecycle, persistence contracts, worker pool and the scheduler.

pub mod audit;
pub mod batch;
pub mod error;
pub mod executor;
pub mod processor;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod worker_pool;

pub use audit::{
    build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, NoopAuditSink, TracingAuditSink,
};
pub use batch::{
    ActivityOutcome, BatchFilter, BatchJob, BatchProgress, BatchStatus, BatchSubmission, CompletionPolicy,
    ProgressLogEntry, ProgressSnapshot, TransitionPatch,
};
pub use error::{AppResult, CalculationError, SchedulerError};
pub use executor::{JobMeta, WorkerExecutor};
pub use processor::{BatchAssignment, BatchProcessor, BatchRunReport};
pub use scheduler::{BatchScheduler, PollSummary, SchedulerDeps};
pub use stats::{HealthStatus, SchedulerStats};
pub use store::{ActivitySource, BatchStore, Lease, LeaseStore};
pub use worker_pool::{PoolError, PoolStats, WorkerPool};
