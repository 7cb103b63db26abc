//! Error types for scheduler and calculation operations.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::worker_pool::PoolError;
use crate::emissions::model::Scope;

/// Errors produced by the batch scheduler, its stores and workers.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Caller supplied an invalid request.
    #[error("validation error: {0}")]
    Validation(String),
    /// Batch (or other entity) does not exist or is not visible to the caller.
    #[error("not found: {0}")]
    NotFound(String),
    /// Requested operation is illegal in the current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Lease could not be acquired within the bounded wait.
    #[error("lock timeout for batch {batch_id} after {waited_ms}ms")]
    LockTimeout {
        /// Batch whose lease was contended.
        batch_id: String,
        /// How long the scheduler waited.
        waited_ms: u64,
    },
    /// The worker no longer holds the lease for this batch.
    #[error("lease lost for batch {0}")]
    LeaseLost(String),
    /// Backing store failure with context.
    #[error("persistence error: {0}")]
    Persistence(String),
    /// Worker pool rejected or failed the assignment.
    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),
    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SchedulerError {
    /// HTTP status code a transport layer should use for this error.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Config(_) => 400,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            _ => 500,
        }
    }

    /// Stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::Config(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Whether the failure is transient infrastructure trouble.
    #[must_use]
    pub const fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. } | Self::LeaseLost(_) | Self::Persistence(_) | Self::Pool(_)
        )
    }
}

/// Errors produced while calculating emissions for a single activity.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalculationError {
    /// No calculator is registered for the classified scope.
    #[error("no calculator registered for {0}")]
    UnregisteredScope(Scope),
    /// No factor matches the lookup key at the requested date.
    #[error("emission factor not found: category={category} unit={unit} region={region} as_of={as_of}")]
    FactorNotFound {
        /// Activity category.
        category: String,
        /// Normalized unit.
        unit: String,
        /// Requested region.
        region: String,
        /// Lookup date.
        as_of: DateTime<Utc>,
    },
    /// The unit cannot be handled by the selected calculator.
    #[error("unsupported unit `{unit}` for {scope}")]
    UnsupportedUnit {
        /// Unit as submitted.
        unit: String,
        /// Scope whose calculator rejected it.
        scope: Scope,
    },
    /// Activity data is malformed.
    #[error("invalid activity: {0}")]
    InvalidActivity(String),
    /// Factor data is malformed.
    #[error("invalid emission factor: {0}")]
    InvalidFactor(String),
    /// The activity source has no record with this id.
    #[error("activity not found: {0}")]
    ActivityNotFound(String),
    /// The activity source failed.
    #[error("activity source error: {0}")]
    Source(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
