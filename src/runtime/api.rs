//! API-facing request/response models and handlers.
//!
//! Handlers are transport agnostic: an HTTP layer extracts the caller's
//! organization and the body, calls a handler and serializes either the
//! response or the [`ErrorResponse`] with its `status`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{
    BatchFilter, BatchJob, BatchScheduler, BatchStatus, BatchSubmission, HealthStatus, ProgressSnapshot,
    SchedulerError, SchedulerStats,
};
use crate::util::clock::now;

/// Batch submission payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitBatchRequest {
    /// Owning workspace.
    #[serde(default)]
    pub workspace_id: String,
    /// Activities to calculate.
    pub activity_ids: Vec<String>,
    /// Retry budget; server default when absent.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Scheduling priority; higher runs first.
    #[serde(default)]
    pub priority: Option<i32>,
}

/// Accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitBatchResponse {
    /// New batch identifier.
    pub batch_id: String,
    /// Always `pending`.
    pub status: BatchStatus,
    /// Number of activities accepted.
    pub activity_count: usize,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Full view of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDetailResponse {
    /// Batch identifier.
    pub id: String,
    /// Owning organization.
    pub org_id: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Current state.
    pub status: BatchStatus,
    /// Total activities.
    pub activity_count: usize,
    /// Successful activities.
    pub success_count: usize,
    /// Failed activities.
    pub error_count: usize,
    /// Sum of successful emissions, kg CO2e.
    pub total_emissions: f64,
    /// Completion percentage.
    pub progress_percent: f64,
    /// Activities not yet accounted for.
    pub remaining_count: usize,
    /// First time the batch entered Processing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the batch last finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Batch-level failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Per-activity errors of the last attempt, bounded.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub error_summary: Vec<String>,
    /// Completed retries.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// Scheduling priority.
    pub priority: i32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Seconds between start and finish.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
    /// Mean emissions per successful activity.
    pub avg_emissions_per_activity: f64,
}

impl From<&BatchJob> for BatchDetailResponse {
    fn from(job: &BatchJob) -> Self {
        Self {
            id: job.id.clone(),
            org_id: job.org_id.clone(),
            workspace_id: job.workspace_id.clone(),
            status: job.status,
            activity_count: job.activity_count,
            success_count: job.success_count,
            error_count: job.error_count,
            total_emissions: job.total_emissions_kg_co2e,
            progress_percent: job.progress_percent(),
            remaining_count: job.remaining_activities(),
            started_at: job.started_at,
            completed_at: job.completed_at,
            error_message: job.error_message.clone(),
            error_summary: job.error_summary.clone(),
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            priority: job.priority,
            created_at: job.created_at,
            updated_at: job.updated_at,
            duration_seconds: job.duration().map(|d| d.num_seconds()),
            avg_emissions_per_activity: job.avg_emissions_per_activity(),
        }
    }
}

/// Query parameters for listing batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListBatchesQuery {
    /// Status name such as `failed`; all statuses when absent.
    pub status: Option<String>,
    /// Page size; 50 when absent.
    pub limit: Option<usize>,
    /// Rows to skip.
    pub offset: Option<usize>,
}

/// One page of batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListBatchesResponse {
    /// Batches, newest first.
    pub batches: Vec<BatchDetailResponse>,
    /// Batches on this page.
    pub total: usize,
    /// Applied page size.
    pub limit: usize,
    /// Applied offset.
    pub offset: usize,
}

/// Progress of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressResponse {
    /// Batch identifier.
    pub batch_id: String,
    /// Current state.
    pub status: BatchStatus,
    /// Activities accounted for.
    pub processed_count: usize,
    /// Total activities.
    pub total_count: usize,
    /// Successful activities.
    pub success_count: usize,
    /// Failed activities.
    pub error_count: usize,
    /// Completion percentage.
    pub percent_complete: f64,
    /// Estimated seconds to go, while Processing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_secs: Option<f64>,
    /// Sum of successful emissions, kg CO2e.
    pub total_emissions: f64,
    /// Mean emissions per successful activity.
    pub avg_emissions_per_item: f64,
}

impl From<ProgressSnapshot> for ProgressResponse {
    fn from(snapshot: ProgressSnapshot) -> Self {
        Self {
            batch_id: snapshot.batch_id,
            status: snapshot.status,
            processed_count: snapshot.processed,
            total_count: snapshot.total,
            success_count: snapshot.success_count,
            error_count: snapshot.error_count,
            percent_complete: snapshot.percent,
            estimated_remaining_secs: snapshot.estimated_remaining_secs,
            total_emissions: snapshot.total_emissions_kg_co2e,
            avg_emissions_per_item: snapshot.avg_emissions_per_item,
        }
    }
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable message.
    pub error: String,
    /// `NOT_FOUND`, `CONFLICT`, `VALIDATION_ERROR` or `INTERNAL_ERROR`.
    pub code: String,
    /// HTTP status to answer with.
    pub status: u16,
    /// When the error was produced.
    pub timestamp: DateTime<Utc>,
}

impl From<SchedulerError> for ErrorResponse {
    fn from(err: SchedulerError) -> Self {
        Self::from(&err)
    }
}

impl From<&SchedulerError> for ErrorResponse {
    fn from(err: &SchedulerError) -> Self {
        // Infrastructure details stay in the logs
        let error = if err.status_code() >= 500 {
            "internal error".to_owned()
        } else {
            err.to_string()
        };
        Self {
            error,
            code: err.code().to_owned(),
            status: err.status_code(),
            timestamp: now(),
        }
    }
}

/// Result type of every handler.
pub type ApiResult<T> = Result<T, ErrorResponse>;

/// Submit a batch for `org_id`.
///
/// # Errors
///
/// 400 for invalid requests.
pub async fn submit_batch(
    scheduler: &BatchScheduler,
    org_id: &str,
    req: SubmitBatchRequest,
) -> ApiResult<SubmitBatchResponse> {
    let activity_count = req.activity_ids.len();
    let batch_id = scheduler
        .submit(BatchSubmission {
            org_id: org_id.to_owned(),
            workspace_id: req.workspace_id,
            activity_ids: req.activity_ids,
            max_retries: req.max_retries,
            priority: req.priority,
        })
        .await?;
    let job = scheduler.get_batch(org_id, &batch_id).await?;
    Ok(SubmitBatchResponse {
        batch_id,
        status: job.status,
        activity_count,
        created_at: job.created_at,
    })
}

/// Batch details.
///
/// # Errors
///
/// 404 for unknown or foreign batches.
pub async fn get_batch(scheduler: &BatchScheduler, org_id: &str, batch_id: &str) -> ApiResult<BatchDetailResponse> {
    let job = scheduler.get_batch(org_id, batch_id).await?;
    Ok(BatchDetailResponse::from(&job))
}

/// One page of the org's batches.
///
/// # Errors
///
/// 400 for an unknown status name.
pub async fn list_batches(
    scheduler: &BatchScheduler,
    org_id: &str,
    query: ListBatchesQuery,
) -> ApiResult<ListBatchesResponse> {
    let defaults = BatchFilter::default();
    let status = query.status.as_deref().map(str::parse::<BatchStatus>).transpose()?;
    let filter = BatchFilter {
        status,
        limit: query.limit.unwrap_or(defaults.limit),
        offset: query.offset.unwrap_or(defaults.offset),
    }
    .normalized();

    let batches: Vec<BatchDetailResponse> = scheduler
        .list_batches(org_id, &filter)
        .await?
        .iter()
        .map(BatchDetailResponse::from)
        .collect();
    Ok(ListBatchesResponse {
        total: batches.len(),
        batches,
        limit: filter.limit,
        offset: filter.offset,
    })
}

/// Batch progress.
///
/// # Errors
///
/// 404 for unknown or foreign batches.
pub async fn get_progress(scheduler: &BatchScheduler, org_id: &str, batch_id: &str) -> ApiResult<ProgressResponse> {
    Ok(scheduler.get_progress(org_id, batch_id).await?.into())
}

/// Cancel a Pending or Queued batch.
///
/// # Errors
///
/// 404 for unknown batches, 409 once processing has started.
pub async fn cancel_batch(scheduler: &BatchScheduler, org_id: &str, batch_id: &str) -> ApiResult<BatchDetailResponse> {
    let job = scheduler.cancel_batch(org_id, batch_id).await?;
    Ok(BatchDetailResponse::from(&job))
}

/// Retry a Failed batch.
///
/// # Errors
///
/// 404 for unknown batches, 409 if not retryable.
pub async fn retry_batch(scheduler: &BatchScheduler, org_id: &str, batch_id: &str) -> ApiResult<BatchDetailResponse> {
    let job = scheduler.retry_batch(org_id, batch_id).await?;
    Ok(BatchDetailResponse::from(&job))
}

/// Delete a finished batch.
///
/// # Errors
///
/// 404 for unknown batches, 409 while not terminal.
pub async fn delete_batch(scheduler: &BatchScheduler, org_id: &str, batch_id: &str) -> ApiResult<()> {
    Ok(scheduler.delete_batch(org_id, batch_id).await?)
}

/// Scheduler statistics.
#[must_use]
pub fn stats(scheduler: &BatchScheduler) -> SchedulerStats {
    scheduler.stats()
}

/// Health payload.
#[must_use]
pub fn health(scheduler: &BatchScheduler) -> HealthStatus {
    scheduler.health()
}
