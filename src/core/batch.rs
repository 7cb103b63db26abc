//! Batch job model and its state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;
use crate::emissions::model::EmissionRecord;

/// Default priority for new batches; higher runs first.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Lifecycle state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Waiting to be picked up by the scheduler.
    Pending,
    /// Lease acquired; handed to a worker.
    Queued,
    /// A worker is calculating the batch's activities.
    Processing,
    /// Finished and accepted by the completion policy.
    Completed,
    /// Finished and rejected by the completion policy, or aborted by an
    /// infrastructure error.
    Failed,
    /// Cancelled by a caller or by a scheduler abort.
    Cancelled,
}

impl BatchStatus {
    /// Completed, Failed or Cancelled.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> to` is an edge of the state machine.
    ///
    /// `Queued -> Pending` returns a batch whose hand-off to a worker failed;
    /// `Queued -> Failed` is used when a queued batch's lease expired.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Queued | Self::Cancelled)
                | (Self::Queued, Self::Processing | Self::Cancelled | Self::Pending | Self::Failed)
                | (Self::Processing, Self::Completed | Self::Failed | Self::Cancelled)
                | (Self::Failed, Self::Pending)
        )
    }

    /// Lowercase name used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(SchedulerError::Validation(format!("unknown batch status `{other}`"))),
        }
    }
}

/// Rule deciding whether a processed batch is Completed or Failed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Completed if at least one activity succeeded.
    #[default]
    AnySuccess,
    /// Completed only if every activity succeeded.
    AllSuccess,
    /// Completed if at least this fraction of activities succeeded (and at least one did).
    MinSuccessRatio(f64),
}

impl CompletionPolicy {
    /// Terminal status for the given counts.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn decide(self, success_count: usize, error_count: usize) -> BatchStatus {
        let accepted = success_count > 0
            && match self {
                Self::AnySuccess => true,
                Self::AllSuccess => error_count == 0,
                Self::MinSuccessRatio(ratio) => {
                    success_count as f64 / (success_count + error_count) as f64 >= ratio
                }
            };
        if accepted {
            BatchStatus::Completed
        } else {
            BatchStatus::Failed
        }
    }

    /// Validate the policy parameters.
    ///
    /// # Errors
    ///
    /// Returns a message when the ratio is outside `(0, 1]`.
    pub fn validate(self) -> Result<(), String> {
        if let Self::MinSuccessRatio(ratio) = self {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(format!("min_success_ratio must be in (0, 1], got {ratio}"));
            }
        }
        Ok(())
    }
}

impl FromStr for CompletionPolicy {
    type Err = String;

    /// Parses `any_success`, `all_success` or `min_success_ratio:<f64>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "any_success" => Ok(Self::AnySuccess),
            "all_success" => Ok(Self::AllSuccess),
            _ => {
                let ratio = s
                    .strip_prefix("min_success_ratio:")
                    .ok_or_else(|| format!("unknown completion policy `{s}`"))?;
                let ratio: f64 = ratio
                    .parse()
                    .map_err(|e| format!("invalid min_success_ratio `{ratio}`: {e}"))?;
                let policy = Self::MinSuccessRatio(ratio);
                policy.validate()?;
                Ok(policy)
            }
        }
    }
}

/// Per-attempt counters of a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Activities calculated successfully.
    pub success_count: usize,
    /// Activities that failed.
    pub error_count: usize,
    /// Sum of successful emissions in kg CO2e.
    pub total_emissions_kg_co2e: f64,
}

impl BatchProgress {
    /// Activities accounted for so far.
    #[must_use]
    pub const fn processed(&self) -> usize {
        self.success_count + self.error_count
    }

    /// Terminal counters: every activity without a success counts as an
    /// error, so `success + error == activity_count`.
    #[must_use]
    pub const fn settled(self, activity_count: usize) -> Self {
        Self {
            success_count: self.success_count,
            error_count: activity_count.saturating_sub(self.success_count),
            total_emissions_kg_co2e: self.total_emissions_kg_co2e,
        }
    }
}

/// A request to calculate a set of activities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSubmission {
    /// Owning organization.
    pub org_id: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Activities to calculate, in order.
    pub activity_ids: Vec<String>,
    /// Retry budget; the configured default applies when `None`.
    #[serde(default)]
    pub max_retries: Option<u32>,
    /// Scheduling priority; [`DEFAULT_PRIORITY`] when `None`.
    #[serde(default)]
    pub priority: Option<i32>,
}

/// A batch of activities and its processing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    /// Identifier, `batch_<16 hex>`.
    pub id: String,
    /// Owning organization.
    pub org_id: String,
    /// Owning workspace.
    pub workspace_id: String,
    /// Current state.
    pub status: BatchStatus,
    /// Activities in submission order.
    pub activity_ids: Vec<String>,
    /// Number of activities; fixed at creation.
    pub activity_count: usize,
    /// Successful activities in the current attempt.
    pub success_count: usize,
    /// Failed activities in the current attempt.
    pub error_count: usize,
    /// Sum of successful emissions in the current attempt.
    pub total_emissions_kg_co2e: f64,
    /// Completed retries.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// Scheduling priority; higher runs first.
    pub priority: i32,
    /// Batch-level failure description.
    pub error_message: Option<String>,
    /// Bounded list of per-activity errors from the current attempt.
    #[serde(default)]
    pub error_summary: Vec<String>,
    /// First time the batch entered Processing.
    pub started_at: Option<DateTime<Utc>>,
    /// When the batch last reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Extra data applied together with a status transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionPatch {
    /// Replace the batch-level error message.
    pub error_message: Option<String>,
    /// Overwrite the counters, used for the final deterministic aggregate.
    pub final_progress: Option<BatchProgress>,
}

impl TransitionPatch {
    /// Patch that only sets an error message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            final_progress: None,
        }
    }
}

impl BatchJob {
    /// Create a Pending batch.
    #[must_use]
    pub fn new(
        id: String,
        submission: BatchSubmission,
        max_retries: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            org_id: submission.org_id,
            workspace_id: submission.workspace_id,
            status: BatchStatus::Pending,
            activity_count: submission.activity_ids.len(),
            activity_ids: submission.activity_ids,
            success_count: 0,
            error_count: 0,
            total_emissions_kg_co2e: 0.0,
            retry_count: 0,
            max_retries,
            priority: submission.priority.unwrap_or(DEFAULT_PRIORITY),
            error_message: None,
            error_summary: Vec::new(),
            started_at: None,
            completed_at: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Current counters.
    #[must_use]
    pub const fn progress(&self) -> BatchProgress {
        BatchProgress {
            success_count: self.success_count,
            error_count: self.error_count,
            total_emissions_kg_co2e: self.total_emissions_kg_co2e,
        }
    }

    /// Activities accounted for in the current attempt.
    #[must_use]
    pub const fn processed_count(&self) -> usize {
        self.success_count + self.error_count
    }

    /// Activities not yet accounted for.
    #[must_use]
    pub const fn remaining_activities(&self) -> usize {
        self.activity_count.saturating_sub(self.processed_count())
    }

    /// Completion percentage; exactly 100 in every terminal state.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress_percent(&self) -> f64 {
        if self.status.is_terminal() || self.activity_count == 0 {
            return 100.0;
        }
        (self.processed_count() as f64 / self.activity_count as f64 * 100.0).min(100.0)
    }

    /// Whether a Failed batch still has retry budget.
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        matches!(self.status, BatchStatus::Failed) && self.retry_count < self.max_retries
    }

    /// Time from first start to last completion.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.completed_at? - self.started_at?)
    }

    /// Mean emissions per successful activity.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn avg_emissions_per_activity(&self) -> f64 {
        if self.success_count == 0 {
            return 0.0;
        }
        self.total_emissions_kg_co2e / self.success_count as f64
    }

    /// Apply the status transition `from -> to`.
    ///
    /// Side effects:
    /// * entering Processing stamps `started_at` once and resets per-attempt state;
    /// * entering a terminal state stamps `completed_at` and applies `patch`;
    /// * `Failed -> Pending` consumes one retry and clears per-attempt state.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Conflict` if the current status is not `from`, the edge
    /// does not exist, or the retry budget is exhausted.
    pub fn apply_transition(
        &mut self,
        from: BatchStatus,
        to: BatchStatus,
        patch: TransitionPatch,
        at: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        if self.status != from {
            return Err(SchedulerError::Conflict(format!(
                "batch {} is {}, expected {from}",
                self.id, self.status
            )));
        }
        if !from.can_transition_to(to) {
            return Err(SchedulerError::Conflict(format!(
                "batch {} cannot move from {from} to {to}",
                self.id
            )));
        }

        match (from, to) {
            (BatchStatus::Failed, BatchStatus::Pending) => {
                if self.retry_count >= self.max_retries {
                    return Err(SchedulerError::Conflict(format!(
                        "batch {} exhausted its {} retries",
                        self.id, self.max_retries
                    )));
                }
                self.retry_count += 1;
                self.reset_attempt();
                self.completed_at = None;
            }
            (_, BatchStatus::Processing) => {
                if self.started_at.is_none() {
                    self.started_at = Some(at);
                }
                self.reset_attempt();
                self.error_message = None;
            }
            (_, terminal) if terminal.is_terminal() => {
                self.completed_at = Some(at);
                if let Some(progress) = patch.final_progress {
                    self.success_count = progress.success_count;
                    self.error_count = progress.error_count;
                    self.total_emissions_kg_co2e = progress.total_emissions_kg_co2e;
                }
            }
            _ => {}
        }
        if let Some(message) = patch.error_message {
            self.error_message = Some(message);
        }
        self.status = to;
        self.updated_at = at;
        Ok(())
    }

    fn reset_attempt(&mut self) {
        self.success_count = 0;
        self.error_count = 0;
        self.total_emissions_kg_co2e = 0.0;
        self.error_summary.clear();
    }
}

/// Outcome of one activity, written back to the store by the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityOutcome {
    /// The activity produced a record.
    Success(Box<EmissionRecord>),
    /// The activity failed; `error` is `None` once the summary is full.
    Failure {
        /// Activity identifier.
        activity_id: String,
        /// Rendered error to append to the summary.
        error: Option<String>,
    },
}

/// Query filter for listing batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchFilter {
    /// Only batches in this state.
    pub status: Option<BatchStatus>,
    /// Page size.
    pub limit: usize,
    /// Rows to skip.
    pub offset: usize,
}

impl Default for BatchFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl BatchFilter {
    /// Largest page size accepted.
    pub const MAX_LIMIT: usize = 1000;

    /// Filter on a status.
    #[must_use]
    pub fn with_status(status: BatchStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Clamp the page size to `1..=MAX_LIMIT`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.limit = self.limit.clamp(1, Self::MAX_LIMIT);
        self
    }
}

/// Point-in-time progress of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Batch identifier.
    pub batch_id: String,
    /// Current state.
    pub status: BatchStatus,
    /// Activities accounted for.
    pub processed: usize,
    /// Total activities.
    pub total: usize,
    /// Successful activities.
    pub success_count: usize,
    /// Failed activities.
    pub error_count: usize,
    /// Completion percentage.
    pub percent: f64,
    /// Sum of successful emissions.
    pub total_emissions_kg_co2e: f64,
    /// Mean emissions per successful activity.
    pub avg_emissions_per_item: f64,
    /// Estimated seconds until all activities are accounted for.
    pub estimated_remaining_secs: Option<f64>,
}

impl ProgressSnapshot {
    /// Build a snapshot of `job` as of `at`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn of(job: &BatchJob, at: DateTime<Utc>) -> Self {
        let processed = job.processed_count();
        let estimated_remaining_secs = match (job.status, job.started_at) {
            (BatchStatus::Processing, Some(started)) if processed > 0 => {
                let elapsed = (at - started).num_milliseconds().max(0) as f64 / 1000.0;
                Some(elapsed / processed as f64 * job.remaining_activities() as f64)
            }
            _ => None,
        };
        Self {
            batch_id: job.id.clone(),
            status: job.status,
            processed,
            total: job.activity_count,
            success_count: job.success_count,
            error_count: job.error_count,
            percent: job.progress_percent(),
            total_emissions_kg_co2e: job.total_emissions_kg_co2e,
            avg_emissions_per_item: job.avg_emissions_per_activity(),
            estimated_remaining_secs,
        }
    }
}

/// One row of a batch's transition history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressLogEntry {
    /// Batch identifier.
    pub batch_id: String,
    /// Previous state, `None` for creation.
    pub from: Option<BatchStatus>,
    /// New state.
    pub to: BatchStatus,
    /// Activities accounted for at the time.
    pub processed_count: usize,
    /// Failed activities at the time.
    pub error_count: usize,
    /// Emissions at the time.
    pub total_emissions_kg_co2e: f64,
    /// Retry count at the time.
    pub retry_count: u32,
    /// When the transition happened.
    pub at: DateTime<Utc>,
}

impl ProgressLogEntry {
    /// Entry describing `job` right after a transition from `from`.
    #[must_use]
    pub fn after(job: &BatchJob, from: Option<BatchStatus>) -> Self {
        Self {
            batch_id: job.id.clone(),
            from,
            to: job.status,
            processed_count: job.processed_count(),
            error_count: job.error_count,
            total_emissions_kg_co2e: job.total_emissions_kg_co2e,
            retry_count: job.retry_count,
            at: job.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::clock::now;

    fn job(max_retries: u32) -> BatchJob {
        BatchJob::new(
            "batch_0000000000000001".into(),
            BatchSubmission {
                org_id: "org".into(),
                workspace_id: "ws".into(),
                activity_ids: vec!["a1".into(), "a2".into()],
                max_retries: None,
                priority: None,
            },
            max_retries,
            now(),
        )
    }

    #[test]
    fn test_settled_progress_accounts_for_every_activity() {
        let partial = BatchProgress {
            success_count: 3,
            error_count: 1,
            total_emissions_kg_co2e: 12.5,
        };
        let settled = partial.settled(10);
        assert_eq!(settled.success_count, 3);
        assert_eq!(settled.error_count, 7);
        assert_eq!(settled.processed(), 10);
        assert!((settled.total_emissions_kg_co2e - 12.5).abs() < f64::EPSILON);

        assert_eq!(BatchProgress::default().settled(4).error_count, 4);
    }

    #[test]
    fn test_happy_path_sets_timestamps_once() {
        let mut job = job(1);
        let t = now();
        job.apply_transition(BatchStatus::Pending, BatchStatus::Queued, TransitionPatch::default(), t)
            .unwrap();
        job.apply_transition(BatchStatus::Queued, BatchStatus::Processing, TransitionPatch::default(), t)
            .unwrap();
        let started = job.started_at;
        assert!(started.is_some());
        assert!(job.completed_at.is_none());

        job.apply_transition(
            BatchStatus::Processing,
            BatchStatus::Failed,
            TransitionPatch::default(),
            t,
        )
        .unwrap();
        assert!(job.completed_at.is_some());
        assert!((job.progress_percent() - 100.0).abs() < f64::EPSILON);

        job.apply_transition(BatchStatus::Failed, BatchStatus::Pending, TransitionPatch::default(), t)
            .unwrap();
        assert_eq!(job.retry_count, 1);
        assert!(job.completed_at.is_none());

        job.apply_transition(BatchStatus::Pending, BatchStatus::Queued, TransitionPatch::default(), t)
            .unwrap();
        job.apply_transition(BatchStatus::Queued, BatchStatus::Processing, TransitionPatch::default(), t)
            .unwrap();
        assert_eq!(job.started_at, started);
    }

    #[test]
    fn test_retry_budget_is_enforced() {
        let mut job = job(0);
        job.status = BatchStatus::Failed;
        let err = job
            .apply_transition(BatchStatus::Failed, BatchStatus::Pending, TransitionPatch::default(), now())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Conflict(_)));
        assert!(!job.can_retry());
    }

    #[test]
    fn test_stale_from_state_is_a_conflict() {
        let mut job = job(1);
        let err = job
            .apply_transition(BatchStatus::Queued, BatchStatus::Processing, TransitionPatch::default(), now())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Conflict(_)));
        assert_eq!(job.status, BatchStatus::Pending);
    }

    #[test]
    fn test_illegal_edges_are_rejected() {
        assert!(!BatchStatus::Completed.can_transition_to(BatchStatus::Pending));
        assert!(!BatchStatus::Cancelled.can_transition_to(BatchStatus::Pending));
        assert!(!BatchStatus::Pending.can_transition_to(BatchStatus::Processing));
        assert!(BatchStatus::Processing.can_transition_to(BatchStatus::Cancelled));
    }

    #[test]
    fn test_terminal_patch_overwrites_counters() {
        let mut job = job(0);
        job.status = BatchStatus::Processing;
        job.apply_transition(
            BatchStatus::Processing,
            BatchStatus::Completed,
            TransitionPatch {
                error_message: None,
                final_progress: Some(BatchProgress {
                    success_count: 2,
                    error_count: 0,
                    total_emissions_kg_co2e: 12.5,
                }),
            },
            now(),
        )
        .unwrap();
        assert_eq!(job.success_count, 2);
        assert!((job.avg_emissions_per_activity() - 6.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_completion_policies() {
        assert_eq!(CompletionPolicy::AnySuccess.decide(1, 9), BatchStatus::Completed);
        assert_eq!(CompletionPolicy::AnySuccess.decide(0, 3), BatchStatus::Failed);
        assert_eq!(CompletionPolicy::AllSuccess.decide(2, 1), BatchStatus::Failed);
        assert_eq!(CompletionPolicy::MinSuccessRatio(0.5).decide(1, 1), BatchStatus::Completed);
        assert_eq!(CompletionPolicy::MinSuccessRatio(0.75).decide(2, 1), BatchStatus::Failed);
        assert!(CompletionPolicy::MinSuccessRatio(1.5).validate().is_err());
    }

    #[test]
    fn test_completion_policy_parses() {
        assert_eq!("all_success".parse::<CompletionPolicy>(), Ok(CompletionPolicy::AllSuccess));
        assert_eq!(
            "min_success_ratio:0.8".parse::<CompletionPolicy>(),
            Ok(CompletionPolicy::MinSuccessRatio(0.8))
        );
        assert!("sometimes".parse::<CompletionPolicy>().is_err());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            BatchStatus::Pending,
            BatchStatus::Queued,
            BatchStatus::Processing,
            BatchStatus::Completed,
            BatchStatus::Failed,
            BatchStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<BatchStatus>().unwrap(), status);
        }
    }
}
