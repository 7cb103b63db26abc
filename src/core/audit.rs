//! Batch lifecycle audit events and sinks.
//!
//! The scheduler and its workers emit one [`AuditEvent`] per observable step:
//! submission, lease acquisition, state transitions, per-activity outcomes
//! and worker busy/idle changes. Sinks are shared between threads, so
//! `record` takes `&self`.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::batch::BatchStatus;
use crate::util::clock::now_ms;
use crate::util::ids::generate_record_id;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A batch was accepted.
    Submitted,
    /// A batch changed state.
    StateTransition,
    /// A scheduler acquired a batch lease.
    LockAcquired,
    /// A scheduler gave up waiting for a batch lease.
    LockTimedOut,
    /// One activity was accounted for.
    ActivityProcessed,
    /// A worker picked up a batch.
    WorkerBusy,
    /// A worker finished a batch.
    WorkerIdle,
    /// A failed batch was returned to Pending.
    RetryScheduled,
    /// A batch whose lease lapsed was failed by recovery.
    OrphanRecovered,
    /// A batch finished as Completed.
    Completed,
    /// A batch finished as Failed.
    Failed,
    /// A batch was cancelled.
    Cancelled,
}

impl AuditAction {
    /// Snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::StateTransition => "state_transition",
            Self::LockAcquired => "lock_acquired",
            Self::LockTimedOut => "lock_timed_out",
            Self::ActivityProcessed => "activity_processed",
            Self::WorkerBusy => "worker_busy",
            Self::WorkerIdle => "worker_idle",
            Self::RetryScheduled => "retry_scheduled",
            Self::OrphanRecovered => "orphan_recovered",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Action recorded when a batch reaches `status`, if terminal.
    #[must_use]
    pub const fn for_terminal(status: BatchStatus) -> Option<Self> {
        match status {
            BatchStatus::Completed => Some(Self::Completed),
            BatchStatus::Failed => Some(Self::Failed),
            BatchStatus::Cancelled => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit event structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related batch.
    pub batch_id: String,
    /// Owning organization, empty when unknown.
    pub org_id: String,
    /// Scheduler or worker that emitted the event.
    pub worker_id: String,
    /// Action taken.
    pub action: AuditAction,
    /// Previous state, for transitions.
    pub from: Option<BatchStatus>,
    /// New state, for transitions.
    pub to: Option<BatchStatus>,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

impl AuditEvent {
    /// Attach a previous and new state.
    #[must_use]
    pub const fn with_transition(mut self, from: BatchStatus, to: BatchStatus) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    /// Attach free-form context.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
#[derive(Debug)]
pub struct InMemoryAuditSink {
    events: Mutex<VecDeque<AuditEvent>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Stored events for one batch, oldest first.
    #[must_use]
    pub fn events_for(&self, batch_id: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.batch_id == batch_id)
            .cloned()
            .collect()
    }

    /// Number of stored events with `action`.
    #[must_use]
    pub fn count(&self, action: AuditAction) -> usize {
        self.events.lock().iter().filter(|e| e.action == action).count()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Sink writing each event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            target: "emissions_scheduler::audit",
            event_id = %event.event_id,
            batch_id = %event.batch_id,
            org_id = %event.org_id,
            worker_id = %event.worker_id,
            action = %event.action,
            from = ?event.from,
            to = ?event.to,
            detail = event.detail.as_deref().unwrap_or(""),
            "audit"
        );
    }
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    batch_id: impl Into<String>,
    org_id: impl Into<String>,
    worker_id: impl Into<String>,
    action: AuditAction,
) -> AuditEvent {
    AuditEvent {
        event_id: generate_record_id(),
        batch_id: batch_id.into(),
        org_id: org_id.into(),
        worker_id: worker_id.into(),
        action,
        from: None,
        to: None,
        created_at_ms: now_ms(),
        detail: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_sink_is_bounded() {
        let sink = InMemoryAuditSink::new(2);
        for id in ["b1", "b2", "b3"] {
            sink.record(build_audit_event(id, "org", "w", AuditAction::Submitted));
        }
        let ids: Vec<String> = sink.events().into_iter().map(|e| e.batch_id).collect();
        assert_eq!(ids, vec!["b2", "b3"]);
        assert_eq!(sink.count(AuditAction::Submitted), 2);
    }

    #[test]
    fn test_transitions_carry_both_states() {
        let event = build_audit_event("b1", "org", "w", AuditAction::StateTransition)
            .with_transition(BatchStatus::Pending, BatchStatus::Queued)
            .with_detail("leased");
        assert_eq!(event.from, Some(BatchStatus::Pending));
        assert_eq!(event.to, Some(BatchStatus::Queued));
        assert_eq!(event.detail.as_deref(), Some("leased"));
        assert_ne!(event.event_id, build_audit_event("b1", "org", "w", AuditAction::Submitted).event_id);
    }
}
