//! Tests for audit sinks

use emissions_scheduler::core::{
    build_audit_event, AuditAction, AuditSink, BatchStatus, InMemoryAuditSink, NoopAuditSink, TracingAuditSink,
};

#[test]
fn test_in_memory_audit_sink() {
    let sink = InMemoryAuditSink::new(10);

    let event = build_audit_event("batch_1", "org-1", "scheduler-1", AuditAction::Submitted)
        .with_detail("2 activities");
    sink.record(event);

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].batch_id, "batch_1");
    assert_eq!(events[0].org_id, "org-1");
    assert_eq!(events[0].action, AuditAction::Submitted);
    assert_eq!(events[0].detail.as_deref(), Some("2 activities"));
}

#[test]
fn test_audit_sink_overflow() {
    let sink = InMemoryAuditSink::new(2);

    for batch in ["b1", "b2", "b3"] {
        sink.record(build_audit_event(batch, "org", "w", AuditAction::LockAcquired));
    }

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].batch_id, "b2"); // First one popped
    assert_eq!(events[1].batch_id, "b3");
}

#[test]
fn test_events_for_batch() {
    let sink = InMemoryAuditSink::new(16);
    sink.record(build_audit_event("b1", "org", "w", AuditAction::WorkerBusy));
    sink.record(build_audit_event("b2", "org", "w", AuditAction::WorkerBusy));
    sink.record(
        build_audit_event("b1", "org", "w", AuditAction::Completed)
            .with_transition(BatchStatus::Processing, BatchStatus::Completed),
    );

    let b1 = sink.events_for("b1");
    assert_eq!(b1.len(), 2);
    assert_eq!(b1[1].from, Some(BatchStatus::Processing));
    assert_eq!(b1[1].to, Some(BatchStatus::Completed));
    assert_eq!(sink.count(AuditAction::WorkerBusy), 2);
}

#[test]
fn test_build_audit_event() {
    let event = build_audit_event("b1", "org-1", "scheduler-1", AuditAction::RetryScheduled);

    assert_eq!(event.worker_id, "scheduler-1");
    assert_eq!(event.action.as_str(), "retry_scheduled");
    assert!(event.from.is_none());
    assert!(event.detail.is_none());
    assert!(event.created_at_ms > 0);
    assert!(!event.event_id.is_empty());
}

#[test]
fn test_terminal_actions() {
    assert_eq!(AuditAction::for_terminal(BatchStatus::Completed), Some(AuditAction::Completed));
    assert_eq!(AuditAction::for_terminal(BatchStatus::Failed), Some(AuditAction::Failed));
    assert_eq!(AuditAction::for_terminal(BatchStatus::Cancelled), Some(AuditAction::Cancelled));
    assert_eq!(AuditAction::for_terminal(BatchStatus::Queued), None);
}

#[test]
fn test_event_serializes_snake_case() {
    let event = build_audit_event("b1", "org", "w", AuditAction::LockTimedOut);
    let json = serde_json::to_value(&event).expect("serialize");
    assert_eq!(json["action"], "lock_timed_out");
}

#[test]
fn test_other_sinks_accept_events() {
    TracingAuditSink.record(build_audit_event("b1", "org", "w", AuditAction::Failed));
    NoopAuditSink.record(build_audit_event("b1", "org", "w", AuditAction::Failed));
}
