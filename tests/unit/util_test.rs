//! Tests for utility functions

use std::time::Duration;

use emissions_scheduler::util::{generate_batch_id, generate_worker_id, init_tracing, now, now_ms, to_chrono};

#[test]
fn test_batch_id_format() {
    let id = generate_batch_id();
    assert_eq!(id.len(), "batch_".len() + 16);
    assert!(id.starts_with("batch_"));
    assert_ne!(id, generate_batch_id());
}

#[test]
fn test_worker_id_prefix() {
    let id = generate_worker_id("scheduler");
    assert!(id.starts_with("scheduler-"));
    assert_eq!(id.len(), "scheduler-".len() + 8);
}

#[test]
fn test_clock_helpers() {
    let before = now();
    assert!(now_ms() > 0);
    assert_eq!(to_chrono(Duration::from_millis(1500)).num_milliseconds(), 1500);
    assert_eq!(to_chrono(Duration::MAX), chrono::Duration::MAX);
    assert!(now() >= before);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!(target: "emissions_scheduler::tests", "tracing initialized");
}
