//! Tests for builder modules

use std::sync::Arc;

use emissions_scheduler::builders::{build_engine, build_store, SchedulerBuilder};
use emissions_scheduler::config::{AppConfig, StoreBackendConfig, WorkerPoolConfig};
use emissions_scheduler::core::{BatchStatus, BatchStore, InMemoryAuditSink, SchedulerError};
use emissions_scheduler::emissions::{Activity, Scope};
use emissions_scheduler::infra::InMemoryActivitySource;

fn small_config() -> AppConfig {
    AppConfig {
        workers: WorkerPoolConfig::new().with_worker_count(1).with_max_queue_depth(2),
        ..AppConfig::default()
    }
}

#[tokio::test]
async fn test_build_engine_registers_all_scopes() {
    let parts = build_engine(&AppConfig::default()).expect("engine");
    assert_eq!(parts.engine.registered_scopes(), vec![Scope::Scope1, Scope::Scope2, Scope::Scope3]);
    assert!(!parts.registry.is_empty(), "defaults are preloaded");

    let activity = Activity::new("a1", "utility_bill", "electricity", 1000.0, "kWh").with_location("US");
    let record = parts.engine.calculate(&activity).await.expect("record");
    assert!((record.emissions_kg_co2e - 386.0).abs() < 1e-6);
}

#[test]
fn test_build_engine_rejects_invalid_config() {
    let mut cfg = AppConfig::default();
    cfg.engine.max_batch_concurrency = 0;
    assert!(matches!(build_engine(&cfg), Err(SchedulerError::Config(_))));
}

#[tokio::test]
async fn test_build_store_file_backend() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = StoreBackendConfig::File {
        path: dir.path().join("nested").join("batches.json"),
    };
    let handles = build_store(&backend).expect("store");
    assert!(handles.batches.list_pending(10).await.expect("pending").is_empty());
}

#[tokio::test]
async fn test_scheduler_builder_defaults() {
    let source = Arc::new(InMemoryActivitySource::from_iter([Activity::new(
        "a1",
        "utility_bill",
        "electricity",
        10.0,
        "kWh",
    )]));
    let audit = Arc::new(InMemoryAuditSink::new(100));

    let builder = SchedulerBuilder::new(small_config(), source).with_audit(audit.clone());
    assert_eq!(builder.config().workers.worker_count, 1);
    let scheduler = builder.build().expect("scheduler");

    assert!(!scheduler.is_running());
    assert!(scheduler.worker_id().starts_with("scheduler-"));

    let batch_id = scheduler
        .submit_batch("org", "ws", vec!["a1".into()], 1)
        .await
        .expect("submit");
    let job = scheduler.get_batch("org", &batch_id).await.expect("batch");
    assert_eq!(job.status, BatchStatus::Pending);
    assert_eq!(audit.events().len(), 1);
    assert_eq!(scheduler.stats().workers.worker_count, 1);
}

#[test]
fn test_scheduler_builder_rejects_invalid_config() {
    let mut cfg = small_config();
    cfg.scheduler.poll_interval_ms = 0;
    let result = SchedulerBuilder::new(cfg, Arc::new(InMemoryActivitySource::new())).build();
    assert!(matches!(result, Err(SchedulerError::Config(_))));
}
