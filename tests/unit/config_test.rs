//! Tests for configuration validation and loading

use std::collections::HashMap;

use emissions_scheduler::config::{AppConfig, SchedulerConfig, StoreBackendConfig, WorkerPoolConfig};
use emissions_scheduler::core::CompletionPolicy;

#[test]
fn test_default_config_is_valid() {
    let cfg = AppConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.scheduler.poll_interval_ms, 30_000);
    assert_eq!(cfg.scheduler.default_max_retries, 3);
    assert_eq!(cfg.store, StoreBackendConfig::InMemory);
}

#[test]
fn test_scheduler_config_invalid_poll_interval() {
    let cfg = SchedulerConfig {
        poll_interval_ms: 0,
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_scheduler_config_retries_above_limit() {
    let cfg = SchedulerConfig {
        default_max_retries: 5,
        max_retries_limit: 2,
        ..SchedulerConfig::default()
    };
    let err = cfg.validate().expect_err("should be rejected");
    assert!(err.contains("max_retries_limit"));
}

#[test]
fn test_scheduler_config_invalid_ratio() {
    let cfg = SchedulerConfig {
        completion_policy: CompletionPolicy::MinSuccessRatio(1.5),
        ..SchedulerConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_worker_pool_config_validation() {
    assert!(WorkerPoolConfig::new().validate().is_ok());
    assert!(WorkerPoolConfig::new().with_worker_count(0).validate().is_err());
    assert!(WorkerPoolConfig::new().with_max_queue_depth(0).validate().is_err());
    assert!(WorkerPoolConfig::new().with_thread_stack_size(1024).validate().is_err());
}

#[test]
fn test_app_config_from_json() {
    let json = r#"{
        "scheduler": {
            "poll_interval_ms": 1000,
            "completion_policy": { "min_success_ratio": 0.75 }
        },
        "workers": { "worker_count": 3 },
        "store": { "file": { "path": "/var/lib/emissions/batches.json" } }
    }"#;

    let cfg = AppConfig::from_json_str(json).expect("config");
    assert_eq!(cfg.scheduler.poll_interval_ms, 1000);
    assert_eq!(cfg.scheduler.completion_policy, CompletionPolicy::MinSuccessRatio(0.75));
    assert_eq!(cfg.scheduler.max_batches_per_poll, 10);
    assert_eq!(cfg.workers.worker_count, 3);
    assert!(matches!(cfg.store, StoreBackendConfig::File { .. }));
}

#[test]
fn test_app_config_from_json_rejects_invalid() {
    let json = r#"{ "workers": { "worker_count": 0 } }"#;
    let err = AppConfig::from_json_str(json).expect_err("invalid");
    assert!(err.starts_with("workers:"));

    assert!(AppConfig::from_json_str("{ not json").is_err());
}

#[test]
fn test_app_config_from_lookup() {
    let vars: HashMap<&str, &str> = [
        ("EMISSIONS_POLL_INTERVAL_MS", "5000"),
        ("EMISSIONS_WORKER_COUNT", "6"),
        ("EMISSIONS_COMPLETION_POLICY", "all_success"),
        ("EMISSIONS_STRICT_MODE", "false"),
        ("EMISSIONS_STORE_PATH", "/tmp/batches.json"),
        ("EMISSIONS_LOCK_WAIT_MS", ""),
    ]
    .into_iter()
    .collect();

    let cfg = AppConfig::from_lookup(|key| vars.get(key).map(|v| (*v).to_string())).expect("config");
    assert_eq!(cfg.scheduler.poll_interval_ms, 5000);
    assert_eq!(cfg.workers.worker_count, 6);
    assert_eq!(cfg.scheduler.completion_policy, CompletionPolicy::AllSuccess);
    assert!(!cfg.engine.strict_mode);
    assert_eq!(cfg.scheduler.lock_wait_ms, 2_000, "blank values keep the default");
    assert_eq!(
        cfg.store,
        StoreBackendConfig::File {
            path: "/tmp/batches.json".into()
        }
    );
}

#[test]
fn test_app_config_from_lookup_rejects_garbage() {
    let err = AppConfig::from_lookup(|key| (key == "EMISSIONS_MAX_RETRIES").then(|| "many".to_string()))
        .expect_err("invalid");
    assert!(err.contains("EMISSIONS_MAX_RETRIES"));
}
