//! Tests for error types

use emissions_scheduler::core::{CalculationError, PoolError, SchedulerError};
use emissions_scheduler::emissions::Scope;

#[test]
fn test_lock_timeout_error() {
    let err = SchedulerError::LockTimeout {
        batch_id: "batch_1".to_string(),
        waited_ms: 2000,
    };
    assert_eq!(format!("{err}"), "lock timeout for batch batch_1 after 2000ms");
    assert!(err.is_infrastructure());
    assert_eq!(err.status_code(), 500);
}

#[test]
fn test_validation_error() {
    let err = SchedulerError::Validation("activity_ids cannot be empty".to_string());
    assert_eq!(format!("{err}"), "validation error: activity_ids cannot be empty");
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert!(!err.is_infrastructure());
}

#[test]
fn test_pool_error_converts() {
    let err: SchedulerError = PoolError::AtCapacity { capacity: 4 }.into();
    assert!(matches!(err, SchedulerError::Pool(PoolError::AtCapacity { capacity: 4 })));
    assert_eq!(format!("{err}"), "worker pool error: all 4 worker slots are in use");
}

#[test]
fn test_calculation_errors() {
    let err = CalculationError::UnsupportedUnit {
        unit: "furlong".to_string(),
        scope: Scope::Scope2,
    };
    assert!(err.to_string().contains("furlong"));

    let missing = CalculationError::ActivityNotFound("a9".to_string());
    assert_eq!(missing.to_string(), "activity not found: a9");
    assert_eq!(missing.clone(), missing);
}
