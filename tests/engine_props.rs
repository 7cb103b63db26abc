//! Property tests for the emissions engine and batch accounting
//!
//! These tests cover:
//! - Emissions scale linearly with quantity
//! - Equivalent units produce equivalent emissions
//! - Batch totals match the sum of single calculations
//! - Completion policies and progress percentages

use std::sync::Arc;

use emissions_scheduler::config::{EngineConfig, RegistryConfig};
use emissions_scheduler::core::{BatchStatus, CompletionPolicy};
use emissions_scheduler::emissions::units::normalize;
use emissions_scheduler::emissions::{Activity, Engine, InMemoryFactorRegistry};
use proptest::prelude::*;

// ============================================================================
// HELPERS
// ============================================================================

fn engine(parallel: bool) -> Engine {
    let registry = Arc::new(InMemoryFactorRegistry::with_config(&RegistryConfig::default()));
    Engine::with_default_calculators(
        registry,
        EngineConfig {
            enable_parallel_batch: parallel,
            max_batch_concurrency: 4,
            ..EngineConfig::default()
        },
    )
}

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime")
        .block_on(fut)
}

fn electricity(id: &str, quantity: f64, unit: &str) -> Activity {
    Activity::new(id, "utility_bill", "electricity", quantity, unit).with_location("US")
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * a.abs().max(b.abs()).max(1.0)
}

// ============================================================================
// ENGINE
// ============================================================================

proptest! {
    #[test]
    fn test_emissions_scale_linearly(quantity in 0.0f64..1.0e6, factor in 1.0f64..50.0) {
        let engine = engine(false);
        let (base, scaled) = block_on(async {
            let base = engine.calculate(&electricity("a", quantity, "kWh")).await;
            let scaled = engine.calculate(&electricity("a", quantity * factor, "kWh")).await;
            (base, scaled)
        });
        let base = base.expect("base calculation");
        let scaled = scaled.expect("scaled calculation");
        prop_assert!(base.emissions_kg_co2e >= 0.0);
        prop_assert!(close(scaled.emissions_kg_co2e, base.emissions_kg_co2e * factor));
    }

    #[test]
    fn test_mwh_and_kwh_agree(mwh in 0.0f64..10_000.0) {
        let engine = engine(false);
        let (in_mwh, in_kwh) = block_on(async {
            (
                engine.calculate(&electricity("a", mwh, "MWh")).await,
                engine.calculate(&electricity("b", mwh * 1000.0, "kWh")).await,
            )
        });
        let in_mwh = in_mwh.expect("MWh calculation");
        let in_kwh = in_kwh.expect("kWh calculation");
        prop_assert!(close(in_mwh.emissions_kg_co2e, in_kwh.emissions_kg_co2e));
        prop_assert_eq!(in_mwh.normalized_unit, "kwh");
    }

    #[test]
    fn test_tonnes_are_kilograms_over_1000(quantity in 0.0f64..1.0e6) {
        let engine = engine(false);
        let record = block_on(engine.calculate(&electricity("a", quantity, "kWh"))).expect("calculation");
        prop_assert!(close(record.emissions_tonnes_co2e * 1000.0, record.emissions_kg_co2e));
    }

    #[test]
    fn test_batch_total_matches_single_calculations(
        quantities in prop::collection::vec(0.0f64..100_000.0, 1..40),
        parallel in any::<bool>(),
    ) {
        let engine = engine(parallel);
        let activities: Vec<Activity> = quantities
            .iter()
            .enumerate()
            .map(|(i, q)| electricity(&format!("a{i}"), *q, "kWh"))
            .collect();

        let (batch, singles) = block_on(async {
            let batch = engine.calculate_batch(&activities).await;
            let mut singles = 0.0;
            for activity in &activities {
                singles += engine.calculate(activity).await.expect("single").emissions_kg_co2e;
            }
            (batch, singles)
        });

        prop_assert_eq!(batch.success_count, activities.len());
        prop_assert_eq!(batch.error_count, 0);
        prop_assert_eq!(batch.records.len(), activities.len());
        prop_assert!(close(batch.total_emissions_kg_co2e, singles));
    }

    #[test]
    fn test_negative_quantities_are_rejected(quantity in -1.0e6f64..-0.001) {
        let engine = engine(false);
        let result = block_on(engine.calculate(&electricity("a", quantity, "kWh")));
        prop_assert!(result.is_err());
    }

    #[test]
    fn test_normalize_is_case_insensitive(quantity in 0.0f64..1.0e6) {
        let upper = normalize(quantity, "MWH");
        let lower = normalize(quantity, "mwh");
        prop_assert_eq!(upper.unit, lower.unit);
        prop_assert!(close(upper.quantity, lower.quantity));
    }
}

// ============================================================================
// COMPLETION POLICY
// ============================================================================

proptest! {
    #[test]
    fn test_no_successes_always_fails(errors in 0usize..1000) {
        for policy in [
            CompletionPolicy::AnySuccess,
            CompletionPolicy::AllSuccess,
            CompletionPolicy::MinSuccessRatio(0.5),
        ] {
            prop_assert_eq!(policy.decide(0, errors), BatchStatus::Failed);
        }
    }

    #[test]
    fn test_any_success_completes_with_one_success(success in 1usize..1000, errors in 0usize..1000) {
        prop_assert_eq!(CompletionPolicy::AnySuccess.decide(success, errors), BatchStatus::Completed);
    }

    #[test]
    fn test_all_success_requires_zero_errors(success in 1usize..1000, errors in 1usize..1000) {
        prop_assert_eq!(CompletionPolicy::AllSuccess.decide(success, 0), BatchStatus::Completed);
        prop_assert_eq!(CompletionPolicy::AllSuccess.decide(success, errors), BatchStatus::Failed);
    }

    #[test]
    fn test_ratio_policy_is_monotonic(success in 1usize..500, errors in 0usize..500, ratio in 0.01f64..1.0) {
        let policy = CompletionPolicy::MinSuccessRatio(ratio);
        if policy.decide(success, errors) == BatchStatus::Completed {
            prop_assert_eq!(policy.decide(success + 1, errors), BatchStatus::Completed);
        }
        if errors > 0 && policy.decide(success, errors) == BatchStatus::Failed {
            prop_assert_eq!(policy.decide(success, errors + 1), BatchStatus::Failed);
        }
    }
}
