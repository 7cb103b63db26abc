//! Benchmarks for the emissions engine and batch store.
//!
//! Benchmarks cover:
//! - Single-activity calculation per scope
//! - Batch calculation, sequential and parallel
//! - Outcome recording in the in-memory store

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;

use emissions_scheduler::config::{EngineConfig, RegistryConfig};
use emissions_scheduler::core::{ActivityOutcome, BatchJob, BatchStatus, BatchStore, BatchSubmission, TransitionPatch};
use emissions_scheduler::emissions::{Activity, Engine, InMemoryFactorRegistry};
use emissions_scheduler::infra::InMemoryBatchStore;
use emissions_scheduler::util::now;

use tokio::runtime::Runtime;

// ============================================================================
// Fixtures
// ============================================================================

fn engine(parallel: bool) -> Engine {
    let registry = Arc::new(InMemoryFactorRegistry::with_config(&RegistryConfig::default()));
    Engine::with_default_calculators(
        registry,
        EngineConfig {
            enable_parallel_batch: parallel,
            ..EngineConfig::default()
        },
    )
}

fn activities(n: usize) -> Vec<Activity> {
    (0..n)
        .map(|i| match i % 3 {
            0 => Activity::new(format!("a{i}"), "utility_bill", "electricity", 1200.0, "kWh").with_location("US-WEST"),
            1 => Activity::new(format!("a{i}"), "fleet", "diesel", 80.0, "L"),
            _ => Activity::new(format!("a{i}"), "travel", "flight-long", 5400.0, "passenger-km"),
        })
        .collect()
}

// ============================================================================
// Engine
// ============================================================================

fn bench_calculate_single(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let engine = engine(false);
    let mut group = c.benchmark_group("calculate_single");

    for (name, activity) in ["scope2", "scope1", "scope3"].into_iter().zip(activities(3)) {
        let engine = &engine;
        let activity = &activity;
        group.bench_function(name, |b| {
            b.to_async(&rt).iter(|| async move {
                black_box(engine.calculate(black_box(activity)).await.ok());
            });
        });
    }
    group.finish();
}

fn bench_calculate_batch(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("calculate_batch");

    for size in [10usize, 100, 1000] {
        let batch = activities(size);
        group.throughput(Throughput::Elements(size as u64));
        for parallel in [false, true] {
            let engine = engine(parallel);
            let id = BenchmarkId::new(if parallel { "parallel" } else { "sequential" }, size);
            let engine = &engine;
            group.bench_with_input(id, &batch, |b, batch| {
                b.to_async(&rt).iter(|| async move {
                    black_box(engine.calculate_batch(batch).await);
                });
            });
        }
    }
    group.finish();
}

// ============================================================================
// Store
// ============================================================================

fn bench_record_outcomes(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("record_outcomes");

    for size in [100usize, 1000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let store = InMemoryBatchStore::new();
                let ids: Vec<String> = (0..size).map(|i| format!("a{i}")).collect();
                let job = BatchJob::new(
                    "batch_bench000000000".into(),
                    BatchSubmission {
                        org_id: "org".into(),
                        workspace_id: "ws".into(),
                        activity_ids: ids.clone(),
                        max_retries: None,
                        priority: None,
                    },
                    0,
                    now(),
                );
                store.create_batch(job).await.expect("create");
                for (from, to) in [
                    (BatchStatus::Pending, BatchStatus::Queued),
                    (BatchStatus::Queued, BatchStatus::Processing),
                ] {
                    store
                        .update_batch_status("batch_bench000000000", from, to, TransitionPatch::default())
                        .await
                        .expect("transition");
                }
                for activity_id in ids {
                    store
                        .record_outcome(
                            "batch_bench000000000",
                            0,
                            ActivityOutcome::Failure {
                                activity_id,
                                error: None,
                            },
                        )
                        .await
                        .expect("record");
                }
                black_box(store.len());
            });
        });
    }
    group.finish();
}

criterion_group!(engine_benches, bench_calculate_single, bench_calculate_batch);
criterion_group!(store_benches, bench_record_outcomes);
criterion_main!(engine_benches, store_benches);
