//! Tests for API models and handlers

use std::sync::Arc;

use emissions_scheduler::config::{EngineConfig, SchedulerConfig, WorkerPoolConfig};
use emissions_scheduler::core::{BatchScheduler, BatchStatus, NoopAuditSink, SchedulerDeps, SchedulerError};
use emissions_scheduler::emissions::{Engine, InMemoryFactorRegistry};
use emissions_scheduler::infra::{InMemoryActivitySource, InMemoryBatchStore};
use emissions_scheduler::runtime::api::{self, ErrorResponse, ListBatchesQuery, SubmitBatchRequest};

fn scheduler() -> BatchScheduler {
    let store = Arc::new(InMemoryBatchStore::new());
    BatchScheduler::new(
        SchedulerDeps {
            store: store.clone(),
            leases: store,
            source: Arc::new(InMemoryActivitySource::new()),
            engine: Arc::new(Engine::with_default_calculators(
                Arc::new(InMemoryFactorRegistry::new()),
                EngineConfig::default(),
            )),
            audit: Arc::new(NoopAuditSink),
        },
        SchedulerConfig::default(),
        WorkerPoolConfig::new().with_worker_count(1).with_max_queue_depth(1),
    )
    .expect("scheduler")
}

fn request(ids: &[&str]) -> SubmitBatchRequest {
    SubmitBatchRequest {
        workspace_id: "ws".to_string(),
        activity_ids: ids.iter().map(|s| (*s).to_string()).collect(),
        max_retries: None,
        priority: None,
    }
}

#[test]
fn test_error_response_mapping() {
    let not_found = ErrorResponse::from(SchedulerError::NotFound("batch x".into()));
    assert_eq!(not_found.status, 404);
    assert_eq!(not_found.code, "NOT_FOUND");
    assert_eq!(not_found.error, "not found: batch x");

    let conflict = ErrorResponse::from(SchedulerError::Conflict("busy".into()));
    assert_eq!((conflict.status, conflict.code.as_str()), (409, "CONFLICT"));

    let internal = ErrorResponse::from(SchedulerError::Persistence("disk on fire".into()));
    assert_eq!(internal.status, 500);
    assert_eq!(internal.code, "INTERNAL_ERROR");
    assert!(!internal.error.contains("disk"), "internal details are not exposed");
}

#[test]
fn test_submit_request_defaults() {
    let req: SubmitBatchRequest = serde_json::from_str(r#"{ "activity_ids": ["a1"] }"#).expect("parse");
    assert_eq!(req.activity_ids, vec!["a1"]);
    assert!(req.max_retries.is_none());
    assert!(req.workspace_id.is_empty());
}

#[tokio::test]
async fn test_submit_get_and_list() {
    let scheduler = scheduler();

    let submitted = api::submit_batch(&scheduler, "org", request(&["a1", "a2"]))
        .await
        .expect("submit");
    assert_eq!(submitted.status, BatchStatus::Pending);
    assert_eq!(submitted.activity_count, 2);

    let detail = api::get_batch(&scheduler, "org", &submitted.batch_id).await.expect("detail");
    assert_eq!(detail.id, submitted.batch_id);
    assert_eq!(detail.remaining_count, 2);
    assert_eq!(detail.max_retries, 3);
    assert!(detail.duration_seconds.is_none());

    let json = serde_json::to_value(&detail).expect("serialize");
    assert_eq!(json["status"], "pending");
    assert!(json.get("started_at").is_none());

    let page = api::list_batches(
        &scheduler,
        "org",
        ListBatchesQuery {
            status: Some("pending".into()),
            limit: Some(5_000),
            offset: None,
        },
    )
    .await
    .expect("list");
    assert_eq!(page.total, 1);
    assert_eq!(page.limit, 1000);

    let progress = api::get_progress(&scheduler, "org", &submitted.batch_id).await.expect("progress");
    assert_eq!(progress.total_count, 2);
    assert_eq!(progress.processed_count, 0);
}

#[tokio::test]
async fn test_handler_errors() {
    let scheduler = scheduler();

    let invalid = api::submit_batch(&scheduler, "org", request(&[])).await.expect_err("empty batch");
    assert_eq!(invalid.status, 400);

    let bad_status = api::list_batches(
        &scheduler,
        "org",
        ListBatchesQuery {
            status: Some("sleeping".into()),
            ..ListBatchesQuery::default()
        },
    )
    .await
    .expect_err("unknown status");
    assert_eq!(bad_status.code, "VALIDATION_ERROR");

    let submitted = api::submit_batch(&scheduler, "org", request(&["a1"])).await.expect("submit");
    let foreign = api::get_batch(&scheduler, "other", &submitted.batch_id).await.expect_err("foreign");
    assert_eq!(foreign.status, 404);

    let cancelled = api::cancel_batch(&scheduler, "org", &submitted.batch_id).await.expect("cancel");
    assert_eq!(cancelled.status, BatchStatus::Cancelled);
    let again = api::cancel_batch(&scheduler, "org", &submitted.batch_id).await.expect_err("again");
    assert_eq!(again.status, 409);

    let retry = api::retry_batch(&scheduler, "org", &submitted.batch_id).await.expect_err("not failed");
    assert_eq!(retry.status, 409);

    api::delete_batch(&scheduler, "org", &submitted.batch_id).await.expect("delete");
    assert_eq!(api::health(&scheduler).status, "degraded");
    assert_eq!(api::stats(&scheduler).batches_cancelled, 1);
}
