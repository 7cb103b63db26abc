//! Tests for the file-backed batch store

use std::time::Duration;

use emissions_scheduler::core::{
    ActivityOutcome, BatchFilter, BatchJob, BatchStatus, BatchStore, BatchSubmission, LeaseStore, SchedulerError,
    TransitionPatch,
};
use emissions_scheduler::infra::FileBatchStore;
use emissions_scheduler::util::now;

fn job(id: &str) -> BatchJob {
    BatchJob::new(
        id.to_string(),
        BatchSubmission {
            org_id: "org".to_string(),
            workspace_id: "ws".to_string(),
            activity_ids: vec!["a1".to_string(), "a2".to_string()],
            max_retries: None,
            priority: None,
        },
        1,
        now(),
    )
}

#[tokio::test]
async fn test_file_store_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store").join("batches.json");

    {
        let store = FileBatchStore::open(&path).expect("open");
        store.create_batch(job("batch_a")).await.expect("create");
        store.create_batch(job("batch_b")).await.expect("create");
        store
            .update_batch_status("batch_a", BatchStatus::Pending, BatchStatus::Queued, TransitionPatch::default())
            .await
            .expect("queue");
        store
            .update_batch_status("batch_a", BatchStatus::Queued, BatchStatus::Processing, TransitionPatch::default())
            .await
            .expect("process");
        store
            .record_outcome(
                "batch_a",
                0,
                ActivityOutcome::Failure {
                    activity_id: "a1".to_string(),
                    error: Some("activity not found: a1".to_string()),
                },
            )
            .await
            .expect("record");
    }

    assert!(path.exists());
    assert!(!path.with_extension("json.tmp").exists());

    let reopened = FileBatchStore::open(&path).expect("reopen");
    assert_eq!(reopened.path(), path.as_path());

    let a = reopened.get_batch("batch_a").await.expect("batch_a");
    assert_eq!(a.status, BatchStatus::Processing);
    assert_eq!(a.error_count, 1);
    assert_eq!(a.error_summary, vec!["a1: activity not found: a1"]);

    let log = reopened.progress_log("batch_a").await.expect("log");
    let states: Vec<BatchStatus> = log.iter().map(|e| e.to).collect();
    assert_eq!(states, vec![BatchStatus::Pending, BatchStatus::Queued, BatchStatus::Processing]);

    // Leases do not survive a restart, so the batch is an orphan now
    assert!(reopened.current_lease("batch_a").await.expect("lease").is_none());
    let in_flight = reopened.list_in_flight().await.expect("in flight");
    assert_eq!(in_flight.len(), 1);

    let pending = reopened.list_pending(10).await.expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "batch_b");
}

#[tokio::test]
async fn test_file_store_rejected_mutation_is_not_persisted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("batches.json");
    let store = FileBatchStore::open(&path).expect("open");
    store.create_batch(job("batch_a")).await.expect("create");

    let err = store
        .update_batch_status("batch_a", BatchStatus::Queued, BatchStatus::Processing, TransitionPatch::default())
        .await
        .expect_err("wrong from state");
    assert!(matches!(err, SchedulerError::Conflict(_)));

    let duplicate = store.create_batch(job("batch_a")).await;
    assert!(duplicate.is_err());

    let reopened = FileBatchStore::open(&path).expect("reopen");
    let listed = reopened.list_batches("org", &BatchFilter::default()).await.expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, BatchStatus::Pending);
}

#[tokio::test]
async fn test_file_store_leases() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileBatchStore::open(dir.path().join("batches.json")).expect("open");
    store.create_batch(job("batch_a")).await.expect("create");

    let ttl = Duration::from_secs(30);
    let lease = store
        .acquire_lease("batch_a", "w1", ttl)
        .await
        .expect("acquire")
        .expect("free");
    assert!(store.acquire_lease("batch_a", "w2", ttl).await.expect("acquire").is_none());

    let renewed = store.renew_lease(&lease, ttl).await.expect("renew");
    assert_eq!(renewed.token, lease.token);
    store.release_lease(&renewed).await.expect("release");
    assert!(store.acquire_lease("batch_a", "w2", ttl).await.expect("acquire").is_some());
}

#[test]
fn test_file_store_rejects_corrupt_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("batches.json");
    std::fs::write(&path, b"{ definitely not a snapshot").expect("write");
    assert!(matches!(FileBatchStore::open(&path), Err(SchedulerError::Persistence(_))));
}
