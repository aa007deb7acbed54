//! Job queue semantics and the worker pool, against the in-memory store.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde_json::json;

use focus_core::mock::{MemoryStore, ScriptedClassifier, ScriptedExtractor};
use focus_core::{
    ArchiveRepository, BackoffPolicy, Classification, EnqueueRequest, ExtractionRecord,
    IngestRequest, JobKind, JobRepository, JobStatus, Label, Stage,
};
use focus_inference::PatternExtractor;
use focus_jobs::{
    LeaseReclaimHandler, ProcessInteractionHandler, StageRouter, WorkerBuilder, WorkerConfig,
    WorkerEvent,
};

fn lease() -> Duration {
    Duration::seconds(30)
}

#[tokio::test]
async fn test_concurrent_claims_on_one_job_yield_one_winner() {
    let store = Arc::new(MemoryStore::new());
    let job_id = store
        .enqueue(EnqueueRequest::new(JobKind::ProcessInteraction, json!({})))
        .await
        .unwrap()
        .job()
        .id;

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let store = store.clone();
        tasks.spawn(async move { store.try_claim(job_id, lease()).await.unwrap() });
    }

    let mut winners = 0;
    while let Some(result) = tasks.join_next().await {
        if result.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let claimed = JobRepository::get(store.as_ref(), job_id).await.unwrap().unwrap();
    assert_eq!(claimed.status, JobStatus::Processing);
    assert!(claimed.locked_until.is_some());
}

#[tokio::test]
async fn test_concurrent_claim_next_never_double_claims() {
    let store = Arc::new(MemoryStore::new());
    for _ in 0..5 {
        store
            .enqueue(EnqueueRequest::new(JobKind::ProcessInteraction, json!({})))
            .await
            .unwrap();
    }

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..12 {
        let store = store.clone();
        tasks.spawn(async move {
            store
                .claim_next(&[JobKind::ProcessInteraction], lease())
                .await
                .unwrap()
                .map(|j| j.id)
        });
    }

    let mut claimed = Vec::new();
    while let Some(result) = tasks.join_next().await {
        claimed.extend(result.unwrap());
    }
    claimed.sort();
    claimed.dedup();
    assert_eq!(claimed.len(), 5);
}

#[tokio::test]
async fn test_dedupe_key_holds_until_terminal() {
    let store = Arc::new(MemoryStore::new());
    let raw_id = uuid::Uuid::new_v4();

    let first = store
        .enqueue(EnqueueRequest::process_interaction(raw_id))
        .await
        .unwrap();
    assert!(first.is_created());

    // queued
    let dup = store
        .enqueue(EnqueueRequest::process_interaction(raw_id))
        .await
        .unwrap();
    assert_eq!(dup.job().id, first.job().id);

    // processing
    store.try_claim(first.job().id, lease()).await.unwrap().unwrap();
    assert!(!store
        .enqueue(EnqueueRequest::process_interaction(raw_id))
        .await
        .unwrap()
        .is_created());

    // retry
    store
        .fail(first.job().id, "timeout", &BackoffPolicy::default())
        .await
        .unwrap();
    assert!(!store
        .enqueue(EnqueueRequest::process_interaction(raw_id))
        .await
        .unwrap()
        .is_created());

    // failed
    store.advance_clock(Duration::hours(2));
    store.try_claim(first.job().id, lease()).await.unwrap().unwrap();
    store.fail_permanently(first.job().id, "gone").await.unwrap();

    let fresh = store
        .enqueue(EnqueueRequest::process_interaction(raw_id))
        .await
        .unwrap();
    assert!(fresh.is_created());
    assert_ne!(fresh.job().id, first.job().id);
    assert_eq!(store.stats().await.unwrap().total(), 2);
}

#[tokio::test]
async fn test_expired_lease_is_reclaimed_and_exhausts() {
    let store = Arc::new(MemoryStore::new());
    let job = store
        .enqueue(EnqueueRequest::new(JobKind::SprintExpiry, json!({})).with_max_attempts(2))
        .await
        .unwrap()
        .job()
        .clone();
    let backoff = BackoffPolicy::new(0, 0);

    store.try_claim(job.id, lease()).await.unwrap().unwrap();
    store.advance_clock(Duration::minutes(1));
    assert_eq!(store.reclaim_expired_leases(&backoff).await.unwrap(), 1);
    let after = JobRepository::get(store.as_ref(), job.id).await.unwrap().unwrap();
    assert_eq!(after.status, JobStatus::Retry);
    assert_eq!(after.attempts, 1);

    // A worker that lost its lease cannot record an outcome.
    assert_eq!(
        store.fail(job.id, "late", &backoff).await.unwrap(),
        focus_core::FailOutcome::Ignored
    );

    store.try_claim(job.id, lease()).await.unwrap().unwrap();
    store.advance_clock(Duration::minutes(1));
    store.reclaim_expired_leases(&backoff).await.unwrap();
    let last = JobRepository::get(store.as_ref(), job.id).await.unwrap().unwrap();
    assert_eq!(last.status, JobStatus::Failed);
    assert_eq!(store.list_failed(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cleanup_purges_only_old_terminal_jobs() {
    let store = Arc::new(MemoryStore::new());
    let done = store
        .enqueue(EnqueueRequest::new(JobKind::SprintExpiry, json!({})))
        .await
        .unwrap()
        .job()
        .id;
    store
        .enqueue(EnqueueRequest::new(JobKind::LeaseReclaim, json!({})))
        .await
        .unwrap();
    store.try_claim(done, lease()).await.unwrap().unwrap();
    store.complete(done, Some(json!({"expired": 0}))).await.unwrap();

    store.advance_clock(Duration::days(30));
    let purged = store.cleanup(store.now() - Duration::days(14)).await.unwrap();
    assert_eq!(purged, 1);
    assert_eq!(store.jobs().len(), 1);
    assert_eq!(store.jobs()[0].status, JobStatus::Queued);
}

#[tokio::test]
async fn test_worker_pool_processes_interactions_end_to_end() {
    let store = Arc::new(MemoryStore::new());
    let router = StageRouter::new(
        store.clone(),
        store.clone(),
        Arc::new(
            ScriptedClassifier::new(Classification::new(Label::Human, 0.9))
                .with_rule("unsubscribe", Classification::new(Label::Newsletter, 0.9)),
        ),
        Arc::new(ScriptedExtractor::new(ExtractionRecord::default())),
        Arc::new(PatternExtractor::new()),
    );

    let mut ids = Vec::new();
    for body in ["Deals this week, unsubscribe below", "Quick question about Monday"] {
        let raw = store
            .ingest(IngestRequest::new("mail", body, Utc::now()))
            .await
            .unwrap()
            .into_record();
        store
            .enqueue(EnqueueRequest::process_interaction(raw.id))
            .await
            .unwrap();
        ids.push(raw.id);
    }

    let worker = WorkerBuilder::new(store.clone())
        .with_config(WorkerConfig::default().with_poll_interval(10).with_max_concurrent(2))
        .with_handler(ProcessInteractionHandler::new(Arc::new(router)))
        .with_handler(LeaseReclaimHandler::new(store.clone(), BackoffPolicy::default()))
        .build()
        .await;
    let mut events = worker.events();
    let handle = worker.start();

    let mut completed = 0;
    while completed < 2 {
        let event = tokio::time::timeout(StdDuration::from_secs(5), events.recv())
            .await
            .expect("worker event before timeout")
            .unwrap();
        match event {
            WorkerEvent::JobCompleted { kind, .. } => {
                assert_eq!(kind, JobKind::ProcessInteraction);
                completed += 1;
            }
            WorkerEvent::JobFailed { error, .. } | WorkerEvent::JobRetrying { error, .. } => {
                panic!("unexpected failure: {error}")
            }
            _ => {}
        }
    }
    handle.shutdown().await.unwrap();

    let stage = |id| {
        let store = store.clone();
        async move {
            ArchiveRepository::get(store.as_ref(), id)
                .await
                .unwrap()
                .unwrap()
                .stage
        }
    };
    assert_eq!(stage(ids[0]).await, Stage::Archived);
    assert_eq!(stage(ids[1]).await, Stage::Extracted);
    assert_eq!(store.stats().await.unwrap().done, 2);
}
