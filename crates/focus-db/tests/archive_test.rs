//! Integration tests for the raw interaction archive.
//!
//! Run with a migrated PostgreSQL available at `DATABASE_URL`:
//! `cargo test -p focus-db --test archive_test -- --ignored`

use chrono::{Duration, Utc};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;

use focus_core::archive::unprocessed_stream_with_page_size;
use focus_db::test_fixtures::TestDatabase;
use focus_db::{unprocessed_stream, ArchiveRepository, IngestRequest, Stage};

#[tokio::test]
#[ignore] // Requires database connection
async fn test_ingest_same_content_returns_existing_row() {
    let test_db = TestDatabase::new().await;
    let archive = &test_db.db.archive;

    let first = archive
        .ingest(IngestRequest::new("mail", "Quarterly numbers attached", Utc::now()))
        .await
        .unwrap();
    let second = archive
        .ingest(IngestRequest::new("mail", "Quarterly numbers attached", Utc::now()))
        .await
        .unwrap();

    assert!(!first.is_duplicate());
    assert!(second.is_duplicate());
    assert_eq!(first.record().id, second.record().id);

    // Same bytes from a different source scope are a distinct row.
    let other = archive
        .ingest(IngestRequest::new("document", "Quarterly numbers attached", Utc::now()))
        .await
        .unwrap();
    assert!(!other.is_duplicate());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_concurrent_ingest_stores_one_row() {
    let test_db = TestDatabase::new().await;
    let archive = Arc::new(test_db.db.archive.clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let archive = archive.clone();
        handles.push(tokio::spawn(async move {
            archive
                .ingest(IngestRequest::new("mail", "race me", Utc::now()))
                .await
                .unwrap()
        }));
    }
    let mut ids = Vec::new();
    let mut created = 0;
    for handle in handles {
        let outcome = handle.await.unwrap();
        if !outcome.is_duplicate() {
            created += 1;
        }
        ids.push(outcome.record().id);
    }
    assert_eq!(created, 1);
    ids.dedup();
    assert_eq!(ids.len(), 1);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_raw_content_is_immutable() {
    let test_db = TestDatabase::new().await;
    let raw = test_db.ingest("mail", "original body").await;

    let result = sqlx::query("UPDATE raw_interaction SET raw_content = 'edited' WHERE id = $1")
        .bind(raw.id)
        .execute(&test_db.pool)
        .await;
    assert!(result.is_err(), "raw content must not be editable");

    let result = sqlx::query("DELETE FROM raw_interaction WHERE id = $1")
        .bind(raw.id)
        .execute(&test_db.pool)
        .await;
    assert!(result.is_err(), "raw interactions must not be deletable");

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_record_extraction_never_downgrades() {
    let test_db = TestDatabase::new().await;
    let archive = &test_db.db.archive;
    let raw = test_db.ingest("mail", "body").await;

    assert!(archive
        .record_extraction(raw.id, 2, "model-b", &json!({"v": 2}), Stage::Archived)
        .await
        .unwrap());
    assert!(!archive
        .record_extraction(raw.id, 1, "model-a", &json!({"v": 1}), Stage::Discarded)
        .await
        .unwrap());

    let stored = archive.get(raw.id).await.unwrap().unwrap();
    let envelope = stored.envelope.unwrap();
    assert_eq!(envelope.extraction_version, 2);
    assert_eq!(envelope.extraction_model, "model-b");
    assert_eq!(stored.stage, Stage::Archived);
    assert_eq!(stored.raw_content, "body");

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_unprocessed_stream_pages_oldest_first() {
    let test_db = TestDatabase::new().await;
    let archive = &test_db.db.archive;
    let base = Utc::now() - Duration::days(10);

    for i in 0..7 {
        archive
            .ingest(IngestRequest::new("mail", format!("item {i}"), base + Duration::hours(i)))
            .await
            .unwrap();
    }
    let done = test_db.ingest("mail", "already processed").await;
    archive
        .record_extraction(done.id, 1, "m", &json!({}), Stage::Archived)
        .await
        .unwrap();

    let repo: Arc<dyn ArchiveRepository> = Arc::new(archive.clone());
    let rows: Vec<_> = unprocessed_stream_with_page_size(repo, 1, 3)
        .map(|r| r.unwrap())
        .collect()
        .await;
    assert_eq!(rows.len(), 7);
    assert!(rows.windows(2).all(|w| w[0].interaction_date <= w[1].interaction_date));
    assert!(rows.iter().all(|r| r.id != done.id));

    // Raising the floor brings processed rows back into scope.
    let repo: Arc<dyn ArchiveRepository> = Arc::new(archive.clone());
    let all: Vec<_> = unprocessed_stream(repo, 2)
        .map(|r| r.unwrap())
        .collect()
        .await;
    assert_eq!(all.len(), 8);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_count_by_stage() {
    let test_db = TestDatabase::new().await;
    let a = test_db.ingest("mail", "a").await;
    test_db.ingest("mail", "b").await;
    test_db
        .db
        .archive
        .record_extraction(a.id, 1, "m", &json!({}), Stage::Discarded)
        .await
        .unwrap();

    let counts = test_db.db.archive.count_by_stage().await.unwrap();
    assert_eq!(counts.get(&Stage::Ingested), Some(&1));
    assert_eq!(counts.get(&Stage::Discarded), Some(&1));

    test_db.cleanup().await;
}
