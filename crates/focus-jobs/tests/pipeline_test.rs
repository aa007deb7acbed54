//! Stage router behavior against the in-memory store: the resolution gate,
//! reprocessing idempotence and the mail-to-priority scenario.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use focus_core::mock::{MemoryStore, ScriptedClassifier, ScriptedExtractor};
use focus_core::priority::temporal_urgency;
use focus_core::{
    ArchiveRepository, Classification, CommitmentDirection, EntityRepository, ExtractedCommitment,
    ExtractedTask, ExtractionRecord, FactKind, FactOverrides, IngestRequest, Label, NewProjectRef,
    PriorityRepository, RankingScope, RawInteraction, Stage, WaitingOn,
};
use focus_inference::PatternExtractor;
use focus_jobs::{PipelineSummary, StageRouter, SyncService, WorkerConfig};

fn router_with(store: &Arc<MemoryStore>, extractor: ScriptedExtractor) -> StageRouter {
    StageRouter::new(
        store.clone(),
        store.clone(),
        Arc::new(ScriptedClassifier::new(Classification::new(Label::Human, 0.9))),
        Arc::new(extractor),
        Arc::new(PatternExtractor::new()),
    )
}

async fn ingest(store: &MemoryStore, content: &str) -> RawInteraction {
    store
        .ingest(IngestRequest::new("mail", content, Utc::now()))
        .await
        .unwrap()
        .into_record()
}

/// Run a single-field extraction through the router and return the store.
async fn run_single_field(record: ExtractionRecord) -> (Arc<MemoryStore>, Stage) {
    let store = Arc::new(MemoryStore::new());
    let router = router_with(&store, ScriptedExtractor::new(record));
    let raw = ingest(&store, "a message worth reading").await;
    let report = router.process(&raw).await.unwrap();
    (store, report.stage)
}

// =============================================================================
// RESOLUTION GATE: one test per entity-bearing field
// =============================================================================

#[tokio::test]
async fn test_gate_tasks_only() {
    let (store, stage) = run_single_field(ExtractionRecord {
        tasks: vec![ExtractedTask {
            description: "Send the signed contract".into(),
            ..Default::default()
        }],
        ..Default::default()
    })
    .await;

    assert_eq!(stage, Stage::Resolved);
    let facts = store.facts();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].kind, FactKind::Task);
}

#[tokio::test]
async fn test_gate_commitments_only() {
    let (store, stage) = run_single_field(ExtractionRecord {
        commitments: vec![ExtractedCommitment {
            description: "Share the draft".into(),
            to_whom: Some("Dana Whitfield".into()),
            ..Default::default()
        }],
        ..Default::default()
    })
    .await;

    assert_eq!(stage, Stage::Resolved);
    let people = store.people();
    assert_eq!(people.len(), 1);
    assert_eq!(people[0].name, "Dana Whitfield");
    let facts = store.facts();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].kind, FactKind::Commitment);
    assert_eq!(facts[0].person_id, Some(people[0].id));
}

#[tokio::test]
async fn test_gate_people_only() {
    let (store, stage) = run_single_field(ExtractionRecord {
        people_mentioned: vec!["Priya Patel".into()],
        ..Default::default()
    })
    .await;

    assert_eq!(stage, Stage::Resolved);
    assert_eq!(store.people().len(), 1);
    assert_eq!(store.people()[0].mention_count, 1);
}

#[tokio::test]
async fn test_gate_project_links_only() {
    let (store, stage) = run_single_field(ExtractionRecord {
        project_links: vec!["Atlas Migration".into()],
        ..Default::default()
    })
    .await;

    assert_eq!(stage, Stage::Resolved);
    let projects = store.projects();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].slug, "atlas-migration");
}

#[tokio::test]
async fn test_gate_new_projects_only() {
    let (store, stage) = run_single_field(ExtractionRecord {
        new_projects: vec![NewProjectRef {
            name: "Garden Redesign".into(),
            description: Some("Back yard, spring".into()),
        }],
        ..Default::default()
    })
    .await;

    assert_eq!(stage, Stage::Resolved);
    let projects = store.projects();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].description.as_deref(), Some("Back yard, spring"));
}

#[tokio::test]
async fn test_gate_waiting_on_only() {
    let (store, stage) = run_single_field(ExtractionRecord {
        waiting_on: vec![WaitingOn {
            description: "Invoice from the printer".into(),
            from: Some("Omar Haddad".into()),
            since: None,
        }],
        ..Default::default()
    })
    .await;

    assert_eq!(stage, Stage::Resolved);
    let people = store.people();
    assert_eq!(people.len(), 1);
    let facts = store.facts();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].direction, Some(CommitmentDirection::ToMe));
    assert_eq!(facts[0].person_id, Some(people[0].id));
}

#[tokio::test]
async fn test_gate_closed_when_no_entity_fields() {
    let (store, stage) = run_single_field(ExtractionRecord {
        sentiment: Some("neutral".into()),
        reply_needed: false,
        ..Default::default()
    })
    .await;

    assert_eq!(stage, Stage::Extracted);
    assert!(store.people().is_empty());
    assert!(store.facts().is_empty());
}

// =============================================================================
// SENDER IDENTITY
// =============================================================================

async fn ingest_from(store: &MemoryStore, content: &str, from: &str) -> RawInteraction {
    store
        .ingest(
            IngestRequest::new("mail", content, Utc::now()).with_metadata(json!({ "from": from })),
        )
        .await
        .unwrap()
        .into_record()
}

#[tokio::test]
async fn test_sender_address_sticks_across_display_names() {
    let store = Arc::new(MemoryStore::new());
    let task = |description: &str| ExtractionRecord {
        tasks: vec![ExtractedTask {
            description: description.into(),
            ..Default::default()
        }],
        ..Default::default()
    };
    let extractor = ScriptedExtractor::new(ExtractionRecord::default())
        .with_rule(
            "kickoff",
            ExtractionRecord {
                people_mentioned: vec!["Sara Chen".into()],
                ..Default::default()
            },
        )
        .with_rule("agenda", task("Send the agenda"))
        .with_rule("minutes", task("Circulate the minutes"));
    let router = router_with(&store, extractor);

    let first = ingest(&store, "kickoff notes").await;
    router.process(&first).await.unwrap();
    let second = ingest_from(&store, "agenda attached", "Sara Chen <sara.chen@initech.com>").await;
    router.process(&second).await.unwrap();
    let third = ingest_from(&store, "minutes from today", "S. Chen <sara.chen@initech.com>").await;
    assert_eq!(router.process(&third).await.unwrap().stage, Stage::Resolved);

    let people = store.people();
    assert_eq!(people.len(), 1, "one person per address: {people:?}");
    assert_eq!(people[0].name, "Sara Chen");
    assert_eq!(people[0].email.as_deref(), Some("sara.chen@initech.com"));
    assert_eq!(people[0].organization.as_deref(), Some("Initech"));
    assert_eq!(people[0].mention_count, 3);
}

// =============================================================================
// REPROCESSING
// =============================================================================

fn rich_record() -> ExtractionRecord {
    ExtractionRecord {
        tasks: vec![ExtractedTask {
            description: "Book the venue".into(),
            assigned_to: Some("Sarah Chen".into()),
            project: Some("Offsite 2026".into()),
            ..Default::default()
        }],
        commitments: vec![ExtractedCommitment {
            description: "Send the budget".into(),
            to_whom: Some("Sarah Chen".into()),
            project: Some("Offsite 2026".into()),
            ..Default::default()
        }],
        people_mentioned: vec!["Sarah Chen".into(), "Miguel".into()],
        project_links: vec!["Offsite 2026".into()],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_reprocessing_creates_no_duplicates() {
    let store = Arc::new(MemoryStore::new());
    let router = router_with(&store, ScriptedExtractor::new(rich_record()));
    let raw = ingest(&store, "offsite planning thread").await;

    let first = router.process(&raw).await.unwrap();
    let people = store.people();
    let projects = store.projects();
    let facts = store.facts();
    assert_eq!(first.people_created, 2);
    assert_eq!(first.projects_created, 1);
    assert_eq!(facts.len(), 2);

    let second = router.process(&raw).await.unwrap();
    assert_eq!(second.people_created, 0);
    assert_eq!(second.projects_created, 0);

    let ids = |v: Vec<uuid::Uuid>| {
        let mut v = v;
        v.sort();
        v
    };
    assert_eq!(
        ids(store.people().iter().map(|p| p.id).collect()),
        ids(people.iter().map(|p| p.id).collect())
    );
    assert_eq!(
        ids(store.projects().iter().map(|p| p.id).collect()),
        ids(projects.iter().map(|p| p.id).collect())
    );
    assert_eq!(
        ids(store.facts().iter().map(|f| f.id).collect()),
        ids(facts.iter().map(|f| f.id).collect())
    );
    // Mentions are links, not counters: a second pass does not inflate them.
    assert!(store.people().iter().all(|p| p.mention_count == 1));
}

#[tokio::test]
async fn test_reprocess_run_picks_up_rows_below_floor() {
    let store = Arc::new(MemoryStore::new());
    let v1 = router_with(&store, ScriptedExtractor::new(rich_record()));
    let raw = ingest(&store, "offsite planning thread").await;
    v1.process(&raw).await.unwrap();
    let facts_before = store.facts().len();

    let v2 = Arc::new(
        router_with(&store, ScriptedExtractor::new(rich_record())).with_extraction_version(2),
    );
    let service = SyncService::new(store.clone(), store.clone(), v2, WorkerConfig::default());

    let summary = service.reprocess(2).await.unwrap();
    assert_eq!(summary.resolved, 1);
    assert_eq!(summary.errored(), 0);
    assert_eq!(store.facts().len(), facts_before);

    let row = ArchiveRepository::get(store.as_ref(), raw.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.envelope.unwrap().extraction_version, 2);

    // Nothing left below the floor.
    assert_eq!(service.reprocess(2).await.unwrap(), PipelineSummary::default());
}

#[tokio::test]
async fn test_reprocess_without_entities_retracts_stale_facts() {
    let store = Arc::new(MemoryStore::new());
    let v1 = router_with(&store, ScriptedExtractor::new(rich_record()));
    let raw = ingest(&store, "offsite planning thread").await;
    v1.process(&raw).await.unwrap();
    assert_eq!(store.facts().len(), 2);

    // The user pinned one of the two facts.
    let pinned = store.facts()[0].id;
    store
        .set_fact_overrides(
            pinned,
            &FactOverrides {
                pinned: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let v2 = Arc::new(
        router_with(&store, ScriptedExtractor::new(ExtractionRecord::default()))
            .with_extraction_version(2),
    );
    let service = SyncService::new(store.clone(), store.clone(), v2, WorkerConfig::default());
    let summary = service.reprocess(2).await.unwrap();
    assert_eq!(summary.extracted, 1);
    assert_eq!(summary.resolved, 0);

    let facts = store.facts();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].id, pinned);
    let row = ArchiveRepository::get(store.as_ref(), raw.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.stage, Stage::Extracted);
}

#[tokio::test]
async fn test_reclassified_to_archive_retracts_facts() {
    let store = Arc::new(MemoryStore::new());
    let v1 = router_with(&store, ScriptedExtractor::new(rich_record()));
    let raw = ingest(&store, "offsite planning thread").await;
    v1.process(&raw).await.unwrap();
    assert!(!store.facts().is_empty());

    let v2 = StageRouter::new(
        store.clone(),
        store.clone(),
        Arc::new(ScriptedClassifier::new(Classification::new(Label::Newsletter, 0.9))),
        Arc::new(ScriptedExtractor::new(rich_record())),
        Arc::new(PatternExtractor::new()),
    )
    .with_extraction_version(2);
    let report = v2.process_id(raw.id).await.unwrap();
    assert_eq!(report.stage, Stage::Archived);
    assert!(store.facts_for_interaction(raw.id).await.unwrap().is_empty());
}

// =============================================================================
// MAIL TO PRIORITY
// =============================================================================

#[tokio::test]
async fn test_commitment_mail_raises_project_priority() {
    let store = Arc::new(MemoryStore::new());
    let deadline = (Utc::now() + Duration::days(3)).date_naive();
    let body = "I'll review the spec by Friday, talk to Sara about it";

    let extractor = ScriptedExtractor::new(ExtractionRecord::default()).with_rule(
        "review the spec",
        ExtractionRecord {
            commitments: vec![ExtractedCommitment {
                description: "review spec".into(),
                by: Some("me".into()),
                to_whom: Some("Sara".into()),
                deadline: Some(deadline.to_string()),
                project: Some("Spec Review".into()),
            }],
            people_mentioned: vec!["Sara".into()],
            ..Default::default()
        },
    );
    let router = router_with(&store, extractor);
    let raw = ingest(&store, body).await;

    let report = router.process(&raw).await.unwrap();
    assert_eq!(report.label, Label::Human);
    assert_eq!(report.stage, Stage::Resolved);

    let people = store.people();
    assert_eq!(people.len(), 1);
    assert_eq!(people[0].name, "Sara");

    let facts = store.facts();
    assert_eq!(facts.len(), 1);
    let commitment = &facts[0];
    assert_eq!(commitment.kind, FactKind::Commitment);
    assert_eq!(commitment.person_id, Some(people[0].id));
    assert_eq!(commitment.inferred_due, Some(deadline));
    let project_id = commitment.project_id.expect("commitment linked to a project");

    let now = Utc::now();
    let snapshot = store.load_priority_snapshot().await.unwrap();
    let ranked = snapshot.rank_projects(now, RankingScope::All);
    let project = ranked
        .iter()
        .find(|r| r.item.id == project_id)
        .expect("project ranked");

    assert_eq!(project.item.inferred_due, Some(deadline));
    assert_eq!(temporal_urgency(project.item.inferred_due, now), 70.0);
    assert!((project.score - project.item.inferred_score - 70.0).abs() < 1e-9);
}
