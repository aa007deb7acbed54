//! Repository and capability traits.
//!
//! Storage implementations live in `focus-db`; capability adapters in
//! `focus-inference`. Every trait is object-safe so the pipeline can be
//! wired with `Arc<dyn ...>`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::*;
use crate::priority::PrioritySnapshot;
use crate::Result;

// =============================================================================
// ARCHIVE
// =============================================================================

/// Append-only store of raw interactions.
#[async_trait]
pub trait ArchiveRepository: Send + Sync {
    /// Store an item, or return the existing row with the same content hash
    /// in the same source scope.
    async fn ingest(&self, req: IngestRequest) -> Result<IngestOutcome>;

    /// Fetch one raw interaction.
    async fn get(&self, raw_id: Uuid) -> Result<Option<RawInteraction>>;

    /// Overwrite the extraction envelope and stage of one row.
    ///
    /// Returns `false` when the row already carries an envelope from a newer
    /// extraction version, in which case nothing is written.
    async fn record_extraction(
        &self,
        raw_id: Uuid,
        version: i32,
        model: &str,
        result: &JsonValue,
        stage: Stage,
    ) -> Result<bool>;

    /// One page of rows whose extraction version is null or below
    /// `version_floor`, oldest first, strictly after `after`.
    async fn select_unprocessed_page(
        &self,
        version_floor: i32,
        after: Option<UnprocessedCursor>,
        limit: i64,
    ) -> Result<Vec<RawInteraction>>;

    /// Row counts per stage.
    async fn count_by_stage(&self) -> Result<HashMap<Stage, i64>>;
}

// =============================================================================
// ENTITIES
// =============================================================================

/// Person/project/fact storage. Creation and merge decisions come from the
/// resolver; this trait only persists them.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// All active people and projects with relationship collections loaded.
    async fn load_snapshot(&self) -> Result<EntitySnapshot>;

    /// Apply a resolution plan atomically.
    async fn apply_resolution(&self, plan: &ResolutionPlan) -> Result<ResolutionReport>;

    async fn get_person(&self, id: Uuid) -> Result<Option<Person>>;

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>>;

    /// Move links and facts from `retire` to `keep` and soft-retire `retire`.
    async fn merge_people(&self, keep: Uuid, retire: Uuid) -> Result<()>;

    async fn merge_projects(&self, keep: Uuid, retire: Uuid) -> Result<()>;

    /// Delete the AI-only facts derived from one raw interaction, keeping
    /// any the user has touched. Returns the number removed.
    async fn retract_facts(&self, raw_id: Uuid) -> Result<u64>;

    /// Facts derived from one raw interaction.
    async fn facts_for_interaction(&self, raw_id: Uuid) -> Result<Vec<StructuredFact>>;

    /// Apply user edits to a fact.
    async fn set_fact_overrides(&self, fact_id: Uuid, overrides: &FactOverrides) -> Result<()>;

    /// Apply user edits to a project.
    async fn set_project_overrides(
        &self,
        project_id: Uuid,
        pinned: Option<bool>,
        priority: Option<UserPriority>,
        deadline: Option<chrono::NaiveDate>,
    ) -> Result<()>;
}

// =============================================================================
// SPRINTS, ACCOUNTS, PRIORITY INPUTS
// =============================================================================

#[async_trait]
pub trait SprintRepository: Send + Sync {
    async fn create_sprint(&self, sprint: NewSprint) -> Result<Sprint>;

    async fn sprints_for_project(&self, project_id: Uuid) -> Result<Vec<Sprint>>;

    /// Deactivate active sprints whose `ends_at` is before `now`, completing
    /// auto-archive projects. Returns the sprints that were expired.
    async fn expire_sprints(&self, now: DateTime<Utc>) -> Result<Vec<Sprint>>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Create or update an account by name.
    async fn upsert_account(
        &self,
        name: &str,
        source_type: &str,
        priority_weight: f64,
    ) -> Result<SourceAccount>;

    async fn list_accounts(&self) -> Result<Vec<SourceAccount>>;
}

#[async_trait]
pub trait PriorityRepository: Send + Sync {
    /// Eagerly load everything the priority engine reads.
    async fn load_priority_snapshot(&self) -> Result<PrioritySnapshot>;
}

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Durable lease-based job queue.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Add a job. A colliding dedupe key on a non-terminal job returns that
    /// job instead.
    async fn enqueue(&self, req: EnqueueRequest) -> Result<EnqueueOutcome>;

    /// Claim the highest-priority, oldest claimable job of the given kinds
    /// (any kind when empty), leasing it for `lease`.
    async fn claim_next(&self, kinds: &[JobKind], lease: chrono::Duration)
        -> Result<Option<Job>>;

    /// Claim one specific job if it is still claimable.
    async fn try_claim(&self, job_id: Uuid, lease: chrono::Duration) -> Result<Option<Job>>;

    /// Mark a processing job done.
    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()>;

    /// Record a failed attempt: retry with backoff, or fail once attempts
    /// are exhausted.
    async fn fail(&self, job_id: Uuid, error: &str, backoff: &BackoffPolicy)
        -> Result<FailOutcome>;

    /// Record a failure that must not be retried.
    async fn fail_permanently(&self, job_id: Uuid, error: &str) -> Result<FailOutcome>;

    /// Return processing jobs with a lapsed lease to `retry` (or `failed`
    /// when out of attempts). Returns how many were reclaimed.
    async fn reclaim_expired_leases(&self, backoff: &BackoffPolicy) -> Result<u64>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;

    async fn stats(&self) -> Result<QueueStats>;

    async fn list_failed(&self, limit: i64) -> Result<Vec<Job>>;

    /// Delete terminal jobs last updated before `older_than`.
    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<u64>;
}

// =============================================================================
// CAPABILITIES
// =============================================================================

/// Text generation backend used by model-driven capabilities.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate a response constrained to JSON output.
    async fn generate_json_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Classification capability.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, raw: &RawInteraction) -> Result<Classification>;

    fn model_name(&self) -> &str;
}

/// Deep (remote, higher-fidelity) extraction tier.
#[async_trait]
pub trait DeepExtractor: Send + Sync {
    async fn extract(&self, raw: &RawInteraction, known: &KnownEntities)
        -> Result<ExtractionRecord>;

    fn model_name(&self) -> &str;
}

/// Lightweight local extraction tier. No external calls.
pub trait LightExtractor: Send + Sync {
    fn extract(&self, content: &str) -> LightExtraction;

    fn model_name(&self) -> &str;
}
