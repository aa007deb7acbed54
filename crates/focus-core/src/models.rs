//! Core data models for focus.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{defaults, Error, Result};

/// Implements `as_str`, `Display` and `FromStr` for a unit enum stored as text.
macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Database/wire representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(Error::InvalidInput(format!(
                        concat!("unknown ", stringify!($ty), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

pub(crate) use text_enum;

pub mod extraction;
pub mod resolution;

pub use extraction::*;
pub use resolution::*;

// =============================================================================
// ARCHIVE
// =============================================================================

/// Processing state of a raw interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingested,
    Classified,
    Extracted,
    Parsed,
    Archived,
    Discarded,
    Resolved,
}

text_enum!(Stage {
    Ingested => "ingested",
    Classified => "classified",
    Extracted => "extracted",
    Parsed => "parsed",
    Archived => "archived",
    Discarded => "discarded",
    Resolved => "resolved",
});

impl Stage {
    /// Whether the state machine has nothing further to do for this stage.
    pub fn is_final(&self) -> bool {
        !matches!(self, Stage::Ingested | Stage::Classified)
    }
}

/// Mutable extraction layer attached to a raw interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionEnvelope {
    pub extraction_version: i32,
    pub extraction_model: String,
    pub extraction_result: JsonValue,
    pub last_processed_at: DateTime<Utc>,
}

/// One immutable ingested item plus its replaceable extraction envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawInteraction {
    pub id: Uuid,
    pub source_type: String,
    pub source_id: Option<String>,
    pub account_id: Option<Uuid>,
    pub raw_content: String,
    pub raw_metadata: JsonValue,
    pub content_hash: String,
    pub interaction_date: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub stage: Stage,
    pub envelope: Option<ExtractionEnvelope>,
}

impl RawInteraction {
    /// Whether this row still needs processing at `version_floor`.
    pub fn needs_processing(&self, version_floor: i32) -> bool {
        match &self.envelope {
            None => true,
            Some(env) => env.extraction_version < version_floor,
        }
    }

    /// Metadata value as a string, if present.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.raw_metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Request to store one item in the archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub source_type: String,
    pub source_id: Option<String>,
    pub account_id: Option<Uuid>,
    pub content: String,
    pub metadata: JsonValue,
    pub occurred_at: DateTime<Utc>,
}

impl IngestRequest {
    pub fn new(
        source_type: impl Into<String>,
        content: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source_type: source_type.into(),
            source_id: None,
            account_id: None,
            content: content.into(),
            metadata: JsonValue::Object(Default::default()),
            occurred_at,
        }
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_account(mut self, account_id: Uuid) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Result of an ingest call.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// A new row was stored.
    Created(RawInteraction),
    /// Identical content already existed in this source scope.
    Duplicate(RawInteraction),
}

impl IngestOutcome {
    pub fn record(&self) -> &RawInteraction {
        match self {
            IngestOutcome::Created(r) | IngestOutcome::Duplicate(r) => r,
        }
    }

    pub fn into_record(self) -> RawInteraction {
        match self {
            IngestOutcome::Created(r) | IngestOutcome::Duplicate(r) => r,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestOutcome::Duplicate(_))
    }
}

/// Keyset position for paging through unprocessed rows, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnprocessedCursor {
    pub interaction_date: DateTime<Utc>,
    pub id: Uuid,
}

impl From<&RawInteraction> for UnprocessedCursor {
    fn from(raw: &RawInteraction) -> Self {
        Self {
            interaction_date: raw.interaction_date,
            id: raw.id,
        }
    }
}

// =============================================================================
// ENTITIES
// =============================================================================

/// Canonical lifecycle of a person or project record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Active,
    Retired,
    Merged,
}

text_enum!(EntityStatus {
    Active => "active",
    Retired => "retired",
    Merged => "merged",
});

/// Entity type, used by merge requests and mention links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Project,
}

text_enum!(EntityKind {
    Person => "person",
    Project => "project",
});

/// A canonical person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: Uuid,
    pub name: String,
    /// Normalized name used for matching and uniqueness.
    pub name_key: String,
    pub email: Option<String>,
    pub organization: Option<String>,
    pub status: EntityStatus,
    pub merged_into: Option<Uuid>,
    pub mention_count: i32,
    pub source_diversity: i32,
    pub first_seen: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    /// Projects this person is associated with. Loaded eagerly.
    pub project_ids: Vec<Uuid>,
}

/// Work lifecycle of a project, independent of its canonical status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Paused,
    Completed,
    Archived,
}

text_enum!(ProjectStatus {
    Active => "active",
    Paused => "paused",
    Completed => "completed",
    Archived => "archived",
});

/// A canonical project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub entity_status: EntityStatus,
    pub merged_into: Option<Uuid>,
    pub pinned: bool,
    pub user_priority: Option<UserPriority>,
    pub user_deadline: Option<NaiveDate>,
    pub mention_count: i32,
    pub source_diversity: i32,
    pub first_seen: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    /// People associated with this project. Loaded eagerly.
    pub person_ids: Vec<Uuid>,
}

/// Explicit priority set by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserPriority {
    Critical,
    High,
    Normal,
    Low,
}

text_enum!(UserPriority {
    Critical => "critical",
    High => "high",
    Normal => "normal",
    Low => "low",
});

impl UserPriority {
    /// Score contribution of this override.
    pub fn bonus(&self) -> f64 {
        match self {
            UserPriority::Critical => 80.0,
            UserPriority::High => 40.0,
            UserPriority::Normal => 0.0,
            UserPriority::Low => -20.0,
        }
    }
}

/// Priority estimated by the extraction pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferredPriority {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

text_enum!(InferredPriority {
    Urgent => "urgent",
    High => "high",
    Normal => "normal",
    Low => "low",
});

impl InferredPriority {
    /// Unweighted baseline added last by the priority engine.
    pub fn baseline(&self) -> f64 {
        match self {
            InferredPriority::Urgent => 30.0,
            InferredPriority::High => 15.0,
            InferredPriority::Normal => 0.0,
            InferredPriority::Low => -10.0,
        }
    }

    /// Parse model output, falling back to normal for anything unrecognized.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "urgent" | "critical" | "asap" => InferredPriority::Urgent,
            "high" => InferredPriority::High,
            "low" => InferredPriority::Low,
            _ => InferredPriority::Normal,
        }
    }
}

// =============================================================================
// STRUCTURED FACTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    Task,
    Commitment,
}

text_enum!(FactKind {
    Task => "task",
    Commitment => "commitment",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactStatus {
    #[default]
    Open,
    Done,
    Dismissed,
}

text_enum!(FactStatus {
    Open => "open",
    Done => "done",
    Dismissed => "dismissed",
});

/// Who owes a commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentDirection {
    /// Someone else promised something to the user.
    ToMe,
    /// The user promised something.
    FromMe,
}

text_enum!(CommitmentDirection {
    ToMe => "to_me",
    FromMe => "from_me",
});

/// A task or commitment derived from one extraction result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredFact {
    pub id: Uuid,
    pub kind: FactKind,
    pub raw_id: Uuid,
    /// Normalized description; identifies the fact within its raw interaction.
    pub fact_key: String,
    pub description: String,
    pub person_id: Option<Uuid>,
    pub project_id: Option<Uuid>,
    pub account_id: Option<Uuid>,
    pub direction: Option<CommitmentDirection>,
    // AI-inferred, replaced on reprocessing
    pub inferred_priority: InferredPriority,
    pub inferred_due: Option<NaiveDate>,
    pub inferred_status: FactStatus,
    // User-owned, never touched by reprocessing
    pub pinned: bool,
    pub user_priority: Option<UserPriority>,
    pub user_deadline: Option<NaiveDate>,
    pub user_status: Option<FactStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StructuredFact {
    pub fn has_user_overrides(&self) -> bool {
        self.pinned
            || self.user_priority.is_some()
            || self.user_deadline.is_some()
            || self.user_status.is_some()
    }

    pub fn effective_status(&self) -> FactStatus {
        self.user_status.unwrap_or(self.inferred_status)
    }
}

/// User edits to a fact. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactOverrides {
    pub pinned: Option<bool>,
    pub priority: Option<UserPriority>,
    pub deadline: Option<NaiveDate>,
    pub status: Option<FactStatus>,
}

// =============================================================================
// SPRINTS AND ACCOUNTS
// =============================================================================

/// Time-bounded multiplicative boost on one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sprint {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub boost: f64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub auto_archive: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Sprint {
    /// Whether this sprint boosts its project at `now`.
    pub fn applies_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.starts_at <= now && now <= self.ends_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSprint {
    pub project_id: Uuid,
    pub name: String,
    pub boost: f64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub auto_archive: bool,
}

impl NewSprint {
    pub fn validate(&self) -> Result<()> {
        if self.ends_at <= self.starts_at {
            return Err(Error::InvalidInput("sprint must end after it starts".into()));
        }
        if self.boost.is_nan() || self.boost < 0.0 {
            return Err(Error::InvalidInput(format!(
                "sprint boost must be a non-negative number, got {}",
                self.boost
            )));
        }
        Ok(())
    }
}

/// An originating account whose items may be weighted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAccount {
    pub id: Uuid,
    pub name: String,
    pub source_type: String,
    pub priority_weight: f64,
}

// =============================================================================
// JOBS
// =============================================================================

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Run one raw interaction through the stage router
    ProcessInteraction,
    /// Deactivate sprints past their end
    SprintExpiry,
    /// Return lapsed leases to the queue
    LeaseReclaim,
    /// Merge a duplicate person or project into its canonical record
    EntityMerge,
}

text_enum!(JobKind {
    ProcessInteraction => "process_interaction",
    SprintExpiry => "sprint_expiry",
    LeaseReclaim => "lease_reclaim",
    EntityMerge => "entity_merge",
});

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::ProcessInteraction,
        JobKind::SprintExpiry,
        JobKind::LeaseReclaim,
        JobKind::EntityMerge,
    ];
}

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Retry,
    Done,
    Failed,
}

text_enum!(JobStatus {
    Queued => "queued",
    Processing => "processing",
    Retry => "retry",
    Done => "done",
    Failed => "failed",
});

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// A durable unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub dedupe_key: Option<String>,
    pub payload: JsonValue,
    pub status: JobStatus,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether a worker may claim this job at `now`.
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, JobStatus::Queued | JobStatus::Retry)
            && self.locked_until.map_or(true, |until| until <= now)
    }
}

/// Request to add a job to the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub kind: JobKind,
    pub dedupe_key: Option<String>,
    pub payload: JsonValue,
    pub priority: i32,
    pub max_attempts: i32,
}

impl EnqueueRequest {
    pub fn new(kind: JobKind, payload: JsonValue) -> Self {
        Self {
            kind,
            dedupe_key: None,
            payload,
            priority: defaults::JOB_PRIORITY,
            max_attempts: defaults::JOB_MAX_ATTEMPTS,
        }
    }

    pub fn with_dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Standard request for running one raw interaction through the pipeline.
    pub fn process_interaction(raw_id: Uuid) -> Self {
        let payload = serde_json::json!({ "raw_id": raw_id });
        Self::new(JobKind::ProcessInteraction, payload)
            .with_dedupe_key(format!("process_interaction:{raw_id}"))
    }
}

/// Result of an enqueue call.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    Created(Job),
    /// A non-terminal job with the same dedupe key already exists.
    Existing(Job),
}

impl EnqueueOutcome {
    pub fn job(&self) -> &Job {
        match self {
            EnqueueOutcome::Created(j) | EnqueueOutcome::Existing(j) => j,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueOutcome::Created(_))
    }
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Scheduled for another attempt no earlier than `retry_at`.
    Retrying { retry_at: DateTime<Utc> },
    /// Attempts exhausted or failure was permanent.
    Failed,
    /// The job was no longer in `processing` (lease lapsed and reclaimed).
    Ignored,
}

/// Exponential retry backoff: `base * 2^attempts`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_secs: i64,
    pub cap_secs: i64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_secs: defaults::JOB_BACKOFF_BASE_SECS,
            cap_secs: defaults::JOB_BACKOFF_CAP_SECS,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_secs: i64, cap_secs: i64) -> Self {
        Self {
            base_secs: base_secs.max(0),
            cap_secs: cap_secs.max(0),
        }
    }

    /// Delay before the next attempt, given the attempt count after increment.
    pub fn delay_for(&self, attempts: i32) -> chrono::Duration {
        let exp = attempts.clamp(0, 30) as u32;
        let secs = self
            .base_secs
            .saturating_mul(1_i64 << exp)
            .min(self.cap_secs);
        chrono::Duration::seconds(secs)
    }
}

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: i64,
    pub processing: i64,
    pub retry: i64,
    pub done: i64,
    pub failed: i64,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.queued + self.processing + self.retry + self.done + self.failed
    }

    /// Jobs that still have work ahead of them.
    pub fn outstanding(&self) -> i64 {
        self.queued + self.processing + self.retry
    }

    pub fn add(&mut self, status: JobStatus, count: i64) {
        match status {
            JobStatus::Queued => self.queued += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Retry => self.retry += count,
            JobStatus::Done => self.done += count,
            JobStatus::Failed => self.failed += count,
        }
    }
}

/// Payload of a `process_interaction` job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInteractionPayload {
    pub raw_id: Uuid,
}

/// Payload of an `entity_merge` job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMergePayload {
    pub kind: EntityKind,
    pub keep: Uuid,
    pub retire: Uuid,
}
