//! Structured logging schema and field name constants for focus.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Failed writes, permanently failed jobs, requires operator attention |
//! | WARN  | Retries, slow capability calls, unexpectedly empty reads |
//! | INFO  | Lifecycle events, new-entity events, sync/reprocess summaries |
//! | DEBUG | Routing decisions, match scores, config choices |
//! | TRACE | Per-item iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "inference", "jobs", "pipeline", "resolver"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "archive", "queue", "ollama", "worker", "router"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "ingest", "claim_next", "classify", "resolve"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Raw interaction UUID being operated on.
pub const RAW_ID: &str = "raw_id";

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job kind enum variant.
pub const JOB_KIND: &str = "job_kind";

/// Source scope of a raw interaction (mail, document, transcript...).
pub const SOURCE_TYPE: &str = "source_type";

/// Person or project UUID created or matched by the resolver.
pub const ENTITY_ID: &str = "entity_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of rows or items touched by an operation.
pub const RESULT_COUNT: &str = "result_count";

/// Similarity score of a resolver match.
pub const SCORE: &str = "score";

// ─── Capability fields ─────────────────────────────────────────────────────

/// Model name used for classification or extraction.
pub const MODEL: &str = "model";

/// Classification label assigned to an interaction.
pub const LABEL: &str = "label";

/// Route chosen by the stage router.
pub const ROUTE: &str = "route";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Whether the operation succeeded.
pub const SUCCESS: &str = "success";

/// Error message (on failure).
pub const ERROR_MSG: &str = "error";

/// Attempt counter of a job at the time of the event.
pub const ATTEMPTS: &str = "attempts";

/// Capability calls slower than this are logged at WARN.
pub const SLOW_CAPABILITY_THRESHOLD_MS: u64 = 30_000;
