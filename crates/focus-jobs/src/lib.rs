//! # focus-jobs
//!
//! Background processing for focus.
//!
//! This crate provides:
//! - The stage router (classify, route, extract, resolve) and the resolver planner
//! - Job handlers for every queued job kind
//! - A concurrent worker pool with leases, timeouts, retries and events
//! - Sync and reprocess runs that drain the queue inline and report counts
//! - A scheduler for periodic maintenance jobs
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use focus_db::Database;
//! use focus_jobs::{ProcessInteractionHandler, StageRouter, WorkerBuilder, WorkerConfig};
//!
//! let db = Database::connect("postgres://...").await?;
//! let router = Arc::new(StageRouter::new(
//!     Arc::new(db.archive.clone()),
//!     Arc::new(db.entities.clone()),
//!     classifier,
//!     extractor,
//!     light,
//! ));
//!
//! let worker = WorkerBuilder::new(Arc::new(db.jobs.clone()))
//!     .with_config(WorkerConfig::from_env())
//!     .with_handler(ProcessInteractionHandler::new(router))
//!     .build()
//!     .await;
//!
//! let handle = worker.start();
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//! handle.shutdown().await?;
//! ```

pub mod handler;
pub mod handlers;
pub mod pipeline;
pub mod resolver;
pub mod scheduler;
pub mod sync;
pub mod worker;

// Re-export core types
pub use focus_core::*;

pub use handler::{JobContext, JobHandler, JobResult};
pub use handlers::{
    EntityMergeHandler, LeaseReclaimHandler, ProcessInteractionHandler, SprintExpiryHandler,
};
pub use pipeline::StageRouter;
pub use resolver::Resolver;
pub use scheduler::{MaintenanceScheduler, SchedulerHandle};
pub use sync::{Connector, PipelineSummary, SyncService};
pub use worker::{
    Disposition, ExecutedJob, JobRunner, JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent,
    WorkerHandle,
};

/// Default polling interval for job processing (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = focus_core::defaults::JOB_POLL_INTERVAL_MS;
