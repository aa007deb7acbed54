//! Periodic and administrative job handlers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::info;

use focus_core::{
    defaults, BackoffPolicy, EntityKind, EntityMergePayload, EntityRepository, Error, JobKind,
    JobRepository, SprintRepository,
};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Deactivates sprints past their end date.
pub struct SprintExpiryHandler {
    sprints: Arc<dyn SprintRepository>,
}

impl SprintExpiryHandler {
    pub fn new(sprints: Arc<dyn SprintRepository>) -> Self {
        Self { sprints }
    }
}

#[async_trait]
impl JobHandler for SprintExpiryHandler {
    fn kind(&self) -> JobKind {
        JobKind::SprintExpiry
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        match self.sprints.expire_sprints(Utc::now()).await {
            Ok(expired) => {
                if !expired.is_empty() {
                    info!(
                        subsystem = "jobs",
                        component = "maintenance",
                        result_count = expired.len(),
                        "Expired sprints"
                    );
                }
                let ids: Vec<_> = expired.iter().map(|s| s.id).collect();
                JobResult::Success(Some(json!({
                    "expired": expired.len(),
                    "sprint_ids": ids,
                })))
            }
            Err(e) => JobResult::from_error(&e),
        }
    }
}

/// Returns expired leases to the queue and purges old terminal jobs.
pub struct LeaseReclaimHandler {
    jobs: Arc<dyn JobRepository>,
    backoff: BackoffPolicy,
    retention: chrono::Duration,
}

impl LeaseReclaimHandler {
    pub fn new(jobs: Arc<dyn JobRepository>, backoff: BackoffPolicy) -> Self {
        Self {
            jobs,
            backoff,
            retention: chrono::Duration::days(defaults::JOB_RETENTION_DAYS),
        }
    }

    /// How long finished jobs are kept before cleanup.
    pub fn with_retention(mut self, retention: chrono::Duration) -> Self {
        self.retention = retention;
        self
    }
}

#[async_trait]
impl JobHandler for LeaseReclaimHandler {
    fn kind(&self) -> JobKind {
        JobKind::LeaseReclaim
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        let reclaimed = match self.jobs.reclaim_expired_leases(&self.backoff).await {
            Ok(n) => n,
            Err(e) => return JobResult::from_error(&e),
        };
        let purged = match self.jobs.cleanup(Utc::now() - self.retention).await {
            Ok(n) => n,
            Err(e) => return JobResult::from_error(&e),
        };
        if reclaimed > 0 || purged > 0 {
            info!(
                subsystem = "jobs",
                component = "maintenance",
                reclaimed,
                purged,
                "Queue maintenance"
            );
        }
        JobResult::Success(Some(json!({ "reclaimed": reclaimed, "purged": purged })))
    }
}

/// Merges a duplicate person or project into the one that is kept.
pub struct EntityMergeHandler {
    entities: Arc<dyn EntityRepository>,
}

impl EntityMergeHandler {
    pub fn new(entities: Arc<dyn EntityRepository>) -> Self {
        Self { entities }
    }
}

#[async_trait]
impl JobHandler for EntityMergeHandler {
    fn kind(&self) -> JobKind {
        JobKind::EntityMerge
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload: EntityMergePayload = match ctx.payload_as() {
            Ok(p) => p,
            Err(e) => return JobResult::from_error(&e),
        };

        let merged = match payload.kind {
            EntityKind::Person => self.entities.merge_people(payload.keep, payload.retire).await,
            EntityKind::Project => {
                self.entities
                    .merge_projects(payload.keep, payload.retire)
                    .await
            }
        };

        match merged {
            Ok(()) => {
                info!(
                    subsystem = "jobs",
                    component = "maintenance",
                    keep = %payload.keep,
                    retire = %payload.retire,
                    "Merged entities"
                );
                JobResult::Success(Some(json!({ "keep": payload.keep, "retire": payload.retire })))
            }
            // Merge targets are chosen by an operator; a missing one will not appear later.
            Err(Error::NotFound(what)) => JobResult::Failed(format!("merge target missing: {what}")),
            Err(e) => JobResult::from_error(&e),
        }
    }
}
