//! Periodic enqueueing of maintenance jobs.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use focus_core::{
    defaults, EnqueueOutcome, EnqueueRequest, Error, FocusConfig, JobKind, JobRepository, Result,
};

/// Fixed dedupe keys, so at most one of each maintenance job is outstanding.
pub const SPRINT_EXPIRY_KEY: &str = "maintenance:sprint_expiry";
pub const LEASE_RECLAIM_KEY: &str = "maintenance:lease_reclaim";

/// Enqueues `sprint_expiry` and `lease_reclaim` jobs on fixed intervals.
pub struct MaintenanceScheduler {
    jobs: Arc<dyn JobRepository>,
    sprint_expiry_every: Duration,
    lease_reclaim_every: Duration,
}

impl MaintenanceScheduler {
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            jobs,
            sprint_expiry_every: Duration::from_secs(defaults::SPRINT_EXPIRY_INTERVAL_SECS),
            lease_reclaim_every: Duration::from_secs(defaults::LEASE_RECLAIM_INTERVAL_SECS),
        }
    }

    pub fn with_focus_config(mut self, config: &FocusConfig) -> Self {
        self.sprint_expiry_every = config.sprint_expiry_interval;
        self.lease_reclaim_every = config.lease_reclaim_interval;
        self
    }

    pub fn with_intervals(mut self, sprint_expiry: Duration, lease_reclaim: Duration) -> Self {
        self.sprint_expiry_every = sprint_expiry;
        self.lease_reclaim_every = lease_reclaim;
        self
    }

    /// Enqueue a `sprint_expiry` job unless one is already outstanding.
    pub async fn tick_sprint_expiry(&self) -> Result<EnqueueOutcome> {
        self.enqueue(JobKind::SprintExpiry, SPRINT_EXPIRY_KEY).await
    }

    /// Enqueue a `lease_reclaim` job unless one is already outstanding.
    pub async fn tick_lease_reclaim(&self) -> Result<EnqueueOutcome> {
        self.enqueue(JobKind::LeaseReclaim, LEASE_RECLAIM_KEY).await
    }

    async fn enqueue(&self, kind: JobKind, key: &str) -> Result<EnqueueOutcome> {
        let req = EnqueueRequest::new(kind, json!({}))
            .with_dedupe_key(key)
            .with_priority(defaults::MAINTENANCE_JOB_PRIORITY);
        let outcome = self.jobs.enqueue(req).await?;
        if outcome.is_created() {
            debug!(job_kind = %kind, job_id = %outcome.job().id, "Scheduled maintenance job");
        }
        Ok(outcome)
    }

    /// Run until shut down. The first tick of each interval fires at once.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(async move {
            let mut sprints = interval(self.sprint_expiry_every);
            let mut leases = interval(self.lease_reclaim_every);
            sprints.set_missed_tick_behavior(MissedTickBehavior::Delay);
            leases.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                subsystem = "jobs",
                component = "scheduler",
                sprint_expiry_secs = self.sprint_expiry_every.as_secs(),
                lease_reclaim_secs = self.lease_reclaim_every.as_secs(),
                "Maintenance scheduler started"
            );

            loop {
                let result = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = sprints.tick() => self.tick_sprint_expiry().await,
                    _ = leases.tick() => self.tick_lease_reclaim().await,
                };
                if let Err(e) = result {
                    error!(subsystem = "jobs", component = "scheduler", error = %e, "Failed to enqueue maintenance job");
                }
            }

            info!(subsystem = "jobs", component = "scheduler", "Maintenance scheduler stopped");
        });

        SchedulerHandle { shutdown_tx, task }
    }
}

/// Handle for stopping a running scheduler.
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl SchedulerHandle {
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Scheduler task failed: {e}")))
    }
}
