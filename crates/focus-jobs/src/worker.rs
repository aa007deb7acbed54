//! Job worker and runner for processing background jobs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, mpsc, Notify, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use focus_core::{
    defaults, BackoffPolicy, Error, FailOutcome, FocusConfig, Job, JobKind, JobRepository, Result,
};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::DEFAULT_POLL_INTERVAL_MS;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent jobs.
    pub max_concurrent_jobs: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Per-job execution limit. Should stay below the lease.
    pub job_timeout: Duration,
    /// Lease taken on every claim.
    pub lease: chrono::Duration,
    /// Retry backoff applied to failed attempts and reclaimed leases.
    pub backoff: BackoffPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            enabled: true,
            job_timeout: Duration::from_secs(defaults::JOB_TIMEOUT_SECS),
            lease: chrono::Duration::seconds(defaults::JOB_LEASE_SECS),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrent jobs |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Polling interval when queue is empty |
    /// | `JOB_TIMEOUT_SECS` | `240` | Per-job execution limit |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::JOB_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);

        let job_timeout = std::env::var("JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(defaults::JOB_TIMEOUT_SECS));

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            enabled,
            job_timeout,
            ..Self::default()
        }
    }

    /// Take lease and backoff settings from the shared configuration.
    pub fn with_focus_config(mut self, config: &FocusConfig) -> Self {
        self.lease = config.lease;
        self.backoff = config.backoff;
        self
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_lease(mut self, lease: chrono::Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    JobStarted { job_id: Uuid, kind: JobKind },
    JobProgress {
        job_id: Uuid,
        percent: i32,
        message: Option<String>,
    },
    JobCompleted { job_id: Uuid, kind: JobKind },
    /// Attempt failed; the job goes back to the queue at `retry_at`.
    JobRetrying {
        job_id: Uuid,
        kind: JobKind,
        error: String,
        retry_at: DateTime<Utc>,
    },
    /// Job failed for good.
    JobFailed {
        job_id: Uuid,
        kind: JobKind,
        error: String,
    },
    WorkerStarted,
    WorkerStopped,
}

/// What the queue recorded for one executed job.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Completed(Option<JsonValue>),
    Retrying {
        error: String,
        retry_at: DateTime<Utc>,
    },
    Failed(String),
    /// The outcome could not be recorded: the lease lapsed and the job was
    /// reclaimed, or the status write failed. The job will run again.
    Unrecorded(String),
}

/// A job that was claimed and executed.
#[derive(Debug, Clone)]
pub struct ExecutedJob {
    pub job: Job,
    pub disposition: Disposition,
}

type HandlerMap = Arc<RwLock<HashMap<JobKind, Arc<dyn JobHandler>>>>;

/// Claims and executes single jobs. Shared by the worker loop and by
/// callers that drain the queue inline.
#[derive(Clone)]
pub struct JobRunner {
    jobs: Arc<dyn JobRepository>,
    handlers: HandlerMap,
    event_tx: broadcast::Sender<WorkerEvent>,
    config: WorkerConfig,
}

impl JobRunner {
    pub fn new(jobs: Arc<dyn JobRepository>, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            jobs,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            config,
        }
    }

    /// Runner with a fixed handler set.
    pub fn with_handlers(
        jobs: Arc<dyn JobRepository>,
        config: WorkerConfig,
        handlers: impl IntoIterator<Item = Arc<dyn JobHandler>>,
    ) -> Self {
        let map: HashMap<JobKind, Arc<dyn JobHandler>> =
            handlers.into_iter().map(|h| (h.kind(), h)).collect();
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            jobs,
            handlers: Arc::new(RwLock::new(map)),
            event_tx,
            config,
        }
    }

    /// Register a handler for a job kind.
    pub async fn register_handler<H: JobHandler + 'static>(&self, handler: H) {
        self.register_arc(Arc::new(handler)).await;
    }

    async fn register_arc(&self, handler: Arc<dyn JobHandler>) {
        let kind = handler.kind();
        self.handlers.write().await.insert(kind, handler);
        debug!(%kind, "Registered job handler");
    }

    /// Kinds with a registered handler.
    pub async fn kinds(&self) -> Vec<JobKind> {
        let mut kinds: Vec<JobKind> = self.handlers.read().await.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn jobs(&self) -> &Arc<dyn JobRepository> {
        &self.jobs
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Claim the next job of the given kinds, or of any handled kind when
    /// `kinds` is empty.
    pub async fn claim(&self, kinds: &[JobKind]) -> Result<Option<Job>> {
        let kinds = if kinds.is_empty() {
            self.kinds().await
        } else {
            kinds.to_vec()
        };
        if kinds.is_empty() {
            return Ok(None);
        }
        self.jobs.claim_next(&kinds, self.config.lease).await
    }

    /// Claim and execute one job. `None` when nothing is claimable.
    pub async fn run_next(&self, kinds: &[JobKind]) -> Result<Option<ExecutedJob>> {
        match self.claim(kinds).await? {
            Some(job) => Ok(Some(self.execute(job).await)),
            None => Ok(None),
        }
    }

    /// Execute one claimed job and record its outcome on the queue.
    #[instrument(skip(self, job), fields(subsystem = "jobs", job_id = %job.id, job_kind = %job.kind))]
    pub async fn execute(&self, job: Job) -> ExecutedJob {
        let start = Instant::now();
        let job_id = job.id;
        let kind = job.kind;

        info!(attempt = job.attempts + 1, "Processing job");
        let _ = self.event_tx.send(WorkerEvent::JobStarted { job_id, kind });

        let handler = self.handlers.read().await.get(&kind).cloned();

        let result = match handler {
            Some(handler) => {
                let event_tx = self.event_tx.clone();
                let ctx = JobContext::new(job.clone()).with_progress_callback(
                    move |percent, message| {
                        let _ = event_tx.send(WorkerEvent::JobProgress {
                            job_id,
                            percent,
                            message: message.map(String::from),
                        });
                    },
                );

                let limit = self.config.job_timeout;
                match tokio::time::timeout(limit, handler.execute(ctx)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(timeout_secs = limit.as_secs(), "Job exceeded timeout");
                        JobResult::Retry(format!("Job exceeded timeout of {}s", limit.as_secs()))
                    }
                }
            }
            None => {
                warn!("No handler registered for job kind");
                JobResult::Failed(format!("No handler for job kind: {kind}"))
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let disposition = self.record(job_id, kind, result, duration_ms).await;
        ExecutedJob { job, disposition }
    }

    async fn record(
        &self,
        job_id: Uuid,
        kind: JobKind,
        result: JobResult,
        duration_ms: u64,
    ) -> Disposition {
        match result {
            JobResult::Success(data) => match self.jobs.complete(job_id, data.clone()).await {
                Ok(()) => {
                    info!(duration_ms, "Job completed successfully");
                    let _ = self.event_tx.send(WorkerEvent::JobCompleted { job_id, kind });
                    Disposition::Completed(data)
                }
                Err(e) => {
                    error!(error = %e, "Failed to mark job as completed");
                    Disposition::Unrecorded(e.to_string())
                }
            },
            JobResult::Retry(error) => {
                let outcome = self.jobs.fail(job_id, &error, &self.config.backoff).await;
                self.record_failure(job_id, kind, error, outcome, duration_ms)
            }
            JobResult::Failed(error) => {
                let outcome = self.jobs.fail_permanently(job_id, &error).await;
                self.record_failure(job_id, kind, error, outcome, duration_ms)
            }
        }
    }

    fn record_failure(
        &self,
        job_id: Uuid,
        kind: JobKind,
        error: String,
        outcome: Result<FailOutcome>,
        duration_ms: u64,
    ) -> Disposition {
        match outcome {
            Ok(FailOutcome::Retrying { retry_at }) => {
                warn!(%error, %retry_at, duration_ms, "Job attempt failed, will retry");
                let _ = self.event_tx.send(WorkerEvent::JobRetrying {
                    job_id,
                    kind,
                    error: error.clone(),
                    retry_at,
                });
                Disposition::Retrying { error, retry_at }
            }
            Ok(FailOutcome::Failed) => {
                error!(%error, duration_ms, "Job failed permanently");
                let _ = self.event_tx.send(WorkerEvent::JobFailed {
                    job_id,
                    kind,
                    error: error.clone(),
                });
                Disposition::Failed(error)
            }
            Ok(FailOutcome::Ignored) => {
                warn!(%error, "Job lease lapsed before failure was recorded");
                Disposition::Unrecorded(error)
            }
            Err(e) => {
                error!(error = %e, job_error = %error, "Failed to mark job as failed");
                Disposition::Unrecorded(e.to_string())
            }
        }
    }
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    task: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to shut down and wait for in-flight jobs.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Worker task failed: {e}")))
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Job worker that processes jobs from the queue.
pub struct JobWorker {
    runner: JobRunner,
    notify: Option<Arc<Notify>>,
}

impl JobWorker {
    pub fn new(jobs: Arc<dyn JobRepository>, config: WorkerConfig) -> Self {
        Self {
            runner: JobRunner::new(jobs, config),
            notify: None,
        }
    }

    /// Wake the loop early when this is notified (new job enqueued).
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    pub async fn register_handler<H: JobHandler + 'static>(&self, handler: H) {
        self.runner.register_handler(handler).await;
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.runner.events()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.runner.events();

        let task = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            task,
        }
    }

    /// Claims up to `max_concurrent_jobs` at a time and runs them
    /// concurrently. Only sleeps when the queue is empty.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker"))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        let config = self.runner.config().clone();
        if !config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        if config.job_timeout.as_secs() as i64 >= config.lease.num_seconds() {
            warn!(
                job_timeout_secs = config.job_timeout.as_secs(),
                lease_secs = config.lease.num_seconds(),
                "Job timeout is not below the lease; a slow job may run twice"
            );
        }

        // Leases held by a worker that died are returned before claiming.
        match self
            .runner
            .jobs()
            .reclaim_expired_leases(&config.backoff)
            .await
        {
            Ok(0) => {}
            Ok(n) => info!(reclaimed = n, "Reclaimed expired leases on startup"),
            Err(e) => error!(error = %e, "Failed to reclaim expired leases on startup"),
        }

        info!(
            poll_interval_ms = config.poll_interval_ms,
            max_concurrent = config.max_concurrent_jobs,
            "Job worker started"
        );
        let _ = self.runner.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Job worker received shutdown signal");
                break;
            }

            let mut tasks = tokio::task::JoinSet::new();
            for _ in 0..config.max_concurrent_jobs {
                match self.runner.claim(&[]).await {
                    Ok(Some(job)) => {
                        let runner = self.runner.clone();
                        tasks.spawn(async move {
                            runner.execute(job).await;
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "Failed to claim job");
                        break;
                    }
                }
            }

            if tasks.is_empty() {
                let woken = async {
                    match &self.notify {
                        Some(notify) => notify.notified().await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Job worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                    _ = woken => debug!("Woken by enqueue notification"),
                }
            } else {
                debug!(claimed = tasks.len(), "Processing concurrent job batch");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, "Job task panicked");
                    }
                }
            }
        }

        let _ = self.runner.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }
}

/// Builder for creating a job worker with handlers.
pub struct WorkerBuilder {
    jobs: Arc<dyn JobRepository>,
    config: WorkerConfig,
    handlers: Vec<Arc<dyn JobHandler>>,
    notify: Option<Arc<Notify>>,
}

impl WorkerBuilder {
    pub fn new(jobs: Arc<dyn JobRepository>) -> Self {
        Self {
            jobs,
            config: WorkerConfig::default(),
            handlers: Vec::new(),
            notify: None,
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Add a handler already shared with another runner.
    pub fn with_shared_handler(mut self, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    pub async fn build(self) -> JobWorker {
        let mut worker = JobWorker::new(self.jobs, self.config);
        for handler in self.handlers {
            worker.runner.register_arc(handler).await;
        }
        worker.notify = self.notify;
        worker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use focus_core::mock::MemoryStore;
    use focus_core::{EnqueueRequest, JobStatus};
    use serde_json::json;

    struct Scripted {
        kind: JobKind,
        result: JobResult,
    }

    #[async_trait]
    impl JobHandler for Scripted {
        fn kind(&self) -> JobKind {
            self.kind
        }

        async fn execute(&self, ctx: JobContext) -> JobResult {
            ctx.report_progress(100, Some("done"));
            self.result.clone()
        }
    }

    struct Sleepy;

    #[async_trait]
    impl JobHandler for Sleepy {
        fn kind(&self) -> JobKind {
            JobKind::SprintExpiry
        }

        async fn execute(&self, _ctx: JobContext) -> JobResult {
            sleep(Duration::from_secs(3600)).await;
            JobResult::Success(None)
        }
    }

    async fn runner_with(result: JobResult) -> (Arc<MemoryStore>, JobRunner) {
        let store = Arc::new(MemoryStore::new());
        let runner = JobRunner::new(store.clone(), WorkerConfig::default());
        runner
            .register_handler(Scripted {
                kind: JobKind::SprintExpiry,
                result,
            })
            .await;
        (store, runner)
    }

    async fn enqueue(store: &MemoryStore) -> Uuid {
        store
            .enqueue(EnqueueRequest::new(JobKind::SprintExpiry, json!({})))
            .await
            .unwrap()
            .job()
            .id
    }

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.max_concurrent_jobs, 4);
        assert!(config.enabled);
        assert!(config.job_timeout.as_secs() < config.lease.num_seconds() as u64);
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_poll_interval(1000)
            .with_max_concurrent(0)
            .with_enabled(false)
            .with_focus_config(
                &FocusConfig::default().with_lease(chrono::Duration::seconds(30)),
            );
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.max_concurrent_jobs, 1);
        assert!(!config.enabled);
        assert_eq!(config.lease.num_seconds(), 30);
    }

    #[tokio::test]
    async fn test_success_completes_job() {
        let (store, runner) = runner_with(JobResult::Success(Some(json!({"ok": true})))).await;
        let id = enqueue(&store).await;
        let mut events = runner.events();

        let executed = runner.run_next(&[]).await.unwrap().unwrap();
        assert_eq!(
            executed.disposition,
            Disposition::Completed(Some(json!({"ok": true})))
        );
        let job = JobRepository::get(store.as_ref(), id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);

        assert!(matches!(events.recv().await.unwrap(), WorkerEvent::JobStarted { .. }));
        assert!(matches!(events.recv().await.unwrap(), WorkerEvent::JobProgress { percent: 100, .. }));
        assert!(matches!(events.recv().await.unwrap(), WorkerEvent::JobCompleted { .. }));
    }

    #[tokio::test]
    async fn test_retry_schedules_backoff() {
        let (store, runner) = runner_with(JobResult::Retry("model timeout".into())).await;
        let id = enqueue(&store).await;

        let executed = runner.run_next(&[]).await.unwrap().unwrap();
        assert!(matches!(executed.disposition, Disposition::Retrying { .. }));
        let job = JobRepository::get(store.as_ref(), id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Retry);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.error_message.as_deref(), Some("model timeout"));

        // Backoff keeps it unclaimable for now.
        assert!(runner.run_next(&[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_result_is_not_retried() {
        let (store, runner) = runner_with(JobResult::Failed("bad payload".into())).await;
        let id = enqueue(&store).await;

        let executed = runner.run_next(&[]).await.unwrap().unwrap();
        assert_eq!(executed.disposition, Disposition::Failed("bad payload".into()));
        let job = JobRepository::get(store.as_ref(), id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_unhandled_kind_is_never_claimed() {
        let (store, runner) = runner_with(JobResult::Success(None)).await;
        store
            .enqueue(EnqueueRequest::new(JobKind::EntityMerge, json!({})))
            .await
            .unwrap();
        assert!(runner.run_next(&[]).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_retry() {
        let store = Arc::new(MemoryStore::new());
        let runner = JobRunner::new(
            store.clone(),
            WorkerConfig::default().with_job_timeout(Duration::from_secs(5)),
        );
        runner.register_handler(Sleepy).await;
        enqueue(&store).await;

        let executed = runner.run_next(&[]).await.unwrap().unwrap();
        match executed.disposition {
            Disposition::Retrying { error, .. } => assert!(error.contains("timeout")),
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_worker_processes_and_shuts_down() {
        let store = Arc::new(MemoryStore::new());
        let worker = WorkerBuilder::new(store.clone())
            .with_config(WorkerConfig::default().with_poll_interval(10))
            .with_handler(Scripted {
                kind: JobKind::SprintExpiry,
                result: JobResult::Success(None),
            })
            .build()
            .await;
        let id = enqueue(&store).await;

        let handle = worker.start();
        let mut events = handle.events();
        loop {
            match tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("worker event")
                .unwrap()
            {
                WorkerEvent::JobCompleted { job_id, .. } => {
                    assert_eq!(job_id, id);
                    break;
                }
                _ => continue,
            }
        }
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_worker_exits() {
        let store = Arc::new(MemoryStore::new());
        let worker = JobWorker::new(store, WorkerConfig::default().with_enabled(false));
        let handle = worker.start();
        // The loop returned immediately, so the shutdown send may find the
        // receiver gone; either way the task has finished.
        let _ = handle.shutdown().await;
    }
}
