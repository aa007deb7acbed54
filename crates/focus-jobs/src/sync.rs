//! Sync and reprocess: ingest from connectors, enqueue, and drain the queue
//! inline.
//!
//! Enqueueing is never gated on whether a fetch returned anything new. Every
//! run sweeps the archive for rows below the current extraction version, so
//! backlog left by an earlier partial failure is always picked up. Dedupe keys
//! keep the sweep from creating a second job for work already queued.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use focus_core::{
    defaults, unprocessed_stream, ArchiveRepository, EnqueueRequest, IngestRequest, JobKind,
    JobRepository, Result, Stage, StageReport,
};

use crate::handler::JobHandler;
use crate::handlers::ProcessInteractionHandler;
use crate::pipeline::StageRouter;
use crate::worker::{Disposition, JobRunner, WorkerConfig};

/// An external source of interactions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Source scope used for dedupe (`mail`, `document`, `transcript`...).
    fn source_type(&self) -> &str;

    /// Fetch items to ingest. Returning items already archived is fine.
    async fn fetch(&self) -> Result<Vec<IngestRequest>>;
}

/// Counts reported by a sync or reprocess run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub fetched: u64,
    pub ingested: u64,
    pub duplicates: u64,
    /// Interactions that completed a pass (every pass classifies).
    pub classified: u64,
    /// Deep extractions, whether or not they went on to resolution.
    pub extracted: u64,
    pub parsed: u64,
    pub archived: u64,
    pub discarded: u64,
    pub resolved: u64,
    /// Attempts that failed and were scheduled again.
    pub retried: u64,
    /// Jobs that failed for good.
    pub failed: u64,
    /// Connectors whose fetch failed.
    pub fetch_errors: u64,
    /// Fetched items that could not be archived or enqueued.
    pub ingest_errors: u64,
}

impl PipelineSummary {
    /// Total error count across attempts, jobs, connectors and ingests.
    pub fn errored(&self) -> u64 {
        self.retried + self.failed + self.fetch_errors + self.ingest_errors
    }

    pub fn record(&mut self, report: &StageReport) {
        self.classified += 1;
        match report.stage {
            Stage::Extracted => self.extracted += 1,
            Stage::Resolved => {
                self.extracted += 1;
                self.resolved += 1;
            }
            Stage::Parsed => self.parsed += 1,
            Stage::Archived => self.archived += 1,
            Stage::Discarded => self.discarded += 1,
            Stage::Ingested | Stage::Classified => {}
        }
    }

    fn absorb(&mut self, other: PipelineSummary) {
        self.fetched += other.fetched;
        self.ingested += other.ingested;
        self.duplicates += other.duplicates;
        self.classified += other.classified;
        self.extracted += other.extracted;
        self.parsed += other.parsed;
        self.archived += other.archived;
        self.discarded += other.discarded;
        self.resolved += other.resolved;
        self.retried += other.retried;
        self.failed += other.failed;
        self.fetch_errors += other.fetch_errors;
        self.ingest_errors += other.ingest_errors;
    }
}

impl fmt::Display for PipelineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched {}, ingested {}, duplicates {}, classified {}, extracted {}, parsed {}, \
             archived {}, discarded {}, resolved {}, errors {}",
            self.fetched,
            self.ingested,
            self.duplicates,
            self.classified,
            self.extracted,
            self.parsed,
            self.archived,
            self.discarded,
            self.resolved,
            self.errored()
        )?;
        if self.errored() > 0 {
            write!(
                f,
                " (retried {}, failed {}, fetch errors {}, ingest errors {})",
                self.retried, self.failed, self.fetch_errors, self.ingest_errors
            )?;
        }
        Ok(())
    }
}

/// Runs sync and reprocess through the job queue.
pub struct SyncService {
    archive: Arc<dyn ArchiveRepository>,
    jobs: Arc<dyn JobRepository>,
    runner: JobRunner,
    extraction_version: i32,
    max_attempts: i32,
}

impl SyncService {
    pub fn new(
        archive: Arc<dyn ArchiveRepository>,
        jobs: Arc<dyn JobRepository>,
        router: Arc<StageRouter>,
        config: WorkerConfig,
    ) -> Self {
        let extraction_version = router.extraction_version();
        let handler: Arc<dyn JobHandler> = Arc::new(ProcessInteractionHandler::new(router));
        Self {
            archive,
            runner: JobRunner::with_handlers(jobs.clone(), config, [handler]),
            jobs,
            extraction_version,
            max_attempts: defaults::JOB_MAX_ATTEMPTS,
        }
    }

    /// Attempts given to each enqueued job.
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Runner used for draining; exposes worker events.
    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    /// Ingest from every connector, enqueue, sweep the backlog, then drain.
    ///
    /// A connector that fails to fetch, or an item that fails to ingest, is
    /// counted and skipped; the rest still run and the backlog is still swept.
    #[instrument(skip(self, connectors), fields(subsystem = "jobs", component = "sync", op = "sync"))]
    pub async fn sync(&self, connectors: &[Arc<dyn Connector>]) -> Result<PipelineSummary> {
        let start = Instant::now();
        let mut summary = PipelineSummary::default();

        for connector in connectors {
            let items = match connector.fetch().await {
                Ok(items) => items,
                Err(e) => {
                    error!(source_type = connector.source_type(), error = %e, "Connector fetch failed");
                    summary.fetch_errors += 1;
                    continue;
                }
            };
            summary.fetched += items.len() as u64;

            for item in items {
                // Each ingest commits on its own; the job is enqueued after.
                let outcome = match self.archive.ingest(item).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(source_type = connector.source_type(), error = %e, "Ingest failed");
                        summary.ingest_errors += 1;
                        continue;
                    }
                };
                if outcome.is_duplicate() {
                    summary.duplicates += 1;
                    continue;
                }
                summary.ingested += 1;
                let raw_id = outcome.record().id;
                if let Err(e) = self.enqueue(raw_id).await {
                    // The sweep below retries the enqueue for this row.
                    warn!(raw_id = %raw_id, error = %e, "Enqueue after ingest failed");
                    summary.ingest_errors += 1;
                }
            }
        }

        self.enqueue_unprocessed(self.extraction_version).await?;
        summary.absorb(self.drain().await?);

        info!(
            summary = %summary,
            duration_ms = start.elapsed().as_millis() as u64,
            "Sync finished"
        );
        Ok(summary)
    }

    /// Re-run the stage router over archived rows below `version_floor`.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "sync", op = "reprocess"))]
    pub async fn reprocess(&self, version_floor: i32) -> Result<PipelineSummary> {
        let start = Instant::now();
        if version_floor > self.extraction_version {
            warn!(
                version_floor,
                extraction_version = self.extraction_version,
                "Floor is above the router version; rows will stay below it after reprocessing"
            );
        }

        let queued = self.enqueue_unprocessed(version_floor).await?;
        let summary = self.drain().await?;
        info!(
            queued,
            summary = %summary,
            duration_ms = start.elapsed().as_millis() as u64,
            "Reprocess finished"
        );
        Ok(summary)
    }

    /// Enqueue a processing job for every row below `version_floor`.
    /// Returns the number of jobs newly created.
    pub async fn enqueue_unprocessed(&self, version_floor: i32) -> Result<u64> {
        let mut rows = unprocessed_stream(self.archive.clone(), version_floor);
        let mut created = 0;
        while let Some(row) = rows.next().await {
            if self.enqueue(row?.id).await? {
                created += 1;
            }
        }
        Ok(created)
    }

    async fn enqueue(&self, raw_id: uuid::Uuid) -> Result<bool> {
        let req = EnqueueRequest::process_interaction(raw_id).with_max_attempts(self.max_attempts);
        Ok(self.jobs.enqueue(req).await?.is_created())
    }

    /// Claim and execute processing jobs inline until none are claimable.
    ///
    /// Jobs waiting out a retry backoff are not claimable, so a drain always
    /// terminates; they are counted as retried and picked up later.
    pub async fn drain(&self) -> Result<PipelineSummary> {
        let mut summary = PipelineSummary::default();
        while let Some(executed) = self.runner.run_next(&[JobKind::ProcessInteraction]).await? {
            match executed.disposition {
                Disposition::Completed(Some(value)) => {
                    match serde_json::from_value::<StageReport>(value) {
                        Ok(report) => summary.record(&report),
                        Err(e) => warn!(job_id = %executed.job.id, error = %e, "Unreadable stage report"),
                    }
                }
                Disposition::Completed(None) => {}
                Disposition::Retrying { .. } | Disposition::Unrecorded(_) => summary.retried += 1,
                Disposition::Failed(_) => summary.failed += 1,
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_hides_nothing_when_clean() {
        let summary = PipelineSummary {
            fetched: 2,
            ingested: 2,
            classified: 2,
            archived: 2,
            ..Default::default()
        };
        assert_eq!(
            summary.to_string(),
            "fetched 2, ingested 2, duplicates 0, classified 2, extracted 0, parsed 0, \
             archived 2, discarded 0, resolved 0, errors 0"
        );
    }

    #[test]
    fn test_display_renders_error_breakdown() {
        let summary = PipelineSummary {
            fetched: 3,
            retried: 1,
            failed: 2,
            ..Default::default()
        };
        let text = summary.to_string();
        assert!(text.contains("classified 0"));
        assert!(text.contains("errors 3 (retried 1, failed 2, fetch errors 0, ingest errors 0)"));
    }

    #[test]
    fn test_resolved_counts_as_extracted() {
        let mut summary = PipelineSummary::default();
        summary.record(&StageReport {
            raw_id: uuid::Uuid::new_v4(),
            label: focus_core::Label::Human,
            route: focus_core::Route::DeepExtraction,
            stage: Stage::Resolved,
            people_created: 1,
            projects_created: 0,
            facts_written: 1,
        });
        assert_eq!((summary.classified, summary.extracted, summary.resolved), (1, 1, 1));
    }
}
