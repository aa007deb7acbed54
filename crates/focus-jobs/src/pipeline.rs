//! Stage router: classify, route, extract and resolve one raw interaction.
//!
//! ```text
//! INGESTED → CLASSIFIED → {EXTRACTED | PARSED | ARCHIVED | DISCARDED} → RESOLVED
//! ```
//!
//! A capability error returns before anything is written, so a failed pass
//! never advances the stage; the queue retries it. Every write a pass makes
//! is idempotent, so a pass interrupted anywhere can be re-run from scratch.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use focus_core::{
    defaults, ArchiveRepository, Classifier, DeepExtractor, EntityRepository, Error,
    LightExtractor, ProcessingRecord, RawInteraction, ResolutionReport, Result, Route, Stage,
    StageReport,
};

use crate::resolver::Resolver;

/// Runs raw interactions through classification, routing, extraction and
/// resolution.
pub struct StageRouter {
    archive: Arc<dyn ArchiveRepository>,
    entities: Arc<dyn EntityRepository>,
    classifier: Arc<dyn Classifier>,
    deep: Arc<dyn DeepExtractor>,
    light: Arc<dyn LightExtractor>,
    resolver: Resolver,
    extraction_version: i32,
}

impl StageRouter {
    pub fn new(
        archive: Arc<dyn ArchiveRepository>,
        entities: Arc<dyn EntityRepository>,
        classifier: Arc<dyn Classifier>,
        deep: Arc<dyn DeepExtractor>,
        light: Arc<dyn LightExtractor>,
    ) -> Self {
        Self {
            archive,
            entities,
            classifier,
            deep,
            light,
            resolver: Resolver::default(),
            extraction_version: defaults::EXTRACTION_VERSION,
        }
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Version stamped on every envelope this router writes.
    pub fn with_extraction_version(mut self, version: i32) -> Self {
        self.extraction_version = version;
        self
    }

    pub fn extraction_version(&self) -> i32 {
        self.extraction_version
    }

    /// Load a raw interaction and process it.
    ///
    /// A missing row is reported as `NotFound`, which the queue retries: the
    /// job may have been enqueued by a transaction this reader cannot see yet.
    pub async fn process_id(&self, raw_id: Uuid) -> Result<StageReport> {
        match self.archive.get(raw_id).await? {
            Some(raw) => self.process(&raw).await,
            None => {
                warn!(
                    subsystem = "jobs",
                    component = "pipeline",
                    raw_id = %raw_id,
                    "Raw interaction not visible, expected a committed row"
                );
                Err(Error::NotFound(format!("raw interaction {raw_id}")))
            }
        }
    }

    /// Run one raw interaction through every stage it routes to.
    #[instrument(skip(self, raw), fields(subsystem = "jobs", component = "pipeline", raw_id = %raw.id))]
    pub async fn process(&self, raw: &RawInteraction) -> Result<StageReport> {
        let start = Instant::now();

        let classification = self.classifier.classify(raw).await?;
        let route = Route::for_classification(&classification);
        debug!(
            label = %classification.label,
            confidence = classification.confidence,
            route = %route,
            "Routed interaction"
        );

        let mut record = ProcessingRecord {
            classification,
            route,
            deep: None,
            light: None,
        };
        let mut resolution = ResolutionReport::default();
        let mut stage = route.terminal_stage();

        let model = match route {
            Route::DeepExtraction => {
                let snapshot = self.entities.load_snapshot().await?;
                let extraction = self.deep.extract(raw, &snapshot.known_entities()).await?;

                if extraction.requires_resolution() {
                    let plan = self.resolver.plan(raw, &extraction, &snapshot);
                    resolution = self.entities.apply_resolution(&plan).await?;
                    stage = Stage::Resolved;
                } else {
                    debug!("No entity-bearing fields, skipping resolution");
                }
                record.deep = Some(extraction);
                self.deep.model_name().to_string()
            }
            Route::LightExtraction => {
                let content = match raw.metadata_str("subject") {
                    Some(subject) => format!("{subject}\n{}", raw.raw_content),
                    None => raw.raw_content.clone(),
                };
                record.light = Some(self.light.extract(&content));
                self.light.model_name().to_string()
            }
            Route::Archive | Route::Discard => record.classification.classifier.clone(),
        };

        // A pass that resolves nothing still owns the row's facts: whatever an
        // earlier version derived from it no longer holds.
        if stage != Stage::Resolved && raw.envelope.is_some() {
            let removed = self.entities.retract_facts(raw.id).await?;
            if removed > 0 {
                debug!(facts_removed = removed, "Retracted facts from earlier pass");
            }
        }

        let result = serde_json::to_value(&record)?;
        let written = self
            .archive
            .record_extraction(raw.id, self.extraction_version, &model, &result, stage)
            .await?;
        if !written {
            warn!(
                version = self.extraction_version,
                "Envelope from a newer extraction version kept, result discarded"
            );
        }

        let report = StageReport {
            raw_id: raw.id,
            label: record.classification.label,
            route,
            stage,
            people_created: resolution.people_created,
            projects_created: resolution.projects_created,
            facts_written: resolution.facts_written,
        };

        info!(
            label = %report.label,
            stage = %report.stage,
            model = %model,
            people_created = report.people_created,
            projects_created = report.projects_created,
            facts_written = report.facts_written,
            duration_ms = start.elapsed().as_millis() as u64,
            "Processed interaction"
        );
        Ok(report)
    }
}
