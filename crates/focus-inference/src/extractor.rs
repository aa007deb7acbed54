//! Deep extraction capability.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use focus_core::{
    DeepExtractor, Error, ExtractionRecord, GenerationBackend, KnownEntities, RawInteraction,
    Result,
};

use crate::parsing::parse_lenient;
use crate::prompts::{extraction_prompt, EXTRACTION_SYSTEM};

/// Deep extractor backed by a generation model, given known-entity context.
pub struct ModelExtractor {
    backend: Arc<dyn GenerationBackend>,
}

impl ModelExtractor {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl DeepExtractor for ModelExtractor {
    async fn extract(
        &self,
        raw: &RawInteraction,
        known: &KnownEntities,
    ) -> Result<ExtractionRecord> {
        let start = Instant::now();
        let prompt = extraction_prompt(raw, known, Utc::now().date_naive());

        let response = self
            .backend
            .generate_json_with_system(EXTRACTION_SYSTEM, &prompt)
            .await
            .map_err(|e| match e {
                Error::Config(_) | Error::InvalidInput(_) | Error::Extraction(_) => e,
                other => Error::Extraction(other.to_string()),
            })?;

        let record: ExtractionRecord = parse_lenient(&response)
            .map_err(|e| Error::Extraction(format!("unparseable response: {e}")))?;

        info!(
            subsystem = "inference",
            component = "extractor",
            op = "extract",
            raw_id = %raw.id,
            model = %self.backend.model_name(),
            tasks = record.tasks.len(),
            commitments = record.commitments.len(),
            people = record.people_mentioned.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Extracted interaction"
        );
        debug!(fields = ?record.populated_entity_fields(), "Populated entity fields");
        Ok(record)
    }

    fn model_name(&self) -> &str {
        self.backend.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use focus_core::Stage;
    use serde_json::json;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct RecordingBackend {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GenerationBackend for RecordingBackend {
        async fn generate_json_with_system(&self, _system: &str, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }

        fn model_name(&self) -> &str {
            "recording"
        }
    }

    fn raw() -> RawInteraction {
        RawInteraction {
            id: Uuid::new_v4(),
            source_type: "mail".into(),
            source_id: None,
            account_id: None,
            raw_content: "I'll review the spec by Friday, talk to Sara about it".into(),
            raw_metadata: json!({"from": "Me <me@home.net>"}),
            content_hash: String::new(),
            interaction_date: Utc::now(),
            ingested_at: Utc::now(),
            stage: Stage::Ingested,
            envelope: None,
        }
    }

    #[tokio::test]
    async fn test_extracts_record_from_fenced_output() {
        let backend = Arc::new(RecordingBackend {
            reply: "```json\n{\"commitments\":[{\"text\":\"review spec\",\"by\":\"me\",\"deadline\":\"2026-03-06\"}],\"people_mentioned\":[\"Sara\"]}\n```".into(),
            prompts: Mutex::new(Vec::new()),
        });
        let extractor = ModelExtractor::new(backend.clone());
        let known = KnownEntities {
            people: vec!["Sarah Chen".into()],
            projects: vec![],
        };
        let record = extractor.extract(&raw(), &known).await.unwrap();

        assert_eq!(record.commitments[0].description, "review spec");
        assert_eq!(record.people_mentioned, vec!["Sara".to_string()]);
        assert!(backend.prompts.lock().unwrap()[0].contains("Known people: Sarah Chen"));
    }

    #[tokio::test]
    async fn test_unparseable_output_is_transient() {
        let backend = Arc::new(RecordingBackend {
            reply: "no".into(),
            prompts: Mutex::new(Vec::new()),
        });
        let err = ModelExtractor::new(backend)
            .extract(&raw(), &KnownEntities::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
        assert!(err.is_transient());
    }
}
