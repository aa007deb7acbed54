//! Classification capability.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use focus_core::logging::SLOW_CAPABILITY_THRESHOLD_MS;
use focus_core::{Classification, Classifier, Error, GenerationBackend, RawInteraction, Result};

use crate::heuristics::pre_classify;
use crate::parsing::parse_classification;
use crate::prompts::{classification_prompt, CLASSIFICATION_SYSTEM};

/// Classifier that asks a generation backend.
pub struct ModelClassifier {
    backend: Arc<dyn GenerationBackend>,
}

impl ModelClassifier {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Classifier for ModelClassifier {
    async fn classify(&self, raw: &RawInteraction) -> Result<Classification> {
        let start = Instant::now();
        let prompt = classification_prompt(raw, Utc::now().date_naive());

        let response = self
            .backend
            .generate_json_with_system(CLASSIFICATION_SYSTEM, &prompt)
            .await
            .map_err(|e| match e {
                Error::Config(_) | Error::InvalidInput(_) => e,
                other => Error::Classification(other.to_string()),
            })?;

        // A garbled answer is a capability failure, retried like a timeout.
        let classification = parse_classification(&response)
            .map_err(|e| Error::Classification(format!("unparseable response: {e}")))?
            .with_classifier(self.backend.model_name());

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            subsystem = "inference",
            component = "classifier",
            op = "classify",
            raw_id = %raw.id,
            label = %classification.label,
            confidence = classification.confidence,
            duration_ms = elapsed,
            "Classified interaction"
        );
        if elapsed > SLOW_CAPABILITY_THRESHOLD_MS {
            warn!(raw_id = %raw.id, duration_ms = elapsed, "Slow classification");
        }
        Ok(classification)
    }

    fn model_name(&self) -> &str {
        self.backend.model_name()
    }
}

/// Heuristics first, model only when no rule fires.
pub struct TieredClassifier<C> {
    model: C,
}

impl<C: Classifier> TieredClassifier<C> {
    pub fn new(model: C) -> Self {
        Self { model }
    }
}

#[async_trait]
impl<C: Classifier> Classifier for TieredClassifier<C> {
    async fn classify(&self, raw: &RawInteraction) -> Result<Classification> {
        if let Some(classification) = pre_classify(raw) {
            debug!(
                subsystem = "inference",
                component = "classifier",
                raw_id = %raw.id,
                label = %classification.label,
                "Heuristic classification, skipping model"
            );
            return Ok(classification);
        }
        self.model.classify(raw).await
    }

    fn model_name(&self) -> &str {
        self.model.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use focus_core::{Label, Stage};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CannedBackend {
        reply: std::result::Result<String, String>,
        calls: AtomicUsize,
    }

    impl CannedBackend {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn err(msg: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(msg.to_string()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl GenerationBackend for CannedBackend {
        async fn generate_json_with_system(&self, _system: &str, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().map_err(Error::Inference)
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    fn raw(metadata: serde_json::Value) -> RawInteraction {
        RawInteraction {
            id: Uuid::new_v4(),
            source_type: "mail".into(),
            source_id: None,
            account_id: None,
            raw_content: "Can we meet Thursday about the launch?".into(),
            raw_metadata: metadata,
            content_hash: String::new(),
            interaction_date: Utc::now(),
            ingested_at: Utc::now(),
            stage: Stage::Ingested,
            envelope: None,
        }
    }

    #[tokio::test]
    async fn test_model_classifier_records_model_name() {
        let backend = CannedBackend::ok(r#"{"label":"human","confidence":0.9}"#);
        let classifier = ModelClassifier::new(backend);
        let c = classifier.classify(&raw(json!({}))).await.unwrap();
        assert_eq!(c.label, Label::Human);
        assert_eq!(c.classifier, "canned");
    }

    #[tokio::test]
    async fn test_backend_failure_is_transient_classification_error() {
        let classifier = ModelClassifier::new(CannedBackend::err("connection refused"));
        let err = classifier.classify(&raw(json!({}))).await.unwrap_err();
        assert!(matches!(err, Error::Classification(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_garbled_response_is_retryable() {
        let classifier = ModelClassifier::new(CannedBackend::ok("I think it's human?"));
        let err = classifier.classify(&raw(json!({}))).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_tiered_skips_model_when_heuristic_fires() {
        let backend = CannedBackend::ok(r#"{"label":"human"}"#);
        let tiered = TieredClassifier::new(ModelClassifier::new(backend.clone()));
        let c = tiered
            .classify(&raw(json!({"from": "noreply@bank.com"})))
            .await
            .unwrap();
        assert_eq!(c.label, Label::Automated);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tiered_falls_through_to_model() {
        let backend = CannedBackend::ok(r#"{"label":"human"}"#);
        let tiered = TieredClassifier::new(ModelClassifier::new(backend.clone()));
        let c = tiered
            .classify(&raw(json!({"from": "Sara <sara@acme.io>"})))
            .await
            .unwrap();
        assert_eq!(c.label, Label::Human);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }
}
