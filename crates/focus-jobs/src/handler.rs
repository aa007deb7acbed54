//! Job handler trait and the context handed to each execution.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use focus_core::{Error, Job, JobKind, Result};

/// Progress callback type for job handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to job handlers.
pub struct JobContext {
    /// The claimed job.
    pub job: Job,
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            progress_callback: None,
        }
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report progress to the callback.
    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    /// Raw job payload.
    pub fn payload(&self) -> &JsonValue {
        &self.job.payload
    }

    /// Decode the payload. A payload that does not decode will never
    /// decode, so the error is permanent.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.job.payload.clone()).map_err(|e| {
            Error::InvalidInput(format!("bad {} payload: {e}", self.job.kind))
        })
    }
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// Job completed with optional result data.
    Success(Option<JsonValue>),
    /// Attempt failed; the queue retries with backoff until attempts run out.
    Retry(String),
    /// Job failed and must not be retried.
    Failed(String),
}

impl JobResult {
    /// Map an error to `Retry` or `Failed` by its transience.
    pub fn from_error(err: &Error) -> Self {
        if err.is_transient() {
            JobResult::Retry(err.to_string())
        } else {
            JobResult::Failed(err.to_string())
        }
    }

    /// Success carrying a serialized value, or a permanent failure if it
    /// cannot be serialized.
    pub fn success_with<T: serde::Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => JobResult::Success(Some(v)),
            Err(e) => JobResult::Failed(format!("failed to serialize job result: {e}")),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success(_))
    }
}

impl From<Result<Option<JsonValue>>> for JobResult {
    fn from(result: Result<Option<JsonValue>>) -> Self {
        match result {
            Ok(value) => JobResult::Success(value),
            Err(e) => JobResult::from_error(&e),
        }
    }
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job kind this handler processes.
    fn kind(&self) -> JobKind;

    async fn execute(&self, ctx: JobContext) -> JobResult;

    fn can_handle(&self, kind: JobKind) -> bool {
        self.kind() == kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use focus_core::{EntityMergePayload, JobStatus, ProcessInteractionPayload};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    fn job(kind: JobKind, payload: JsonValue) -> Job {
        Job {
            id: Uuid::new_v4(),
            kind,
            dedupe_key: None,
            payload,
            status: JobStatus::Processing,
            priority: 10,
            attempts: 0,
            max_attempts: 5,
            locked_until: None,
            error_message: None,
            result: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_payload_decodes() {
        let raw_id = Uuid::new_v4();
        let ctx = JobContext::new(job(JobKind::ProcessInteraction, json!({"raw_id": raw_id})));
        let payload: ProcessInteractionPayload = ctx.payload_as().unwrap();
        assert_eq!(payload.raw_id, raw_id);
    }

    #[test]
    fn test_bad_payload_is_permanent() {
        let ctx = JobContext::new(job(JobKind::EntityMerge, json!({"keep": "nope"})));
        let err = ctx.payload_as::<EntityMergePayload>().unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("entity_merge"));
    }

    #[test]
    fn test_result_from_error_uses_transience() {
        assert!(matches!(
            JobResult::from_error(&Error::Extraction("timeout".into())),
            JobResult::Retry(_)
        ));
        assert!(matches!(
            JobResult::from_error(&Error::InvalidInput("bad".into())),
            JobResult::Failed(_)
        ));
    }

    #[test]
    fn test_progress_callback_receives_reports() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = JobContext::new(job(JobKind::SprintExpiry, json!({})))
            .with_progress_callback(move |pct, msg| {
                sink.lock().unwrap().push((pct, msg.map(String::from)));
            });
        ctx.report_progress(50, Some("classified"));
        ctx.report_progress(100, None);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(50, Some("classified".to_string())), (100, None)]
        );
    }
}
