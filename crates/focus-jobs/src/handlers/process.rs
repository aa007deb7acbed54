use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use focus_core::{JobKind, ProcessInteractionPayload};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::pipeline::StageRouter;

/// Runs one raw interaction through the stage router.
///
/// The job result is the `StageReport`, which the sync service aggregates.
pub struct ProcessInteractionHandler {
    router: Arc<StageRouter>,
}

impl ProcessInteractionHandler {
    pub fn new(router: Arc<StageRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl JobHandler for ProcessInteractionHandler {
    fn kind(&self) -> JobKind {
        JobKind::ProcessInteraction
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        let payload: ProcessInteractionPayload = match ctx.payload_as() {
            Ok(p) => p,
            Err(e) => return JobResult::from_error(&e),
        };

        ctx.report_progress(10, Some("processing"));
        match self.router.process_id(payload.raw_id).await {
            Ok(report) => {
                debug!(raw_id = %payload.raw_id, stage = %report.stage, "Interaction processed");
                ctx.report_progress(100, Some("done"));
                JobResult::success_with(&report)
            }
            Err(e) => JobResult::from_error(&e),
        }
    }
}
