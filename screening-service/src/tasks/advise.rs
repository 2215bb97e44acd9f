use async_trait::async_trait;
use stage_graph::{NextAction, Task, TaskResult};
use std::sync::Arc;
use tracing::info;

use super::require_classification;
use crate::{advisory::Advisor, models::PipelineStage, workflow::RunState};

/// Runs the advisory adapter. Only reached for leukemia-positive classifications.
pub struct AdviseTask {
    advisor: Arc<dyn Advisor>,
}

impl AdviseTask {
    pub fn new(advisor: Arc<dyn Advisor>) -> Self {
        Self { advisor }
    }
}

#[async_trait]
impl Task<RunState> for AdviseTask {
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, state: &mut RunState) -> anyhow::Result<TaskResult> {
        let classification = require_classification(state)?;
        let (label, confidence) = (classification.label, classification.confidence);
        let context = state.record.request.advisory_context();

        info!(label = %label, has_context = context.is_some(), "Requesting clinical advisory");
        let advisory = self
            .advisor
            .advise(label, confidence, context.as_deref())
            .await;

        info!(
            severity = %advisory.severity,
            source = ?advisory.source,
            steps = advisory.prioritized_steps.len(),
            "Advisory ready"
        );
        let status = format!("{} severity, {:?} advisory", advisory.severity, advisory.source);

        state.record.advisory = Some(advisory);
        state.record.advance(PipelineStage::AdviceGenerated);

        Ok(TaskResult::new_with_status(NextAction::Continue, Some(status)))
    }
}
