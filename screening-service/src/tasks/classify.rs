use async_trait::async_trait;
use stage_graph::{NextAction, Task, TaskResult};
use std::sync::Arc;
use tracing::info;

use crate::{
    classifier::Classifier,
    models::{PipelineStage, format_percent},
    workflow::RunState,
};

pub struct ClassifyTask {
    classifier: Arc<dyn Classifier>,
}

impl ClassifyTask {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl Task<RunState> for ClassifyTask {
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, state: &mut RunState) -> anyhow::Result<TaskResult> {
        let (width, height) = state.image.dimensions();
        info!(width, height, "Classifying blood cell image");

        let result = self.classifier.classify(&state.image).await?;

        info!(
            label = %result.label,
            confidence = result.confidence,
            "Classification complete"
        );
        let status = format!("{} ({})", result.label, format_percent(result.confidence));

        state.record.classification = Some(result);
        state.record.advance(PipelineStage::Classified);

        Ok(TaskResult::new_with_status(NextAction::Continue, Some(status)))
    }
}
