use async_trait::async_trait;
use stage_graph::{NextAction, Task, TaskResult};
use tracing::info;

use super::require_classification;
use crate::{
    models::{AdvisoryResult, AdvisorySource, Label, PipelineStage, Severity},
    workflow::RunState,
};

/// Stands in for the advisory stage on non-leukemia results. Never calls the advisor.
pub struct SkipAdviceTask;

#[async_trait]
impl Task<RunState> for SkipAdviceTask {
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, state: &mut RunState) -> anyhow::Result<TaskResult> {
        let label = require_classification(state)?.label;
        info!(label = %label, "Skipping advisory stage");

        state.record.advisory = Some(synthesized_advisory(label));
        state.record.advance(PipelineStage::AdviceSkipped);

        Ok(TaskResult::new_with_status(
            NextAction::Continue,
            Some("Advisory skipped".to_string()),
        ))
    }
}

/// Low-severity, non-urgent advisory for a result that is not leukemia
pub fn synthesized_advisory(label: Label) -> AdvisoryResult {
    let (finding, steps): (&str, [&str; 3]) = match label {
        Label::Uncertain => (
            "The screen was inconclusive: the model did not return a recognizable classification.",
            [
                "Repeat imaging with a well-stained, in-focus sample",
                "Manual review of the peripheral blood smear",
                "Consult a hematologist if symptoms persist",
            ],
        ),
        _ => (
            "No abnormality detected. The cell morphology appears within normal limits.",
            [
                "Routine follow-up as clinically indicated",
                "Repeat screening if symptoms develop or persist",
                "Discuss any concerns with the treating physician",
            ],
        ),
    };

    let mut narrative = format!("## Clinical Interpretation\n{}\n\n## Recommended Actions\n", finding);
    for (i, step) in steps.iter().enumerate() {
        narrative.push_str(&format!("{}. {}\n", i + 1, step));
    }

    AdvisoryResult {
        narrative_text: narrative,
        prioritized_steps: steps.iter().map(|s| s.to_string()).collect(),
        severity: Severity::Low,
        urgent_action_required: false,
        source: AdvisorySource::Synthesized,
    }
}
