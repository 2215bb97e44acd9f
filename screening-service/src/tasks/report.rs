use async_trait::async_trait;
use stage_graph::{NextAction, Task, TaskResult};
use tracing::info;

use crate::{models::PipelineStage, report::ReportCompiler, workflow::RunState};

pub struct CompileReportTask {
    compiler: ReportCompiler,
}

impl CompileReportTask {
    pub fn new(compiler: ReportCompiler) -> Self {
        Self { compiler }
    }
}

#[async_trait]
impl Task<RunState> for CompileReportTask {
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, state: &mut RunState) -> anyhow::Result<TaskResult> {
        let document = self.compiler.compile(&state.record)?;
        info!(bytes = document.body.len(), "Report compiled");

        state.record.report_document = Some(document);
        state.record.advance(PipelineStage::Reported);

        Ok(TaskResult::new_with_status(
            NextAction::End,
            Some("Report compiled".to_string()),
        ))
    }
}
