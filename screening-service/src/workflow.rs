use chrono::Utc;
use stage_graph::{Graph, GraphBuilder, GraphError, Task};
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    advisory::{Advisor, AdvisoryAdapter},
    backends::ChatCompletionsVisionBackend,
    classifier::{Classifier, ClassifierAdapter},
    config::ScreeningConfig,
    error::{FailureTag, ScreeningError},
    input::{self, PreparedImage},
    models::{AnalysisRequest, PipelineRecord, PipelineStage},
    report::ReportCompiler,
    tasks::{AdviseTask, ClassifyTask, CompileReportTask, SkipAdviceTask},
};

/// State threaded through the graph for one run
pub struct RunState {
    pub image: PreparedImage,
    pub record: PipelineRecord,
}

pub fn build_screening_graph(
    classifier: Arc<dyn Classifier>,
    advisor: Arc<dyn Advisor>,
    compiler: ReportCompiler,
) -> Graph<RunState> {
    let classify_task = Arc::new(ClassifyTask::new(classifier));
    let classify_id = classify_task.id().to_string();

    let advise_task = Arc::new(AdviseTask::new(advisor));
    let advise_id = advise_task.id().to_string();

    let skip_task = Arc::new(SkipAdviceTask);
    let skip_id = skip_task.id().to_string();

    let report_task = Arc::new(CompileReportTask::new(compiler));
    let report_id = report_task.id().to_string();

    GraphBuilder::new("leukemia_screening")
        .add_task(classify_task)
        .add_task(advise_task)
        .add_task(skip_task)
        .add_task(report_task)
        .add_conditional_edge(
            &classify_id,
            |state: &RunState| {
                state
                    .record
                    .classification
                    .as_ref()
                    .is_some_and(|c| c.is_leukemia())
            },
            &advise_id,
            &skip_id,
        )
        .add_edge(&advise_id, &report_id)
        .add_edge(&skip_id, &report_id)
        .build()
}

/// Classify, then advise or skip, then report.
///
/// Holds no per-run state; concurrent runs are independent.
pub struct ScreeningPipeline {
    graph: Arc<Graph<RunState>>,
}

impl ScreeningPipeline {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        advisor: Arc<dyn Advisor>,
        compiler: ReportCompiler,
    ) -> Self {
        Self::from_graph(build_screening_graph(classifier, advisor, compiler))
    }

    pub fn from_graph(graph: Graph<RunState>) -> Self {
        Self {
            graph: Arc::new(graph),
        }
    }

    /// Wire the HTTP-backed adapters described by `config`
    pub fn from_config(config: &ScreeningConfig) -> Self {
        let backend = Arc::new(ChatCompletionsVisionBackend::new(&config.classifier));
        let classifier = ClassifierAdapter::new(backend, &config.classifier);
        let advisor = AdvisoryAdapter::from_config(&config.advisory);
        Self::new(
            Arc::new(classifier),
            Arc::new(advisor),
            ReportCompiler::new(config.report.clone()),
        )
    }

    /// Run one request to a terminal state. Failures are recorded on the
    /// returned record, never raised.
    pub async fn run(&self, request: AnalysisRequest) -> PipelineRecord {
        let run_id = Uuid::new_v4();
        let span = info_span!("screening_run", %run_id);
        self.run_inner(request, run_id).instrument(span).await
    }

    async fn run_inner(&self, request: AnalysisRequest, run_id: Uuid) -> PipelineRecord {
        let mut record = PipelineRecord::new(request, run_id, Utc::now());
        info!(patient_id = ?record.request.patient_id, "Starting screening run");

        let image = match input::validate(&record.request) {
            Ok(image) => image,
            Err(e) => {
                warn!(error = %e, "Request rejected before classification");
                record.fail(e.tag(), e.to_string());
                return record;
            }
        };

        let mut state = RunState { image, record };
        match self.graph.execute(&mut state).await {
            Ok(trace) => {
                debug!(tasks = ?trace.visited(), "Graph finished");
                if state.record.report_document.is_none() {
                    error!("Graph finished without a report");
                    let err = ScreeningError::CompileFailure("no report was produced".to_string());
                    state.record.fail(err.tag(), err.to_string());
                } else {
                    state.record.advance(PipelineStage::Done);
                    info!("Screening run complete");
                }
            }
            Err(e) => {
                let (tag, message) = failure_of(&e);
                error!(tag = ?tag, error = %message, "Screening run failed");
                state.record.fail(tag, message);
            }
        }

        state.record
    }
}

/// Recover the domain failure behind an engine error. Anything else is a wiring fault.
fn failure_of(err: &GraphError) -> (FailureTag, String) {
    match err
        .task_error()
        .and_then(|e| e.downcast_ref::<ScreeningError>())
    {
        Some(screening) => (screening.tag(), screening.to_string()),
        None => (FailureTag::Internal, err.to_string()),
    }
}
