//! The four stages of a screening run, as `stage-graph` tasks over [`RunState`].
//!
//! [`RunState`]: crate::workflow::RunState

pub mod advise;
pub mod classify;
pub mod report;
pub mod skip_advice;

pub use advise::AdviseTask;
pub use classify::ClassifyTask;
pub use report::CompileReportTask;
pub use skip_advice::{SkipAdviceTask, synthesized_advisory};

use anyhow::anyhow;

use crate::{models::ClassificationResult, workflow::RunState};

/// Classification a later stage depends on; its absence means the graph is miswired
fn require_classification(state: &RunState) -> anyhow::Result<&ClassificationResult> {
    state
        .record
        .classification
        .as_ref()
        .ok_or_else(|| anyhow!("stage reached before classification"))
}
