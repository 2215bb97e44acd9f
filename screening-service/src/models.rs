use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{FailureTag, ScreeningError};

/// Patient registration captured alongside a single request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDetails {
    pub name: String,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
}

impl PatientDetails {
    pub fn validate(&self) -> Result<(), ScreeningError> {
        if self.name.trim().chars().count() < 2 {
            return Err(ScreeningError::InvalidInput(
                "patient name must be at least 2 characters".to_string(),
            ));
        }
        Ok(())
    }

    pub fn summary(&self) -> String {
        format!(
            "Name: {}, DOB: {}, Gender: {}",
            self.name.trim(),
            non_blank(self.date_of_birth.as_deref()).unwrap_or("Not provided"),
            non_blank(self.gender.as_deref()).unwrap_or("Not specified"),
        )
    }
}

/// Identifier assigned to a registered patient that arrived without one
pub fn generate_patient_id(at: DateTime<Utc>) -> String {
    format!("LS-{}", at.format("%Y%m%d%H%M%S"))
}

/// Immutable pipeline input, owned by the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisRequest {
    #[serde(skip)]
    pub image: Vec<u8>,
    pub patient_id: Option<String>,
    pub patient_context: Option<String>,
    pub patient: Option<PatientDetails>,
}

impl AnalysisRequest {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            ..Default::default()
        }
    }

    pub fn with_patient_id(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_id = Some(patient_id.into());
        self
    }

    pub fn with_patient_context(mut self, context: impl Into<String>) -> Self {
        self.patient_context = Some(context.into());
        self
    }

    pub fn with_patient(mut self, patient: PatientDetails) -> Self {
        self.patient = Some(patient);
        self
    }

    /// Context handed to the advisory stage: registration summary plus free text
    pub fn advisory_context(&self) -> Option<String> {
        let parts: Vec<String> = self
            .patient
            .as_ref()
            .map(PatientDetails::summary)
            .into_iter()
            .chain(non_blank(self.patient_context.as_deref()).map(str::to_string))
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Normal,
    Leukemia,
    Uncertain,
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Label::Normal => "Normal",
            Label::Leukemia => "Leukemia",
            Label::Uncertain => "Uncertain",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: Label,
    pub confidence: f64,
    /// Lower-cased decision line returned by the model, kept for audit
    pub raw_model_output: String,
}

impl ClassificationResult {
    pub fn is_leukemia(&self) -> bool {
        self.label == Label::Leukemia
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Low,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "Low",
            Severity::High => "High",
            Severity::Critical => "Critical",
        };
        f.write_str(name)
    }
}

/// Where an advisory came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisorySource {
    /// Parsed from the generation backend's narrative
    Generated,
    /// Deterministic template used when generation failed or was unavailable
    Fallback,
    /// Canned advisory produced by the pipeline when the advisory stage is skipped
    Synthesized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryResult {
    pub narrative_text: String,
    pub prioritized_steps: Vec<String>,
    pub severity: Severity,
    pub urgent_action_required: bool,
    pub source: AdvisorySource,
}

/// Position of a run in the screening state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Start,
    Classified,
    AdviceGenerated,
    AdviceSkipped,
    Reported,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub tag: FailureTag,
    pub message: String,
}

/// Rendered report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub content_type: String,
    pub body: String,
}

/// The accumulator threaded through every stage of one run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub request: AnalysisRequest,
    pub stage: PipelineStage,
    pub transitions: Vec<PipelineStage>,
    pub classification: Option<ClassificationResult>,
    pub advisory: Option<AdvisoryResult>,
    pub report_document: Option<Document>,
    pub failure: Option<RunFailure>,
}

impl PipelineRecord {
    pub fn new(request: AnalysisRequest, run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            request,
            stage: PipelineStage::Start,
            transitions: vec![PipelineStage::Start],
            classification: None,
            advisory: None,
            report_document: None,
            failure: None,
        }
    }

    pub fn advance(&mut self, stage: PipelineStage) {
        self.stage = stage;
        self.transitions.push(stage);
    }

    /// Move to the terminal `Failed` state. Any partially rendered document is dropped.
    pub fn fail(&mut self, tag: FailureTag, message: impl Into<String>) {
        self.report_document = None;
        self.failure = Some(RunFailure {
            tag,
            message: message.into(),
        });
        self.advance(PipelineStage::Failed);
    }

    pub fn is_complete(&self) -> bool {
        self.stage == PipelineStage::Done
    }

    pub fn advisory_stage_ran(&self) -> bool {
        self.transitions.contains(&PipelineStage::AdviceGenerated)
    }
}

/// Format a confidence in [0, 1] as a percentage with one decimal, e.g. `90.0%`
pub fn format_percent(confidence: f64) -> String {
    format!("{:.1}%", confidence * 100.0)
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
