//! Clinical advisory for positive screens.
//!
//! A generation backend writes the narrative; the action list is scraped out
//! of it. Any backend failure, or a narrative yielding too few steps, falls
//! back to fixed content. Severity never depends on which path was taken.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    backends::{OpenRouterTextGenerator, TextGenerator},
    config::AdvisoryConfig,
    models::{AdvisoryResult, AdvisorySource, Label, Severity, format_percent},
};

const LEUKEMIA_KNOWLEDGE: &str = r#"## Acute Lymphoblastic Leukemia (ALL)

### Overview
ALL is a cancer of the blood and bone marrow affecting lymphocytes. It is the most
common childhood cancer.

### Key Clinical Features
- Abnormal lymphoblasts in peripheral blood or bone marrow
- Rapid progression when untreated
- 5-year survival of 85-90% with appropriate treatment

### Recommended Next Steps for a Positive Screen
1. Complete Blood Count (CBC) with differential
2. Peripheral blood smear review
3. Bone marrow biopsy (diagnostic gold standard)
4. Flow cytometry immunophenotyping of blast cells
5. Referral to a hematologist/oncologist

### Risk Stratification
- Standard risk: age 1-9, WBC < 50,000/uL
- High risk: age < 1 or > 10, WBC > 50,000/uL

### Treatment Overview
- Induction, consolidation and maintenance chemotherapy (2-3 years)
- CNS prophylaxis
"#;

/// Steps used whenever the generated list is missing or too short
pub const DEFAULT_STEPS: [&str; 5] = [
    "Complete Blood Count (CBC) with differential",
    "Peripheral blood smear review by a hematopathologist",
    "Bone marrow biopsy for definitive diagnosis",
    "Flow cytometry immunophenotyping of blast cells",
    "Referral to a hematologist/oncologist",
];

pub fn default_steps() -> Vec<String> {
    DEFAULT_STEPS.iter().map(|s| s.to_string()).collect()
}

/// Stage-two collaborator of the pipeline. Infallible: failures degrade to fallback content.
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn advise(
        &self,
        label: Label,
        confidence: f64,
        patient_context: Option<&str>,
    ) -> AdvisoryResult;
}

pub fn severity_for(label: Label, confidence: f64, threshold: f64) -> Severity {
    match label {
        Label::Leukemia if confidence > threshold => Severity::Critical,
        Label::Leukemia => Severity::High,
        _ => Severity::Low,
    }
}

pub struct AdvisoryAdapter {
    backend: Option<Arc<dyn TextGenerator>>,
    config: AdvisoryConfig,
}

impl AdvisoryAdapter {
    pub fn new(backend: Option<Arc<dyn TextGenerator>>, config: AdvisoryConfig) -> Self {
        Self { backend, config }
    }

    /// OpenRouter-backed when an API key is configured, fallback-only otherwise
    pub fn from_config(config: &AdvisoryConfig) -> Self {
        let backend = OpenRouterTextGenerator::from_config(config)
            .map(|generator| Arc::new(generator) as Arc<dyn TextGenerator>);
        Self::new(backend, config.clone())
    }

    fn fallback(
        &self,
        label: Label,
        confidence: f64,
        patient_context: Option<&str>,
        severity: Severity,
    ) -> AdvisoryResult {
        AdvisoryResult {
            narrative_text: fallback_narrative(label, confidence, patient_context),
            prioritized_steps: default_steps(),
            severity,
            urgent_action_required: label == Label::Leukemia,
            source: AdvisorySource::Fallback,
        }
    }
}

#[async_trait]
impl Advisor for AdvisoryAdapter {
    async fn advise(
        &self,
        label: Label,
        confidence: f64,
        patient_context: Option<&str>,
    ) -> AdvisoryResult {
        let severity = severity_for(label, confidence, self.config.severity_threshold);

        let Some(backend) = &self.backend else {
            info!("No advisory backend configured, using deterministic advisory");
            return self.fallback(label, confidence, patient_context, severity);
        };

        let user = user_message(label, confidence, patient_context);
        let generated = tokio::time::timeout(
            self.config.timeout(),
            backend.generate(&system_instruction(), &user),
        )
        .await;

        let narrative = match generated {
            Ok(Ok(content)) => content.into_text(),
            Ok(Err(e)) => {
                warn!(error = %e, "Advisory generation failed, using deterministic advisory");
                return self.fallback(label, confidence, patient_context, severity);
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.timeout_secs,
                    "Advisory generation timed out, using deterministic advisory"
                );
                return self.fallback(label, confidence, patient_context, severity);
            }
        };

        if narrative.trim().is_empty() {
            warn!("Advisory backend returned an empty narrative, using deterministic advisory");
            return self.fallback(label, confidence, patient_context, severity);
        }

        let mut steps = extract_steps(&narrative, &self.config.action_headings);
        if steps.len() < self.config.min_steps {
            warn!(
                found = steps.len(),
                required = self.config.min_steps,
                "Too few recommended actions in narrative, substituting default steps"
            );
            steps = default_steps();
        }

        info!(steps = steps.len(), severity = %severity, "Advisory generated");
        AdvisoryResult {
            narrative_text: narrative,
            prioritized_steps: steps,
            severity,
            urgent_action_required: label == Label::Leukemia,
            source: AdvisorySource::Generated,
        }
    }
}

pub fn system_instruction() -> String {
    format!(
        "You are a clinical advisor assistant reviewing an AI blood cell screening result \
that suggests possible leukemia. Write a concise, professional report for a clinician.\n\n\
Use this knowledge base:\n{}\n\
Emphasize that this is AI screening, not a diagnosis. Use markdown headings and keep \
each section short.",
        LEUKEMIA_KNOWLEDGE
    )
}

pub fn user_message(label: Label, confidence: f64, patient_context: Option<&str>) -> String {
    let mut message = format!(
        "Blood cell analysis result:\n- Classification: {}\n- Confidence: {}\n",
        label,
        format_percent(confidence)
    );
    if let Some(context) = patient_context {
        message.push_str(&format!("- Additional context: {}\n", context));
    }
    message.push_str(
        "\nProvide:\n\
1. Clinical interpretation\n\
2. A numbered list of next steps under the heading \"## Recommended Actions\"\n\
3. Urgency assessment\n\
4. Key points for the patient and clinician\n",
    );
    message
}

pub fn fallback_narrative(label: Label, confidence: f64, patient_context: Option<&str>) -> String {
    let mut narrative = format!(
        "## Clinical Interpretation\n\
AI screening classified this blood cell image as **{}** with {} confidence. \
Leukemic blast cells may be present.\n",
        label,
        format_percent(confidence)
    );
    if let Some(context) = patient_context {
        narrative.push_str(&format!("\nPatient context: {}\n", context));
    }

    narrative.push_str("\n## Recommended Actions\n");
    for (i, step) in DEFAULT_STEPS.iter().enumerate() {
        narrative.push_str(&format!("{}. {}\n", i + 1, step));
    }

    narrative.push_str(
        "\n## Urgency\n\
Immediate referral to a hematologist is recommended. Confirm the finding with a CBC \
and bone marrow biopsy.\n\n\
This is an AI screening result, not a diagnosis.\n",
    );
    narrative
}

enum Line {
    Heading(String),
    Item(String),
    Text,
}

fn classify_line(line: &str) -> Line {
    let line = line.trim();

    if line.starts_with('#') {
        return Line::Heading(line.trim_start_matches('#').trim().to_string());
    }
    if let Some(item) = strip_list_marker(line) {
        return Line::Item(item.replace("**", "").trim().to_string());
    }
    let bold = line
        .trim_end_matches(':')
        .strip_prefix("**")
        .and_then(|rest| rest.strip_suffix("**"))
        .map(|inner| inner.trim_end_matches(':').trim());
    match bold {
        Some(inner) if !inner.is_empty() && !inner.contains("**") => {
            Line::Heading(inner.to_string())
        }
        _ => Line::Text,
    }
}

/// Text after a `-`, `*`, `+`, `•` bullet or a `1.` / `1)` numeral, if any
pub(crate) fn strip_list_marker(line: &str) -> Option<&str> {
    for bullet in ["- ", "* ", "+ ", "• "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return Some(rest);
        }
    }

    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    let rest = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')'))?;
    rest.starts_with(char::is_whitespace).then_some(rest)
}

fn is_action_heading(text: &str, headings: &[String]) -> bool {
    let normalized = text
        .to_lowercase()
        .replace(['*', ':'], "")
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')' || c.is_whitespace())
        .to_string();
    headings
        .iter()
        .map(|h| h.trim().to_lowercase())
        .any(|h| !h.is_empty() && normalized.contains(&h))
}

/// Collect list items under the first action heading, stopping at the next heading.
///
/// A heading is a `#` line or a line that is entirely bold. A plain line ending
/// in `:` may open the section when it names an action heading.
pub fn extract_steps(narrative: &str, headings: &[String]) -> Vec<String> {
    let mut steps = Vec::new();
    let mut in_section = false;

    for raw in narrative.lines() {
        match classify_line(raw) {
            Line::Heading(text) => {
                if in_section {
                    break;
                }
                in_section = is_action_heading(&text, headings);
            }
            Line::Item(item) if in_section => {
                if !item.is_empty() {
                    steps.push(item);
                }
            }
            Line::Text if !in_section => {
                let trimmed = raw.trim();
                if trimmed.ends_with(':') && is_action_heading(trimmed, headings) {
                    in_section = true;
                }
            }
            _ => {}
        }
    }

    steps
}
