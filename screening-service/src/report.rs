//! HTML rendering of a finished screening record.

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use std::fmt::Write as _;
use std::sync::LazyLock;
use tracing::debug;

use crate::{
    advisory::strip_list_marker,
    config::ReportConfig,
    error::ScreeningError,
    models::{Document, Label, PipelineRecord, Severity, format_percent, non_blank},
};

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

const NOT_PROVIDED: &str = "Not provided";
const NOT_SPECIFIED: &str = "Not specified";

static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());

pub struct ReportCompiler {
    config: ReportConfig,
}

impl Default for ReportCompiler {
    fn default() -> Self {
        Self::new(ReportConfig::default())
    }
}

impl ReportCompiler {
    pub fn new(config: ReportConfig) -> Self {
        Self { config }
    }

    /// Render the record. Depends only on the record, so repeated calls agree.
    pub fn compile(&self, record: &PipelineRecord) -> Result<Document, ScreeningError> {
        let classification = record.classification.as_ref().ok_or_else(|| {
            ScreeningError::CompileFailure("record has no classification".to_string())
        })?;

        let mut html = String::new();
        html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
        let _ = writeln!(html, "<title>{} Report</title>", escape(&self.config.title));
        html.push_str("</head>\n<body>\n<div class=\"report\">\n");

        let _ = writeln!(
            html,
            "<header><h1>{}</h1><p>AI Blood Cell Analysis Report</p></header>",
            escape(&self.config.title)
        );

        self.patient_section(&mut html, record);

        let (banner_class, banner) = match classification.label {
            Label::Leukemia => ("leukemia", "LEUKEMIA DETECTED"),
            Label::Normal => ("normal", "NORMAL"),
            Label::Uncertain => ("uncertain", "UNCERTAIN"),
        };
        let _ = writeln!(
            html,
            "<section class=\"result {}\">\n<h2>{}</h2>\n<p>Classification: <strong>{}</strong></p>\n<p>Confidence: <strong>{}</strong></p>",
            banner_class,
            banner,
            classification.label,
            format_percent(classification.confidence)
        );
        if classification.label == Label::Normal {
            html.push_str("<p>No abnormality detected.</p>\n");
        }
        html.push_str("</section>\n");

        if let Some(advisory) = &record.advisory {
            let urgency = if advisory.urgent_action_required {
                "Urgent action required"
            } else {
                "Routine follow-up"
            };
            let _ = writeln!(
                html,
                "<section class=\"severity {}\"><p>Severity: <strong>{}</strong></p><p>Urgency: {}</p></section>",
                severity_class(advisory.severity),
                advisory.severity,
                urgency
            );
        }

        self.analysis_section(&mut html);

        if let Some(advisory) = &record.advisory {
            html.push_str("<section class=\"recommendations\">\n<h3>Clinical Recommendations</h3>\n");
            html.push_str(&markdown_to_html(&advisory.narrative_text));
            html.push_str("</section>\n");

            if !advisory.prioritized_steps.is_empty() {
                html.push_str("<section class=\"next-steps\">\n<h3>Recommended Next Steps</h3>\n<ol>\n");
                for step in &advisory.prioritized_steps {
                    let _ = writeln!(html, "<li>{}</li>", escape(step));
                }
                html.push_str("</ol>\n</section>\n");
            }
        }

        html.push_str(
            "<footer class=\"disclaimer\"><p><strong>Disclaimer:</strong> This report was produced by an \
AI screening tool for research and educational use. It is not a diagnosis. All findings must be \
confirmed by a qualified hematologist with appropriate laboratory tests.</p></footer>\n",
        );
        html.push_str("</div>\n</body>\n</html>\n");

        if html.trim().is_empty() {
            return Err(ScreeningError::CompileFailure("rendered document is empty".to_string()));
        }

        debug!(run_id = %record.run_id, bytes = html.len(), "Report compiled");
        Ok(Document {
            content_type: HTML_CONTENT_TYPE.to_string(),
            body: html,
        })
    }

    fn patient_section(&self, html: &mut String, record: &PipelineRecord) {
        let patient = record.request.patient.as_ref();
        let name = patient.and_then(|p| non_blank(Some(p.name.as_str()))).unwrap_or(NOT_PROVIDED);
        let dob = patient.and_then(|p| non_blank(p.date_of_birth.as_deref()));
        let gender = patient
            .and_then(|p| non_blank(p.gender.as_deref()))
            .unwrap_or(NOT_SPECIFIED);
        let patient_id = non_blank(record.request.patient_id.as_deref()).unwrap_or(NOT_PROVIDED);
        let age = dob
            .and_then(|d| age_on(d, record.started_at.date_naive()))
            .map(|years| format!("{} years", years))
            .unwrap_or_else(|| "Unknown".to_string());

        let rows = [
            ("Name", name.to_string()),
            ("Patient ID", patient_id.to_string()),
            ("Date of Birth", dob.unwrap_or(NOT_PROVIDED).to_string()),
            ("Age", age),
            ("Gender", gender.to_string()),
            (
                "Report Date",
                record.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            ),
        ];

        html.push_str("<section class=\"patient\">\n<h3>Patient Information</h3>\n<table>\n");
        for (field, value) in rows {
            let _ = writeln!(html, "<tr><th>{}</th><td>{}</td></tr>", field, escape(&value));
        }
        html.push_str("</table>\n</section>\n");
    }

    fn analysis_section(&self, html: &mut String) {
        html.push_str("<section class=\"analysis\">\n<h3>Analysis Details</h3>\n<table>\n");
        let _ = writeln!(
            html,
            "<tr><th>Analysis Method</th><td>{}</td></tr>\n<tr><th>Model ID</th><td><code>{}</code></td></tr>",
            escape(&self.config.analysis_method),
            escape(&self.config.model_id)
        );
        for metric in &self.config.performance {
            let _ = writeln!(
                html,
                "<tr><th>{}</th><td>{}</td></tr>",
                escape(&metric.metric),
                escape(&metric.value)
            );
        }
        html.push_str("</table>\n</section>\n");
    }
}

fn severity_class(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "low",
        Severity::High => "high",
        Severity::Critical => "critical",
    }
}

/// Whole years between an ISO `YYYY-MM-DD` birth date and `today`
pub fn age_on(dob: &str, today: NaiveDate) -> Option<u32> {
    let birth = NaiveDate::parse_from_str(dob.trim(), "%Y-%m-%d").ok()?;
    if birth > today {
        return None;
    }
    let mut years = today.year() - birth.year();
    if (today.month(), today.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn inline(text: &str) -> String {
    BOLD.replace_all(&escape(text), "<strong>$1</strong>").into_owned()
}

#[derive(PartialEq)]
enum ListKind {
    Bullets,
    Numbers,
}

/// Minimal markdown: `#`..`######` headings, bullet and numbered lists, `**bold**`, paragraphs
pub fn markdown_to_html(markdown: &str) -> String {
    let mut out = String::new();
    let mut open: Option<ListKind> = None;

    let close = |out: &mut String, open: &mut Option<ListKind>| match open.take() {
        Some(ListKind::Bullets) => out.push_str("</ul>\n"),
        Some(ListKind::Numbers) => out.push_str("</ol>\n"),
        None => {}
    };

    for line in markdown.lines().map(str::trim) {
        if line.is_empty() {
            close(&mut out, &mut open);
            continue;
        }

        if line.starts_with('#') {
            close(&mut out, &mut open);
            let _ = writeln!(out, "<h4>{}</h4>", inline(line.trim_start_matches('#').trim()));
            continue;
        }

        let (kind, item) = match strip_list_marker(line) {
            Some(item) if line.starts_with(|c: char| c.is_ascii_digit()) => {
                (Some(ListKind::Numbers), item)
            }
            Some(item) => (Some(ListKind::Bullets), item),
            None => (None, line),
        };

        match kind {
            Some(kind) => {
                if open.as_ref() != Some(&kind) {
                    close(&mut out, &mut open);
                    out.push_str(match kind {
                        ListKind::Bullets => "<ul>\n",
                        ListKind::Numbers => "<ol>\n",
                    });
                    open = Some(kind);
                }
                let _ = writeln!(out, "<li>{}</li>", inline(item.trim()));
            }
            None => {
                close(&mut out, &mut open);
                let _ = writeln!(out, "<p>{}</p>", inline(item));
            }
        }
    }
    close(&mut out, &mut open);
    out
}
