use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use thiserror::Error;

use crate::models::Label;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreeningConfig {
    pub classifier: ClassifierConfig,
    pub advisory: AdvisoryConfig,
    pub report: ReportConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Pinned per-label confidences. The vision model exposes no native
/// probability, so each outcome class reports a fixed empirical value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub normal: f64,
    pub leukemia: f64,
    pub uncertain: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            normal: 0.70,
            leukemia: 0.83,
            uncertain: 0.50,
        }
    }
}

impl Calibration {
    pub fn confidence_for(&self, label: Label) -> f64 {
        match label {
            Label::Normal => self.normal,
            Label::Leukemia => self.leukemia,
            Label::Uncertain => self.uncertain,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Base URL of an OpenAI-compatible endpoint serving the vision model
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub calibration: Calibration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_string(),
            api_key: None,
            model: "chaudhrysuleman/medgemma-1.5-4b-it-leukemia-lora".to_string(),
            max_tokens: 20,
            timeout_secs: 60,
            calibration: Calibration::default(),
        }
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisoryConfig {
    /// OpenRouter key; when absent every advisory uses the deterministic fallback
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub timeout_secs: u64,
    /// Leukemia results above this confidence are `Critical`, otherwise `High`
    pub severity_threshold: f64,
    /// Fewest parsed steps accepted before falling back to the default list
    pub min_steps: usize,
    /// Lower-case heading fragments that open the action list
    pub action_headings: Vec<String>,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "google/gemini-2.5-flash".to_string(),
            temperature: 0.3,
            timeout_secs: 45,
            severity_threshold: 0.85,
            min_steps: 3,
            action_headings: vec!["recommended actions".to_string(), "next steps".to_string()],
        }
    }
}

impl AdvisoryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub metric: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub title: String,
    pub analysis_method: String,
    pub model_id: String,
    pub performance: Vec<PerformanceMetric>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        let metric = |metric: &str, value: &str| PerformanceMetric {
            metric: metric.to_string(),
            value: value.to_string(),
        };
        Self {
            title: "LeukemiaScope".to_string(),
            analysis_method: "MedGemma 1.5 4B (fine-tuned LoRA)".to_string(),
            model_id: "chaudhrysuleman/medgemma-1.5-4b-it-leukemia-lora".to_string(),
            performance: vec![
                metric("Overall Accuracy", "78.15%"),
                metric("Leukemia Precision / Recall / F1", "83% / 83% / 83%"),
                metric("Normal Precision / Recall / F1", "68% / 69% / 69%"),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("'{other}' is not one of pretty, json")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            filter: "leukemia_screening=debug,stage_graph=debug,tower_http=debug".to_string(),
        }
    }
}

impl ScreeningConfig {
    /// Defaults, then the YAML file named by `SCREENING_CONFIG`, then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("SCREENING_CONFIG") {
            Ok(path) => Self::from_yaml_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply environment overrides through `lookup` so tests need not touch process state.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(key) = value("OPENROUTER_API_KEY") {
            self.advisory.api_key = Some(key);
        }
        if let Some(model) = value("ADVISORY_MODEL") {
            self.advisory.model = model;
        }
        if let Some(url) = value("CLASSIFIER_BASE_URL") {
            self.classifier.base_url = url;
        }
        if let Some(key) = value("CLASSIFIER_API_KEY").or_else(|| value("HF_TOKEN")) {
            self.classifier.api_key = Some(key);
        }
        if let Some(model) = value("CLASSIFIER_MODEL") {
            self.classifier.model = model;
        }
        if let Some(port) = value("PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORT".to_string(),
                reason: format!("'{port}' is not a valid port"),
            })?;
        }
        if let Some(format) = value("LOG_FORMAT") {
            self.logging.format = format.parse().map_err(|reason| ConfigError::InvalidValue {
                key: "LOG_FORMAT".to_string(),
                reason,
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let calibration = &self.classifier.calibration;
        for (key, value) in [
            ("classifier.calibration.normal", calibration.normal),
            ("classifier.calibration.leukemia", calibration.leukemia),
            ("classifier.calibration.uncertain", calibration.uncertain),
            ("advisory.severity_threshold", self.advisory.severity_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(key, format!("{value} is outside [0, 1]")));
            }
        }
        if self.advisory.min_steps == 0 {
            return Err(invalid("advisory.min_steps", "must be at least 1".to_string()));
        }
        if self.classifier.timeout_secs == 0 || self.advisory.timeout_secs == 0 {
            return Err(invalid("timeout_secs", "must be greater than zero".to_string()));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(invalid("logging.filter", "must not be empty".to_string()));
        }
        if self.advisory.action_headings.iter().all(|h| h.trim().is_empty()) {
            return Err(invalid(
                "advisory.action_headings",
                "at least one heading is required".to_string(),
            ));
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason,
    }
}
