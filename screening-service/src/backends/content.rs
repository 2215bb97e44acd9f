use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BackendError;

/// Message content as returned by chat-style backends: a plain string, a list
/// of fragments, or an object carrying a `text` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawContent {
    Text(String),
    Fragments(Vec<Fragment>),
    Labeled(LabeledText),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Fragment {
    Text(String),
    Labeled(LabeledText),
    Other(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledText {
    pub text: String,
}

impl RawContent {
    pub fn from_value(value: Value) -> Result<Self, BackendError> {
        serde_json::from_value(value)
            .map_err(|e| BackendError::Malformed(format!("unsupported content shape: {}", e)))
    }

    /// Collapse into one string. Fragments without text are dropped.
    pub fn into_text(self) -> String {
        match self {
            RawContent::Text(text) => text,
            RawContent::Labeled(labeled) => labeled.text,
            RawContent::Fragments(fragments) => fragments
                .into_iter()
                .filter_map(|fragment| match fragment {
                    Fragment::Text(text) => Some(text),
                    Fragment::Labeled(labeled) => Some(labeled.text),
                    Fragment::Other(_) => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<String> for RawContent {
    fn from(text: String) -> Self {
        RawContent::Text(text)
    }
}
