use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy of a screening run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScreeningError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("report compilation failed: {0}")]
    CompileFailure(String),
}

impl ScreeningError {
    pub fn tag(&self) -> FailureTag {
        match self {
            ScreeningError::InvalidInput(_) => FailureTag::InvalidInput,
            ScreeningError::BackendUnavailable(_) => FailureTag::BackendUnavailable,
            ScreeningError::MalformedResponse(_) => FailureTag::MalformedResponse,
            ScreeningError::CompileFailure(_) => FailureTag::CompileFailure,
        }
    }
}

/// Tag carried by a run that ended in the `Failed` state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureTag {
    InvalidInput,
    BackendUnavailable,
    MalformedResponse,
    CompileFailure,
    /// The pipeline itself is miswired (unknown task, step limit)
    Internal,
}

/// Errors at the boundary of an external inference or generation backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend unreachable: {0}")]
    Unavailable(String),

    #[error("unexpected response shape: {0}")]
    Malformed(String),

    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),
}

impl From<BackendError> for ScreeningError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Malformed(detail) => ScreeningError::MalformedResponse(detail),
            other => ScreeningError::BackendUnavailable(other.to_string()),
        }
    }
}
