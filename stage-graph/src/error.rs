use thiserror::Error;

/// Errors raised while building or executing a graph
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Graph '{0}' has no start task")]
    MissingStartTask(String),

    #[error("Task '{task_id}' failed: {error}")]
    TaskExecutionFailed {
        task_id: String,
        error: anyhow::Error,
    },

    #[error("Execution exceeded the limit of {0} steps")]
    StepLimitExceeded(usize),
}

impl GraphError {
    /// The underlying task error, if this is a task failure
    pub fn task_error(&self) -> Option<&anyhow::Error> {
        match self {
            GraphError::TaskExecutionFailed { error, .. } => Some(error),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
