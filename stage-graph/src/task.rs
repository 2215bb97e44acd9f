use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of a task execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Id of the task that produced this result, filled in by the graph
    pub task_id: String,
    /// Short human-readable note about what the task did
    pub status_message: Option<String>,
    /// Next action to take
    pub next_action: NextAction,
}

impl TaskResult {
    pub fn new(next_action: NextAction) -> Self {
        Self {
            task_id: String::new(),
            status_message: None,
            next_action,
        }
    }

    pub fn new_with_status(next_action: NextAction, status_message: Option<String>) -> Self {
        Self {
            task_id: String::new(),
            status_message,
            next_action,
        }
    }
}

/// Defines what should happen after a task completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NextAction {
    /// Follow the outgoing edges of the current task
    Continue,
    /// Jump to a specific task by ID
    GoTo(String),
    /// Stop execution
    End,
}

/// Core trait that all tasks must implement.
///
/// A task receives exclusive access to the state for the duration of its run;
/// no two tasks of the same execution ever run concurrently.
#[async_trait]
pub trait Task<S: Send>: Send + Sync {
    /// Unique identifier for this task
    fn id(&self) -> &str;

    /// Execute the task against the shared state
    async fn run(&self, state: &mut S) -> anyhow::Result<TaskResult>;
}
