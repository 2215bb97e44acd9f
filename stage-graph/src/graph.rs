use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::{
    error::{GraphError, Result},
    task::{NextAction, Task},
};

/// Default upper bound on task executions for a single run
pub const DEFAULT_MAX_STEPS: usize = 64;

/// Type alias for edge condition functions
pub type EdgeCondition<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

/// Edge between tasks in the graph
pub struct Edge<S> {
    pub from: String,
    pub to: String,
    pub condition: Option<EdgeCondition<S>>,
}

impl<S> Clone for Edge<S> {
    fn clone(&self) -> Self {
        Self {
            from: self.from.clone(),
            to: self.to.clone(),
            condition: self.condition.clone(),
        }
    }
}

/// A graph of tasks executed against a single state value of type `S`
pub struct Graph<S: Send + 'static> {
    pub id: String,
    tasks: DashMap<String, Arc<dyn Task<S>>>,
    edges: Vec<Edge<S>>,
    start_task_id: Option<String>,
    max_steps: usize,
}

impl<S: Send + 'static> Graph<S> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tasks: DashMap::new(),
            edges: Vec::new(),
            start_task_id: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Execute the graph from its start task until a task ends the run or no
    /// outgoing edge applies.
    pub async fn execute(&self, state: &mut S) -> Result<ExecutionTrace> {
        let mut current = self
            .start_task_id
            .clone()
            .ok_or_else(|| GraphError::MissingStartTask(self.id.clone()))?;
        let mut trace = ExecutionTrace::default();

        loop {
            if trace.steps.len() >= self.max_steps {
                return Err(GraphError::StepLimitExceeded(self.max_steps));
            }

            let task = self
                .get_task(&current)
                .ok_or_else(|| GraphError::TaskNotFound(current.clone()))?;

            debug!(graph_id = %self.id, task_id = %current, "Executing task");

            let mut result =
                task.run(state)
                    .await
                    .map_err(|error| GraphError::TaskExecutionFailed {
                        task_id: current.clone(),
                        error,
                    })?;
            result.task_id = current.clone();

            trace.steps.push(TraceStep {
                task_id: result.task_id,
                status_message: result.status_message,
            });

            match result.next_action {
                NextAction::Continue => match self.find_next_task(&current, state) {
                    Some(next_task_id) => current = next_task_id,
                    None => break,
                },
                NextAction::GoTo(target_id) => {
                    if !self.tasks.contains_key(&target_id) {
                        return Err(GraphError::TaskNotFound(target_id));
                    }
                    current = target_id;
                }
                NextAction::End => break,
            }
        }

        Ok(trace)
    }

    /// Find the next task. Conditional edges are evaluated first, in insertion
    /// order; the first unconditional edge is the fallback.
    pub fn find_next_task(&self, current_task_id: &str, state: &S) -> Option<String> {
        let outgoing = || self.edges.iter().filter(|e| e.from == current_task_id);

        outgoing()
            .find(|edge| edge.condition.as_ref().is_some_and(|condition| condition(state)))
            .or_else(|| outgoing().find(|edge| edge.condition.is_none()))
            .map(|edge| edge.to.clone())
    }

    /// Get the start task ID
    pub fn start_task_id(&self) -> Option<&str> {
        self.start_task_id.as_deref()
    }

    /// Get a task by ID
    pub fn get_task(&self, task_id: &str) -> Option<Arc<dyn Task<S>>> {
        self.tasks.get(task_id).map(|entry| entry.value().clone())
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

/// Builder for creating graphs
pub struct GraphBuilder<S: Send + 'static> {
    graph: Graph<S>,
}

impl<S: Send + 'static> GraphBuilder<S> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            graph: Graph::new(id),
        }
    }

    /// Add a task. The first task added becomes the start task.
    pub fn add_task(mut self, task: Arc<dyn Task<S>>) -> Self {
        let task_id = task.id().to_string();
        if self.graph.tasks.is_empty() {
            self.graph.start_task_id = Some(task_id.clone());
        }
        self.graph.tasks.insert(task_id, task);
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.graph.edges.push(Edge {
            from: from.into(),
            to: to.into(),
            condition: None,
        });
        self
    }

    /// Add a binary branch: go to `yes` when `condition` holds, otherwise to `no`.
    pub fn add_conditional_edge<F>(
        mut self,
        from: impl Into<String>,
        condition: F,
        yes: impl Into<String>,
        no: impl Into<String>,
    ) -> Self
    where
        F: Fn(&S) -> bool + Send + Sync + 'static,
    {
        let from = from.into();
        self.graph.edges.push(Edge {
            from: from.clone(),
            to: yes.into(),
            condition: Some(Arc::new(condition)),
        });
        self.graph.edges.push(Edge {
            from,
            to: no.into(),
            condition: None,
        });
        self
    }

    /// Override the start task. Ignored if the task is not registered.
    pub fn set_start_task(mut self, task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        if self.graph.tasks.contains_key(&task_id) {
            self.graph.start_task_id = Some(task_id);
        }
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.graph.max_steps = max_steps.max(1);
        self
    }

    pub fn build(self) -> Graph<S> {
        self.graph
    }
}

/// One executed task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    pub task_id: String,
    pub status_message: Option<String>,
}

/// Ordered record of the tasks an execution visited
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub steps: Vec<TraceStep>,
}

impl ExecutionTrace {
    pub fn visited(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.task_id.as_str()).collect()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.steps.iter().any(|s| s.task_id == task_id)
    }
}
