pub mod error;
pub mod graph;
pub mod task;

// Re-export commonly used types
pub use error::{GraphError, Result};
pub use graph::{DEFAULT_MAX_STEPS, ExecutionTrace, Graph, GraphBuilder, TraceStep};
pub use task::{NextAction, Task, TaskResult};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    #[derive(Default)]
    struct Counter {
        value: i64,
        log: Vec<String>,
    }

    struct AddTask {
        id: String,
        amount: i64,
        next: NextAction,
    }

    #[async_trait]
    impl Task<Counter> for AddTask {
        fn id(&self) -> &str {
            &self.id
        }

        async fn run(&self, state: &mut Counter) -> anyhow::Result<TaskResult> {
            state.value += self.amount;
            state.log.push(self.id.clone());
            Ok(TaskResult::new_with_status(
                self.next.clone(),
                Some(format!("added {}", self.amount)),
            ))
        }
    }

    struct FailingTask;

    #[async_trait]
    impl Task<Counter> for FailingTask {
        fn id(&self) -> &str {
            "failing"
        }

        async fn run(&self, _state: &mut Counter) -> anyhow::Result<TaskResult> {
            anyhow::bail!("backend unreachable")
        }
    }

    fn add(id: &str, amount: i64, next: NextAction) -> Arc<dyn Task<Counter>> {
        Arc::new(AddTask {
            id: id.to_string(),
            amount,
            next,
        })
    }

    fn branching_graph() -> Graph<Counter> {
        GraphBuilder::new("branching")
            .add_task(add("start", 5, NextAction::Continue))
            .add_task(add("big", 100, NextAction::Continue))
            .add_task(add("small", 1, NextAction::Continue))
            .add_task(add("finish", 0, NextAction::End))
            .add_conditional_edge("start", |s: &Counter| s.value > 3, "big", "small")
            .add_edge("big", "finish")
            .add_edge("small", "finish")
            .build()
    }

    #[tokio::test]
    async fn test_linear_execution_threads_state() {
        let graph = GraphBuilder::new("linear")
            .add_task(add("a", 1, NextAction::Continue))
            .add_task(add("b", 2, NextAction::End))
            .add_edge("a", "b")
            .build();

        let mut state = Counter::default();
        let trace = graph.execute(&mut state).await.unwrap();

        assert_eq!(state.value, 3);
        assert_eq!(trace.visited(), vec!["a", "b"]);
        assert_eq!(trace.steps[1].status_message.as_deref(), Some("added 2"));
    }

    #[tokio::test]
    async fn test_conditional_edge_takes_yes_branch() {
        let graph = branching_graph();
        let mut state = Counter::default();
        let trace = graph.execute(&mut state).await.unwrap();

        assert_eq!(trace.visited(), vec!["start", "big", "finish"]);
        assert_eq!(state.value, 105);
    }

    #[tokio::test]
    async fn test_conditional_edge_takes_no_branch() {
        let graph = branching_graph();
        let mut state = Counter {
            value: -10,
            ..Default::default()
        };
        let trace = graph.execute(&mut state).await.unwrap();

        assert!(!trace.contains("big"));
        assert_eq!(state.log, vec!["start", "small", "finish"]);
    }

    #[tokio::test]
    async fn test_task_failure_carries_task_id() {
        let graph = GraphBuilder::new("failing")
            .add_task(add("a", 1, NextAction::Continue))
            .add_task(Arc::new(FailingTask))
            .add_task(add("never", 1, NextAction::End))
            .add_edge("a", "failing")
            .add_edge("failing", "never")
            .build();

        let mut state = Counter::default();
        let err = graph.execute(&mut state).await.unwrap_err();

        match &err {
            GraphError::TaskExecutionFailed { task_id, .. } => assert_eq!(task_id, "failing"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.task_error().unwrap().to_string(), "backend unreachable");
        assert_eq!(state.log, vec!["a"]);
    }

    #[tokio::test]
    async fn test_goto_unknown_task() {
        let graph = GraphBuilder::new("goto")
            .add_task(add("a", 1, NextAction::GoTo("missing".to_string())))
            .build();

        let mut state = Counter::default();
        let err = graph.execute(&mut state).await.unwrap_err();
        assert!(matches!(err, GraphError::TaskNotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn test_cycle_hits_step_limit() {
        let graph = GraphBuilder::new("cycle")
            .add_task(add("a", 1, NextAction::Continue))
            .add_task(add("b", 1, NextAction::Continue))
            .add_edge("a", "b")
            .add_edge("b", "a")
            .max_steps(10)
            .build();

        let mut state = Counter::default();
        let err = graph.execute(&mut state).await.unwrap_err();
        assert!(matches!(err, GraphError::StepLimitExceeded(10)));
        assert_eq!(state.value, 10);
    }

    #[tokio::test]
    async fn test_empty_graph_has_no_start() {
        let graph: Graph<Counter> = GraphBuilder::new("empty").build();
        let mut state = Counter::default();
        let err = graph.execute(&mut state).await.unwrap_err();
        assert!(matches!(err, GraphError::MissingStartTask(_)));
    }
}
