//! Sub-graph runner for wrapper nodes (ForEach, WhileLoop, Parallel, Retry,
//! TryCatch, Timeout).
//!
//! A body graph is a self-contained workflow prebuilt alongside its parent.
//! [`SubGraphRunner`] abstracts how it is executed so tests can substitute
//! their own implementation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::core::dispatcher::WorkflowDispatcher;
use crate::core::execution_state::{ExecutionResult, NodeStatus};
use crate::error::{NodeError, WorkflowError};
use crate::graph::WorkflowDefinition;
use crate::nodes::ExecutionContext;

#[async_trait]
pub trait SubGraphRunner: Send + Sync {
    /// Run `body` with `input` as its root input and return the body output.
    async fn run_sub_graph(
        &self,
        parent: &ExecutionContext,
        body: Arc<WorkflowDefinition>,
        input: Value,
        token: CancellationToken,
    ) -> Result<Value, NodeError>;
}

/// Runs the body on a nested [`WorkflowDispatcher`] sharing the parent's
/// runtime and state.
pub struct DefaultSubGraphRunner;

#[async_trait]
impl SubGraphRunner for DefaultSubGraphRunner {
    async fn run_sub_graph(
        &self,
        parent: &ExecutionContext,
        body: Arc<WorkflowDefinition>,
        input: Value,
        token: CancellationToken,
    ) -> Result<Value, NodeError> {
        let output_node = parent
            .definition
            .get_node(&parent.node_id)
            .ok()
            .and_then(|n| n.config.get("output_node"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let dispatcher = WorkflowDispatcher::nested(parent, Arc::clone(&body), token.clone());
        let result = dispatcher.run(input).await;
        if token.is_cancelled() {
            return Err(NodeError::Cancelled);
        }
        body_output(&body, &result, output_node.as_deref())
    }
}

/// Output of a finished body run.
///
/// A failed body yields the first failing node's error, wrapped with its id.
/// Otherwise: the `output_node`'s result when configured, else the single
/// succeeded sink's result, an object of succeeded sinks when there are
/// several, or `null` when none succeeded.
pub fn body_output(
    body: &WorkflowDefinition,
    result: &ExecutionResult,
    output_node: Option<&str>,
) -> Result<Value, NodeError> {
    if let Some(err) = &result.error {
        return Err(match err {
            WorkflowError::FailFast { node_id, error } => match result.errors.get(node_id) {
                Some(e) => NodeError::nested(node_id.clone(), e.clone()),
                None => NodeError::ExecutionError(error.clone()),
            },
            WorkflowError::Cancelled => NodeError::Cancelled,
            WorkflowError::ExecutionTimeout(ms) => {
                NodeError::Timeout(format!("body exceeded {} ms", ms))
            }
            other => NodeError::ExecutionError(other.to_string()),
        });
    }
    let failed = result.nodes_with_status(NodeStatus::Failed);
    if let Some(node_id) = failed.iter().find(|id| !result.absorbed.contains(*id)) {
        if let Some(e) = result.errors.get(node_id) {
            return Err(NodeError::nested(node_id.clone(), e.clone()));
        }
    }

    if let Some(id) = output_node {
        return result
            .output(id)
            .cloned()
            .ok_or_else(|| NodeError::MissingField(format!("output node '{}' has no result", id)));
    }

    let mut sinks: Vec<(String, Value)> = body
        .sink_ids()
        .into_iter()
        .filter_map(|id| result.output(&id).cloned().map(|v| (id, v)))
        .collect();
    Ok(match sinks.len() {
        0 => Value::Null,
        1 => sinks.remove(0).1,
        _ => Value::Object(sinks.into_iter().collect::<Map<String, Value>>()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::execution_state::ExecutionState;
    use crate::core::shared_state::StateSnapshot;
    use crate::graph::{build_graph, Graph, GraphLimits, NodeType};
    use serde_json::json;
    use std::time::Duration;

    fn body() -> WorkflowDefinition {
        let graph = Graph::new()
            .node("a", NodeType::Number, json!({"value": 1}))
            .node("b", NodeType::Number, json!({"value": 2}))
            .node("c", NodeType::Number, json!({"value": 3}))
            .edge("a", "b")
            .edge("a", "c");
        build_graph(&graph, &GraphLimits::default()).unwrap()
    }

    fn finish(def: &WorkflowDefinition, f: impl FnOnce(&mut ExecutionState)) -> ExecutionResult {
        let mut exec = ExecutionState::new(def);
        f(&mut exec);
        ExecutionResult::from_state("r".into(), exec, StateSnapshot::default(), None)
    }

    #[test]
    fn test_several_sinks_become_an_object() {
        let def = body();
        let result = finish(&def, |e| {
            e.mark_succeeded("a", json!(1), Duration::ZERO);
            e.mark_succeeded("b", json!(2), Duration::ZERO);
            e.mark_succeeded("c", json!(3), Duration::ZERO);
        });
        assert_eq!(body_output(&def, &result, None).unwrap(), json!({"b": 2, "c": 3}));
        assert_eq!(body_output(&def, &result, Some("a")).unwrap(), json!(1));
    }

    #[test]
    fn test_single_live_sink_is_unwrapped() {
        let def = body();
        let result = finish(&def, |e| {
            e.mark_succeeded("a", json!(1), Duration::ZERO);
            e.mark_succeeded("b", json!(2), Duration::ZERO);
            e.mark_skipped("c");
        });
        assert_eq!(body_output(&def, &result, None).unwrap(), json!(2));
    }

    #[test]
    fn test_failure_is_wrapped_with_node_id() {
        let def = body();
        let result = finish(&def, |e| {
            e.mark_failed("b", NodeError::DivisionByZero, Duration::ZERO);
        });
        let err = body_output(&def, &result, None).unwrap_err();
        assert!(matches!(err, NodeError::Nested { ref node_id, .. } if node_id == "b"));
        assert!(matches!(err.root_cause(), NodeError::DivisionByZero));
    }
}
