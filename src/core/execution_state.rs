use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NodeError, WorkflowError};
use crate::graph::WorkflowDefinition;

use super::shared_state::StateSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Skipped
        )
    }
}

/// Resolved liveness of one edge. Absent from the map = not yet known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeLiveness {
    Live,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Succeeded,
    Failed,
}

/// Mutable per-run bookkeeping owned by a single scheduler run.
#[derive(Debug)]
pub struct ExecutionState {
    pub results: HashMap<String, Value>,
    pub status: HashMap<String, NodeStatus>,
    pub edge_liveness: HashMap<usize, EdgeLiveness>,
    pub errors: HashMap<String, NodeError>,
    pub cancelled: HashSet<String>,
    /// Failed nodes whose branch lost to a satisfied `any`/`race` join.
    pub absorbed: HashSet<String>,
    pub durations: HashMap<String, Duration>,
}

impl ExecutionState {
    pub fn new(definition: &WorkflowDefinition) -> Self {
        let status = definition
            .node_ids()
            .iter()
            .map(|id| (id.clone(), NodeStatus::Pending))
            .collect();
        Self {
            results: HashMap::new(),
            status,
            edge_liveness: HashMap::new(),
            errors: HashMap::new(),
            cancelled: HashSet::new(),
            absorbed: HashSet::new(),
            durations: HashMap::new(),
        }
    }

    pub fn status_of(&self, node_id: &str) -> NodeStatus {
        self.status
            .get(node_id)
            .copied()
            .unwrap_or(NodeStatus::Pending)
    }

    pub fn is_terminal(&self, node_id: &str) -> bool {
        self.status_of(node_id).is_terminal()
    }

    pub fn edge(&self, index: usize) -> Option<EdgeLiveness> {
        self.edge_liveness.get(&index).copied()
    }

    /// Liveness is decided once per edge; later writes are ignored.
    pub fn resolve_edge(&mut self, index: usize, liveness: EdgeLiveness) {
        self.edge_liveness.entry(index).or_insert(liveness);
    }

    pub fn mark_running(&mut self, node_id: &str) -> bool {
        self.transition(node_id, NodeStatus::Running)
    }

    pub fn mark_succeeded(&mut self, node_id: &str, output: Value, duration: Duration) -> bool {
        if !self.transition(node_id, NodeStatus::Succeeded) {
            return false;
        }
        self.results.insert(node_id.to_string(), output);
        self.durations.insert(node_id.to_string(), duration);
        true
    }

    pub fn mark_failed(&mut self, node_id: &str, error: NodeError, duration: Duration) -> bool {
        if !self.transition(node_id, NodeStatus::Failed) {
            return false;
        }
        self.errors.insert(node_id.to_string(), error);
        self.durations.insert(node_id.to_string(), duration);
        true
    }

    pub fn mark_skipped(&mut self, node_id: &str) -> bool {
        self.transition(node_id, NodeStatus::Skipped)
    }

    /// Skip a node that was pending or running because its work was abandoned.
    pub fn mark_cancelled(&mut self, node_id: &str) -> bool {
        if !self.transition(node_id, NodeStatus::Skipped) {
            return false;
        }
        self.cancelled.insert(node_id.to_string());
        true
    }

    /// Record that a failed node no longer fails the run. The node keeps its
    /// `Failed` status and error.
    pub fn absorb_failure(&mut self, node_id: &str) -> bool {
        if self.status_of(node_id) != NodeStatus::Failed {
            return false;
        }
        self.absorbed.insert(node_id.to_string())
    }

    fn transition(&mut self, node_id: &str, next: NodeStatus) -> bool {
        let Some(current) = self.status.get_mut(node_id) else {
            return false;
        };
        if current.is_terminal() {
            return false;
        }
        *current = next;
        true
    }

    /// Node ids that are not terminal yet.
    pub fn unfinished(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .status
            .iter()
            .filter(|(_, s)| !s.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

/// Everything a caller learns about one run.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub run_id: String,
    pub results: HashMap<String, Value>,
    pub status: HashMap<String, NodeStatus>,
    pub errors: HashMap<String, NodeError>,
    pub cancelled: HashSet<String>,
    /// Failed nodes outweighed by a satisfied `any`/`race` join; they do not
    /// count against `overall`.
    pub absorbed: HashSet<String>,
    pub durations: HashMap<String, Duration>,
    pub state: StateSnapshot,
    pub overall: OverallStatus,
    /// Set when the run itself was aborted (timeout, fail-fast, cancellation).
    pub error: Option<WorkflowError>,
}

impl ExecutionResult {
    pub(crate) fn from_state(
        run_id: String,
        exec: ExecutionState,
        state: StateSnapshot,
        error: Option<WorkflowError>,
    ) -> Self {
        let any_failed = exec
            .status
            .iter()
            .any(|(id, s)| *s == NodeStatus::Failed && !exec.absorbed.contains(id));
        let overall = if any_failed || error.is_some() {
            OverallStatus::Failed
        } else {
            OverallStatus::Succeeded
        };
        Self {
            run_id,
            results: exec.results,
            status: exec.status,
            errors: exec.errors,
            cancelled: exec.cancelled,
            absorbed: exec.absorbed,
            durations: exec.durations,
            state,
            overall,
            error,
        }
    }

    pub fn is_success(&self) -> bool {
        self.overall == OverallStatus::Succeeded
    }

    pub fn status_of(&self, node_id: &str) -> Option<NodeStatus> {
        self.status.get(node_id).copied()
    }

    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.results.get(node_id)
    }

    pub fn error_of(&self, node_id: &str) -> Option<&NodeError> {
        self.errors.get(node_id)
    }

    /// Sorted ids of nodes that ended with `status`.
    pub fn nodes_with_status(&self, status: NodeStatus) -> Vec<String> {
        let mut ids: Vec<String> = self
            .status
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{build_graph, Graph, GraphLimits, NodeType};
    use serde_json::json;

    fn def() -> WorkflowDefinition {
        let graph = Graph::new()
            .node("a", NodeType::Number, json!({"value": 1}))
            .node("b", NodeType::Number, json!({"value": 2}))
            .edge("a", "b");
        build_graph(&graph, &GraphLimits::default()).unwrap()
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut exec = ExecutionState::new(&def());
        assert_eq!(exec.status_of("a"), NodeStatus::Pending);
        assert!(exec.mark_running("a"));
        assert!(exec.mark_succeeded("a", json!(1), Duration::ZERO));
        assert!(!exec.mark_skipped("a"));
        assert!(!exec.mark_failed("a", NodeError::DivisionByZero, Duration::ZERO));
        assert_eq!(exec.status_of("a"), NodeStatus::Succeeded);
        assert_eq!(exec.unfinished(), vec!["b"]);
    }

    #[test]
    fn test_edge_resolution_is_write_once() {
        let mut exec = ExecutionState::new(&def());
        assert_eq!(exec.edge(0), None);
        exec.resolve_edge(0, EdgeLiveness::Dead);
        exec.resolve_edge(0, EdgeLiveness::Live);
        assert_eq!(exec.edge(0), Some(EdgeLiveness::Dead));
    }

    #[test]
    fn test_cancelled_nodes_are_skipped() {
        let mut exec = ExecutionState::new(&def());
        exec.mark_running("b");
        assert!(exec.mark_cancelled("b"));
        assert_eq!(exec.status_of("b"), NodeStatus::Skipped);
        assert!(exec.cancelled.contains("b"));
    }

    #[test]
    fn test_overall_status() {
        let mut exec = ExecutionState::new(&def());
        exec.mark_succeeded("a", json!(1), Duration::ZERO);
        exec.mark_skipped("b");
        let result =
            ExecutionResult::from_state("r".into(), exec, StateSnapshot::default(), None);
        assert!(result.is_success());
        assert_eq!(result.nodes_with_status(NodeStatus::Skipped), vec!["b"]);

        let mut exec = ExecutionState::new(&def());
        exec.mark_failed("a", NodeError::DivisionByZero, Duration::ZERO);
        exec.mark_skipped("b");
        let result =
            ExecutionResult::from_state("r".into(), exec, StateSnapshot::default(), None);
        assert_eq!(result.overall, OverallStatus::Failed);
        assert!(matches!(result.error_of("a"), Some(NodeError::DivisionByZero)));
    }

    #[test]
    fn test_absorbed_failure_does_not_fail_the_run() {
        let mut exec = ExecutionState::new(&def());
        assert!(!exec.absorb_failure("a"), "only failed nodes can be absorbed");
        exec.mark_failed("a", NodeError::DivisionByZero, Duration::ZERO);
        exec.mark_skipped("b");
        assert!(exec.absorb_failure("a"));
        let result =
            ExecutionResult::from_state("r".into(), exec, StateSnapshot::default(), None);
        assert!(result.is_success());
        assert_eq!(result.status_of("a"), Some(NodeStatus::Failed));
        assert!(result.absorbed.contains("a"));
    }
}
