//! Workflow-level error types.

use thiserror::Error;

/// Workflow-level errors
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    #[error("Workflow parse error: {0}")]
    ParseError(String),
    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),
    #[error("Edge #{edge} references unknown node: {node}")]
    UnknownNode { edge: usize, node: String },
    #[error("Cycle detected in graph at node: {0}")]
    CycleDetected(String),
    #[error("Graph has {count} nodes, limit is {limit}")]
    TooManyNodes { count: usize, limit: usize },
    #[error("Graph has {count} edges, limit is {limit}")]
    TooManyEdges { count: usize, limit: usize },
    #[error("Nested graphs exceed maximum depth of {0}")]
    NestingTooDeep(usize),
    #[error("Invalid body graph in node '{node_id}': {source}")]
    InvalidNestedGraph {
        node_id: String,
        #[source]
        source: Box<WorkflowError>,
    },
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Execution timeout after {0}ms")]
    ExecutionTimeout(u64),
    #[error("Workflow aborted after node '{node_id}' failed: {error}")]
    FailFast { node_id: String, error: String },
    #[error("Workflow cancelled")]
    Cancelled,
    #[error("Engine configuration error: {0}")]
    ConfigError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl WorkflowError {
    /// Structural errors are raised before a run starts.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            WorkflowError::DuplicateNode(_)
                | WorkflowError::UnknownNode { .. }
                | WorkflowError::CycleDetected(_)
                | WorkflowError::TooManyNodes { .. }
                | WorkflowError::TooManyEdges { .. }
                | WorkflowError::NestingTooDeep(_)
                | WorkflowError::InvalidNestedGraph { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_error_display() {
        assert_eq!(
            WorkflowError::ParseError("x".into()).to_string(),
            "Workflow parse error: x"
        );
        assert_eq!(
            WorkflowError::DuplicateNode("a".into()).to_string(),
            "Duplicate node id: a"
        );
        assert_eq!(
            WorkflowError::UnknownNode {
                edge: 2,
                node: "ghost".into()
            }
            .to_string(),
            "Edge #2 references unknown node: ghost"
        );
        assert_eq!(
            WorkflowError::CycleDetected("b".into()).to_string(),
            "Cycle detected in graph at node: b"
        );
        assert_eq!(
            WorkflowError::TooManyNodes {
                count: 11,
                limit: 10
            }
            .to_string(),
            "Graph has 11 nodes, limit is 10"
        );
        assert_eq!(
            WorkflowError::ExecutionTimeout(500).to_string(),
            "Execution timeout after 500ms"
        );
        assert_eq!(WorkflowError::Cancelled.to_string(), "Workflow cancelled");
    }

    #[test]
    fn test_structural_classification() {
        assert!(WorkflowError::CycleDetected("a".into()).is_structural());
        assert!(WorkflowError::InvalidNestedGraph {
            node_id: "loop".into(),
            source: Box::new(WorkflowError::DuplicateNode("x".into())),
        }
        .is_structural());
        assert!(!WorkflowError::ExecutionTimeout(1).is_structural());
        assert!(!WorkflowError::FailFast {
            node_id: "n".into(),
            error: "e".into()
        }
        .is_structural());
    }
}
