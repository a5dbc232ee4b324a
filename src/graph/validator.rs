use std::collections::{HashMap, HashSet};

use petgraph::stable_graph::StableDiGraph;

use crate::error::WorkflowError;

use super::types::Graph;

/// Structural resource guards applied to every graph, nested bodies included.
#[derive(Debug, Clone, Copy)]
pub struct GraphLimits {
    pub max_nodes: usize,
    pub max_edges: usize,
    pub max_nesting_depth: usize,
}

impl Default for GraphLimits {
    fn default() -> Self {
        Self {
            max_nodes: 1000,
            max_edges: 5000,
            max_nesting_depth: 8,
        }
    }
}

/// Check a graph (and every nested body graph) for structural well-formedness.
pub fn validate_graph(graph: &Graph, limits: &GraphLimits) -> Result<(), WorkflowError> {
    validate_at_depth(graph, limits, 0)
}

pub(crate) fn validate_at_depth(
    graph: &Graph,
    limits: &GraphLimits,
    depth: usize,
) -> Result<(), WorkflowError> {
    if depth > limits.max_nesting_depth {
        return Err(WorkflowError::NestingTooDeep(limits.max_nesting_depth));
    }

    // 1. Size guards
    if graph.nodes.len() > limits.max_nodes {
        return Err(WorkflowError::TooManyNodes {
            count: graph.nodes.len(),
            limit: limits.max_nodes,
        });
    }
    if graph.edges.len() > limits.max_edges {
        return Err(WorkflowError::TooManyEdges {
            count: graph.edges.len(),
            limit: limits.max_edges,
        });
    }

    // 2. Unique ids
    let mut seen = HashSet::with_capacity(graph.nodes.len());
    for node in &graph.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(WorkflowError::DuplicateNode(node.id.clone()));
        }
    }

    // 3. Edge endpoints
    for (i, edge) in graph.edges.iter().enumerate() {
        for endpoint in [&edge.source, &edge.target] {
            if !seen.contains(endpoint.as_str()) {
                return Err(WorkflowError::UnknownNode {
                    edge: i,
                    node: endpoint.clone(),
                });
            }
        }
    }

    // 4. Cycles over the full edge set, handles ignored
    detect_cycle(graph)?;

    // 5. Nested bodies
    for node in &graph.nodes {
        for (slot, value) in node.nested_graph_slots() {
            let wrap = |source: WorkflowError| WorkflowError::InvalidNestedGraph {
                node_id: node.id.clone(),
                source: Box::new(source),
            };
            let nested: Graph = serde_json::from_value(value.clone()).map_err(|e| {
                wrap(WorkflowError::ParseError(format!("{}: {}", slot, e)))
            })?;
            validate_at_depth(&nested, limits, depth + 1).map_err(|e| match e {
                WorkflowError::NestingTooDeep(_) => e,
                other => wrap(other),
            })?;
        }
    }

    Ok(())
}

fn detect_cycle(graph: &Graph) -> Result<(), WorkflowError> {
    let mut g = StableDiGraph::<&str, ()>::new();
    let mut index = HashMap::with_capacity(graph.nodes.len());
    for node in &graph.nodes {
        index.insert(node.id.as_str(), g.add_node(node.id.as_str()));
    }
    for edge in &graph.edges {
        if let (Some(s), Some(t)) = (index.get(edge.source.as_str()), index.get(edge.target.as_str())) {
            g.add_edge(*s, *t, ());
        }
    }
    petgraph::algo::toposort(&g, None)
        .map(|_| ())
        .map_err(|cycle| {
            let id = g.node_weight(cycle.node_id()).copied().unwrap_or_default();
            WorkflowError::CycleDetected(id.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeType;
    use serde_json::json;

    fn num(v: i64) -> serde_json::Value {
        json!({ "value": v })
    }

    #[test]
    fn test_validate_dag() {
        let graph = Graph::new()
            .node("a", NodeType::Number, num(1))
            .node("b", NodeType::Math, json!({"operation": "negate"}))
            .edge("a", "b");
        assert!(validate_graph(&graph, &GraphLimits::default()).is_ok());
    }

    #[test]
    fn test_detect_cycle() {
        let graph = Graph::new()
            .node("a", NodeType::Number, num(1))
            .node("b", NodeType::Number, num(2))
            .edge("a", "b")
            .edge("b", "a");
        assert!(matches!(
            validate_graph(&graph, &GraphLimits::default()),
            Err(WorkflowError::CycleDetected(_))
        ));
    }

    #[test]
    fn test_cycle_on_dead_branch_is_rejected() {
        let graph = Graph::new()
            .node("c", NodeType::Condition, json!({"condition": ">0"}))
            .node("x", NodeType::Number, num(1))
            .node("y", NodeType::Number, num(2))
            .handle_edge("c", "false", "x")
            .edge("x", "y")
            .edge("y", "x");
        assert!(matches!(
            validate_graph(&graph, &GraphLimits::default()),
            Err(WorkflowError::CycleDetected(_))
        ));
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let graph = Graph::new().node("a", NodeType::Number, num(1)).edge("a", "a");
        assert!(matches!(
            validate_graph(&graph, &GraphLimits::default()),
            Err(WorkflowError::CycleDetected(id)) if id == "a"
        ));
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let dup = Graph::new()
            .node("a", NodeType::Number, num(1))
            .node("a", NodeType::Number, num(2));
        assert!(matches!(
            validate_graph(&dup, &GraphLimits::default()),
            Err(WorkflowError::DuplicateNode(id)) if id == "a"
        ));

        let unknown = Graph::new().node("a", NodeType::Number, num(1)).edge("a", "ghost");
        assert!(matches!(
            validate_graph(&unknown, &GraphLimits::default()),
            Err(WorkflowError::UnknownNode { edge: 0, node }) if node == "ghost"
        ));
    }

    #[test]
    fn test_size_limits() {
        let limits = GraphLimits {
            max_nodes: 1,
            ..GraphLimits::default()
        };
        let graph = Graph::new()
            .node("a", NodeType::Number, num(1))
            .node("b", NodeType::Number, num(2));
        assert!(matches!(
            validate_graph(&graph, &limits),
            Err(WorkflowError::TooManyNodes { count: 2, limit: 1 })
        ));

        let limits = GraphLimits {
            max_edges: 0,
            ..GraphLimits::default()
        };
        let graph = graph.edge("a", "b");
        assert!(matches!(
            validate_graph(&graph, &limits),
            Err(WorkflowError::TooManyEdges { count: 1, limit: 0 })
        ));
    }

    #[test]
    fn test_cycle_inside_nested_body() {
        let body = Graph::new()
            .node("x", NodeType::Number, num(1))
            .node("y", NodeType::Number, num(2))
            .edge("x", "y")
            .edge("y", "x");
        let graph = Graph::new().node(
            "loop",
            NodeType::ForEach,
            json!({ "body": body.to_value() }),
        );
        match validate_graph(&graph, &GraphLimits::default()) {
            Err(WorkflowError::InvalidNestedGraph { node_id, source }) => {
                assert_eq!(node_id, "loop");
                assert!(matches!(*source, WorkflowError::CycleDetected(_)));
            }
            other => panic!("expected nested cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_nesting_depth_limit() {
        let inner = Graph::new().node("n", NodeType::Number, num(1));
        let middle = Graph::new().node("r", NodeType::Retry, json!({"body": inner.to_value()}));
        let outer = Graph::new().node("t", NodeType::Timeout, json!({"body": middle.to_value()}));
        let limits = GraphLimits {
            max_nesting_depth: 1,
            ..GraphLimits::default()
        };
        assert!(matches!(
            validate_graph(&outer, &limits),
            Err(WorkflowError::NestingTooDeep(1))
        ));
        assert!(validate_graph(&outer, &GraphLimits::default()).is_ok());
    }

    #[test]
    fn test_malformed_nested_body() {
        let graph = Graph::new().node("r", NodeType::Retry, json!({"body": "not a graph"}));
        assert!(matches!(
            validate_graph(&graph, &GraphLimits::default()),
            Err(WorkflowError::InvalidNestedGraph { .. })
        ));
    }
}
