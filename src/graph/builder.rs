use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::error::WorkflowError;

use super::types::{Edge, Graph, Node};
use super::validator::{validate_at_depth, GraphLimits};

/// Validated, indexed, immutable workflow graph.
///
/// Built once by [`build_graph`] and shared through `Arc` by any number of
/// concurrent executions. Nested body graphs of wrapper nodes are built
/// alongside and looked up with [`WorkflowDefinition::nested`].
#[derive(Debug)]
pub struct WorkflowDefinition {
    /// Unique id of this prepared definition.
    pub id: String,

    /// Node weights are the nodes; edge weights are indexes into `edges`.
    pub graph: StableDiGraph<Node, usize>,

    /// Edges in declaration order.
    pub edges: Vec<Edge>,

    pub node_index_map: HashMap<String, NodeIndex>,

    /// Node ids in declaration order.
    node_order: Vec<String>,
    incoming: HashMap<String, Vec<usize>>,
    outgoing: HashMap<String, Vec<usize>>,
    nested: HashMap<String, HashMap<String, Arc<WorkflowDefinition>>>,
    depth: usize,
}

impl WorkflowDefinition {
    pub fn get_node(&self, node_id: &str) -> Result<&Node, WorkflowError> {
        let idx = self
            .node_index_map
            .get(node_id)
            .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))?;
        self.graph
            .node_weight(*idx)
            .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))
    }

    pub fn node_ids(&self) -> &[String] {
        &self.node_order
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.node_order.iter().filter_map(|id| self.get_node(id).ok())
    }

    pub fn node_count(&self) -> usize {
        self.node_order.len()
    }

    pub fn edge(&self, index: usize) -> Option<&Edge> {
        self.edges.get(index)
    }

    /// Edge indexes ending at `node_id`.
    pub fn incoming_edges(&self, node_id: &str) -> &[usize] {
        self.incoming.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Edge indexes starting at `node_id`.
    pub fn outgoing_edges(&self, node_id: &str) -> &[usize] {
        self.outgoing.get(node_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes without incoming edges, in declaration order.
    pub fn root_ids(&self) -> Vec<String> {
        self.node_order
            .iter()
            .filter(|id| self.incoming_edges(id).is_empty())
            .cloned()
            .collect()
    }

    /// Nodes without outgoing edges, in declaration order.
    pub fn sink_ids(&self) -> Vec<String> {
        self.node_order
            .iter()
            .filter(|id| self.outgoing_edges(id).is_empty())
            .cloned()
            .collect()
    }

    pub fn get_successors(&self, node_id: &str) -> Result<Vec<String>, WorkflowError> {
        self.neighbors(node_id, Direction::Outgoing)
    }

    pub fn get_predecessors(&self, node_id: &str) -> Result<Vec<String>, WorkflowError> {
        self.neighbors(node_id, Direction::Incoming)
    }

    fn neighbors(&self, node_id: &str, dir: Direction) -> Result<Vec<String>, WorkflowError> {
        let idx = self
            .node_index_map
            .get(node_id)
            .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))?;
        let mut ids: Vec<String> = Vec::new();
        for edge in self.graph.edges_directed(*idx, dir) {
            let other = match dir {
                Direction::Outgoing => edge.target(),
                Direction::Incoming => edge.source(),
            };
            if let Some(node) = self.graph.node_weight(other) {
                if !ids.contains(&node.id) {
                    ids.push(node.id.clone());
                }
            }
        }
        Ok(ids)
    }

    /// Every node with a directed path to `node_id`.
    pub fn ancestors(&self, node_id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let Some(start) = self.node_index_map.get(node_id) else {
            return seen;
        };
        let mut stack = vec![*start];
        while let Some(idx) = stack.pop() {
            for pred in self.graph.neighbors_directed(idx, Direction::Incoming) {
                if let Some(node) = self.graph.node_weight(pred) {
                    if seen.insert(node.id.clone()) {
                        stack.push(pred);
                    }
                }
            }
        }
        seen
    }

    /// Prebuilt body graph stored under `slot` of a wrapper node.
    pub fn nested(&self, node_id: &str, slot: &str) -> Option<Arc<WorkflowDefinition>> {
        self.nested.get(node_id).and_then(|m| m.get(slot)).cloned()
    }

    /// 0 for a top-level workflow, +1 per level of body nesting.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Validate a graph document and build its indexed definition.
pub fn build_graph(graph: &Graph, limits: &GraphLimits) -> Result<WorkflowDefinition, WorkflowError> {
    validate_at_depth(graph, limits, 0)?;
    assemble(graph, 0)
}

fn assemble(doc: &Graph, depth: usize) -> Result<WorkflowDefinition, WorkflowError> {
    let mut graph = StableDiGraph::<Node, usize>::new();
    let mut node_index_map: HashMap<String, NodeIndex> = HashMap::new();
    let mut node_order = Vec::with_capacity(doc.nodes.len());
    let mut nested: HashMap<String, HashMap<String, Arc<WorkflowDefinition>>> = HashMap::new();

    // 1. Nodes, with their body graphs
    for node in &doc.nodes {
        let mut slots = HashMap::new();
        for (slot, value) in node.nested_graph_slots() {
            let body: Graph = serde_json::from_value(value.clone())
                .map_err(|e| WorkflowError::ParseError(format!("{}.{}: {}", node.id, slot, e)))?;
            slots.insert(slot, Arc::new(assemble(&body, depth + 1)?));
        }
        if !slots.is_empty() {
            nested.insert(node.id.clone(), slots);
        }
        let idx = graph.add_node(node.clone());
        node_index_map.insert(node.id.clone(), idx);
        node_order.push(node.id.clone());
    }

    // 2. Edges
    let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
    let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, edge) in doc.edges.iter().enumerate() {
        let source_idx = node_index_map.get(&edge.source).ok_or_else(|| {
            WorkflowError::UnknownNode {
                edge: i,
                node: edge.source.clone(),
            }
        })?;
        let target_idx = node_index_map.get(&edge.target).ok_or_else(|| {
            WorkflowError::UnknownNode {
                edge: i,
                node: edge.target.clone(),
            }
        })?;
        graph.add_edge(*source_idx, *target_idx, i);
        outgoing.entry(edge.source.clone()).or_default().push(i);
        incoming.entry(edge.target.clone()).or_default().push(i);
    }

    Ok(WorkflowDefinition {
        id: uuid::Uuid::new_v4().to_string(),
        graph,
        edges: doc.edges.clone(),
        node_index_map,
        node_order,
        incoming,
        outgoing,
        nested,
        depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeType;
    use serde_json::json;

    fn branching() -> Graph {
        Graph::new()
            .node("start", NodeType::Number, json!({"value": 1}))
            .node("if1", NodeType::Condition, json!({"condition": ">0"}))
            .node("branch_a", NodeType::Number, json!({"value": 2}))
            .node("branch_b", NodeType::Number, json!({"value": 3}))
            .node("end", NodeType::Number, json!({"value": 4}))
            .edge("start", "if1")
            .handle_edge("if1", "true", "branch_a")
            .handle_edge("if1", "false", "branch_b")
            .edge("branch_a", "end")
            .edge("branch_b", "end")
    }

    #[test]
    fn test_build_indexes() {
        let def = build_graph(&branching(), &GraphLimits::default()).unwrap();
        assert_eq!(def.node_count(), 5);
        assert_eq!(def.root_ids(), vec!["start"]);
        assert_eq!(def.sink_ids(), vec!["end"]);
        assert_eq!(def.outgoing_edges("if1"), &[1, 2]);
        assert_eq!(def.incoming_edges("end"), &[3, 4]);
        assert!(def.incoming_edges("start").is_empty());
    }

    #[test]
    fn test_successors_and_predecessors() {
        let def = build_graph(&branching(), &GraphLimits::default()).unwrap();
        let mut succ = def.get_successors("if1").unwrap();
        succ.sort();
        assert_eq!(succ, vec!["branch_a", "branch_b"]);
        let mut pred = def.get_predecessors("end").unwrap();
        pred.sort();
        assert_eq!(pred, vec!["branch_a", "branch_b"]);
        assert!(def.get_successors("ghost").is_err());
    }

    #[test]
    fn test_ancestors() {
        let def = build_graph(&branching(), &GraphLimits::default()).unwrap();
        let anc = def.ancestors("end");
        assert_eq!(anc.len(), 4);
        assert!(anc.contains("start"));
        assert!(def.ancestors("start").is_empty());
    }

    #[test]
    fn test_nested_bodies_are_prebuilt() {
        let body = Graph::new().node("inner", NodeType::Number, json!({"value": 7}));
        let graph = Graph::new().node(
            "retry",
            NodeType::Retry,
            json!({"max_attempts": 2, "body": body.to_value()}),
        );
        let def = build_graph(&graph, &GraphLimits::default()).unwrap();
        let nested = def.nested("retry", "body").unwrap();
        assert_eq!(nested.depth(), 1);
        assert_eq!(nested.root_ids(), vec!["inner"]);
        assert!(def.nested("retry", "catch").is_none());
    }

    #[test]
    fn test_build_rejects_invalid() {
        let graph = Graph::new().node("a", NodeType::Number, json!({})).edge("a", "b");
        assert!(build_graph(&graph, &GraphLimits::default()).is_err());
    }
}
