use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every node kind the engine knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    // Value / transform
    Number,
    TextInput,
    Math,
    TextOp,
    Extract,
    Transform,
    Parse,
    Expression,
    Map,
    Reduce,
    Filter,
    Sort,
    Slice,
    // Control flow
    Condition,
    Switch,
    // Iteration
    ForEach,
    WhileLoop,
    // Concurrency
    Parallel,
    Join,
    Split,
    // Resilience
    Retry,
    TryCatch,
    Timeout,
    Delay,
    // Stateful
    Variable,
    Accumulator,
    Counter,
    Cache,
    // Network
    Http,
}

impl NodeType {
    pub const ALL: [NodeType; 29] = [
        NodeType::Number,
        NodeType::TextInput,
        NodeType::Math,
        NodeType::TextOp,
        NodeType::Extract,
        NodeType::Transform,
        NodeType::Parse,
        NodeType::Expression,
        NodeType::Map,
        NodeType::Reduce,
        NodeType::Filter,
        NodeType::Sort,
        NodeType::Slice,
        NodeType::Condition,
        NodeType::Switch,
        NodeType::ForEach,
        NodeType::WhileLoop,
        NodeType::Parallel,
        NodeType::Join,
        NodeType::Split,
        NodeType::Retry,
        NodeType::TryCatch,
        NodeType::Timeout,
        NodeType::Delay,
        NodeType::Variable,
        NodeType::Accumulator,
        NodeType::Counter,
        NodeType::Cache,
        NodeType::Http,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Number => "number",
            NodeType::TextInput => "text_input",
            NodeType::Math => "math",
            NodeType::TextOp => "text_op",
            NodeType::Extract => "extract",
            NodeType::Transform => "transform",
            NodeType::Parse => "parse",
            NodeType::Expression => "expression",
            NodeType::Map => "map",
            NodeType::Reduce => "reduce",
            NodeType::Filter => "filter",
            NodeType::Sort => "sort",
            NodeType::Slice => "slice",
            NodeType::Condition => "condition",
            NodeType::Switch => "switch",
            NodeType::ForEach => "for_each",
            NodeType::WhileLoop => "while_loop",
            NodeType::Parallel => "parallel",
            NodeType::Join => "join",
            NodeType::Split => "split",
            NodeType::Retry => "retry",
            NodeType::TryCatch => "try_catch",
            NodeType::Timeout => "timeout",
            NodeType::Delay => "delay",
            NodeType::Variable => "variable",
            NodeType::Accumulator => "accumulator",
            NodeType::Counter => "counter",
            NodeType::Cache => "cache",
            NodeType::Http => "http",
        }
    }

    /// Wrapper nodes carry nested body graphs in their config.
    pub fn is_wrapper(&self) -> bool {
        matches!(
            self,
            NodeType::ForEach
                | NodeType::WhileLoop
                | NodeType::Parallel
                | NodeType::Retry
                | NodeType::TryCatch
                | NodeType::Timeout
        )
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed processing step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: NodeType, config: Value) -> Self {
        Self {
            id: id.into(),
            node_type,
            config,
            title: None,
        }
    }

    /// Nested graph documents held in this node's config, keyed by slot.
    ///
    /// Slots are `body`, `catch` and `branches.<index>`. Absent slots are
    /// simply not reported; the executor decides whether that is an error.
    pub fn nested_graph_slots(&self) -> Vec<(String, &Value)> {
        let mut slots = Vec::new();
        if !self.node_type.is_wrapper() {
            return slots;
        }
        if self.node_type == NodeType::Parallel {
            if let Some(branches) = self.config.get("branches").and_then(|b| b.as_array()) {
                for (i, branch) in branches.iter().enumerate() {
                    if let Some(graph) = branch.get("graph") {
                        slots.push((branch_slot(i), graph));
                    }
                }
            }
            return slots;
        }
        if let Some(body) = self.config.get("body") {
            slots.push(("body".to_string(), body));
        }
        if self.node_type == NodeType::TryCatch {
            if let Some(catch) = self.config.get("catch") {
                slots.push(("catch".to_string(), catch));
            }
        }
        slots
    }
}

/// Slot key of the `index`-th Parallel branch.
pub fn branch_slot(index: usize) -> String {
    format!("branches.{}", index)
}

/// A data-flow connection; its identity is its position in [`Graph::edges`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(
        default,
        alias = "sourceHandle",
        skip_serializing_if = "Option::is_none"
    )]
    pub source_handle: Option<String>,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: None,
            source: source.into(),
            target: target.into(),
            source_handle: None,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }
}

/// Document form of a workflow graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, id: impl Into<String>, node_type: NodeType, config: Value) -> Self {
        self.nodes.push(Node::new(id, node_type, config));
        self
    }

    pub fn edge(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.edges.push(Edge::new(source, target));
        self
    }

    pub fn handle_edge(
        mut self,
        source: impl Into<String>,
        handle: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        self.edges.push(Edge::new(source, target).with_handle(handle));
        self
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Which outgoing edges a finished node makes live.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EdgeHandle {
    /// Every outgoing edge.
    #[default]
    Default,
    /// Only edges labelled with this handle.
    Branch(String),
    /// Only edges labelled with one of these handles.
    Many(Vec<String>),
    /// Edges labelled with this handle, plus unlabelled edges. Used by
    /// nodes whose label is an optional side exit (`try_catch`, `cache`).
    Route(String),
    /// No outgoing edge.
    Unmatched,
}

impl EdgeHandle {
    pub fn branch(handle: impl Into<String>) -> Self {
        EdgeHandle::Branch(handle.into())
    }

    pub fn route(handle: impl Into<String>) -> Self {
        EdgeHandle::Route(handle.into())
    }

    /// Whether an edge carrying `label` is live under this selection.
    pub fn selects(&self, label: Option<&str>) -> bool {
        match (self, label) {
            (EdgeHandle::Default, _) => true,
            (EdgeHandle::Branch(h), Some(label)) => h == label,
            (EdgeHandle::Many(hs), Some(label)) => hs.iter().any(|h| h == label),
            (EdgeHandle::Route(_), None) => true,
            (EdgeHandle::Route(h), Some(label)) => h == label,
            (EdgeHandle::Branch(_) | EdgeHandle::Many(_) | EdgeHandle::Unmatched, _) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_type_serde_names() {
        for t in NodeType::ALL {
            let v = serde_json::to_value(t).unwrap();
            assert_eq!(v, json!(t.as_str()));
            let back: NodeType = serde_json::from_value(v).unwrap();
            assert_eq!(back, t);
        }
    }

    #[test]
    fn test_edge_accepts_camel_case_handle() {
        let edge: Edge =
            serde_json::from_value(json!({"source": "a", "target": "b", "sourceHandle": "true"}))
                .unwrap();
        assert_eq!(edge.source_handle.as_deref(), Some("true"));
    }

    #[test]
    fn test_handle_selection() {
        let branch = EdgeHandle::branch("true");
        assert!(branch.selects(Some("true")));
        assert!(!branch.selects(Some("false")));
        assert!(!branch.selects(None));

        let many = EdgeHandle::Many(vec!["a".into(), "b".into()]);
        assert!(many.selects(Some("b")));
        assert!(!many.selects(Some("c")));
        assert!(!many.selects(None));

        let route = EdgeHandle::route("error");
        assert!(route.selects(Some("error")));
        assert!(!route.selects(Some("success")));
        assert!(route.selects(None));

        assert!(!EdgeHandle::Unmatched.selects(Some("x")));
        assert!(!EdgeHandle::Unmatched.selects(None));
        assert!(EdgeHandle::Default.selects(Some("anything")));
    }

    #[test]
    fn test_nested_graph_slots() {
        let node = Node::new(
            "tc",
            NodeType::TryCatch,
            json!({"body": {"nodes": []}, "catch": {"nodes": []}}),
        );
        let slots: Vec<String> = node.nested_graph_slots().into_iter().map(|s| s.0).collect();
        assert_eq!(slots, vec!["body", "catch"]);

        let par = Node::new(
            "p",
            NodeType::Parallel,
            json!({"branches": [{"name": "x", "graph": {}}, {"name": "y", "graph": {}}]}),
        );
        let slots: Vec<String> = par.nested_graph_slots().into_iter().map(|s| s.0).collect();
        assert_eq!(slots, vec!["branches.0", "branches.1"]);

        let plain = Node::new("m", NodeType::Math, json!({"body": {}}));
        assert!(plain.nested_graph_slots().is_empty());
    }
}
