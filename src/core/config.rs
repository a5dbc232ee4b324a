use serde::{Deserialize, Serialize};

use crate::graph::GraphLimits;

/// How a node with several incoming edges decides it may run once every
/// incoming edge is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// At least one live incoming edge is enough; dead ones are ignored.
    #[default]
    AnyLive,
    /// Every incoming edge must be live, otherwise the node is skipped.
    AllLive,
}

/// Engine-wide limits and scheduling behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_nodes: usize,
    pub max_edges: usize,
    /// Upper bound on concurrently running nodes per scheduler run; 0 = unlimited.
    pub max_concurrency: usize,
    /// Whole-run wall clock; 0 disables it.
    pub max_execution_time_ms: u64,
    /// Per-node wall clock; 0 disables it.
    pub max_node_execution_time_ms: u64,
    pub fail_fast: bool,
    pub merge_policy: MergePolicy,
    pub max_nesting_depth: usize,
    /// Used by iteration nodes without an explicit `max_iterations`.
    pub default_max_iterations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_nodes: 1000,
            max_edges: 5000,
            max_concurrency: 0,
            max_execution_time_ms: 600_000,
            max_node_execution_time_ms: 300_000,
            fail_fast: false,
            merge_policy: MergePolicy::AnyLive,
            max_nesting_depth: 8,
            default_max_iterations: 1000,
        }
    }
}

impl EngineConfig {
    pub fn graph_limits(&self) -> GraphLimits {
        GraphLimits {
            max_nodes: self.max_nodes,
            max_edges: self.max_edges,
            max_nesting_depth: self.max_nesting_depth,
        }
    }
}
