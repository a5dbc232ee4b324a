use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::dispatcher::JoinStrategy;
use crate::error::NodeError;
use crate::graph::{branch_slot, EdgeHandle, Node};
use crate::nodes::executor::{ExecutionContext, NodeExecutor, NodeInput, NodeRunResult};
use crate::nodes::utils::parse_config;

// ================================
// Parallel Node
// ================================

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum ParallelStrategy {
    #[default]
    All,
    Any,
    Race,
}

#[derive(Debug, Deserialize)]
struct BranchConfig {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ParallelConfig {
    #[serde(default)]
    branches: Vec<BranchConfig>,
    /// 0 = every branch at once.
    #[serde(default)]
    max_concurrency: usize,
    #[serde(default)]
    strategy: ParallelStrategy,
}

/// Runs each branch graph on the same input.
///
/// `all` returns an object of branch outputs keyed by branch name and fails on
/// the first branch failure; `any`/`race` return the first successful branch
/// output and cancel the rest.
pub struct ParallelExecutor;

#[async_trait]
impl NodeExecutor for ParallelExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: ParallelConfig = parse_config(&node.id, &node.config)?;
        if config.branches.is_empty() {
            return Err(NodeError::ConfigError(format!(
                "parallel '{}' has no branches",
                node.id
            )));
        }
        let names: Vec<String> = config
            .branches
            .iter()
            .enumerate()
            .map(|(i, b)| b.name.clone().unwrap_or_else(|| format!("branch_{}", i)))
            .collect();
        let width = match config.max_concurrency {
            0 => names.len(),
            n => n,
        };

        let group = ctx.cancel.child_token();
        let _guard = group.clone().drop_guard();
        let runs = stream::iter(names.into_iter().enumerate()).map(|(i, name)| {
            let token = group.child_token();
            let input = input.value.clone();
            async move {
                let output = ctx.run_sub_graph(&branch_slot(i), input, token).await;
                (name, output)
            }
        });

        match config.strategy {
            ParallelStrategy::All => {
                let outputs: Map<String, Value> = runs
                    .buffer_unordered(width)
                    .map(|(name, output)| output.map(|v| (name, v)))
                    .try_collect()
                    .await?;
                Ok(NodeRunResult::output(Value::Object(outputs)))
            }
            ParallelStrategy::Any | ParallelStrategy::Race => {
                let mut runs = runs.buffer_unordered(width);
                let mut last_error = None;
                while let Some((name, output)) = runs.next().await {
                    match output {
                        Ok(value) => {
                            tracing::debug!(node_id = %ctx.node_path, branch = %name, "parallel branch won");
                            group.cancel();
                            return Ok(NodeRunResult::output(value));
                        }
                        Err(e) => {
                            tracing::debug!(node_id = %ctx.node_path, branch = %name, error = %e, "parallel branch failed");
                            last_error = Some(e);
                        }
                    }
                }
                Err(last_error.unwrap_or_else(|| {
                    NodeError::ExecutionError("no parallel branch succeeded".to_string())
                }))
            }
        }
    }
}

// ================================
// Join Node
// ================================

/// Merge point for branches that fan in through ordinary edges. Readiness is
/// decided by the scheduler; this only shapes the output.
pub struct JoinExecutor;

#[async_trait]
impl NodeExecutor for JoinExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        _ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        match JoinStrategy::of(node)? {
            JoinStrategy::All => {
                if !input.failed.is_empty() {
                    return Err(NodeError::ExecutionError(format!(
                        "join '{}': sources failed: {}",
                        node.id,
                        input.failed.join(", ")
                    )));
                }
                Ok(NodeRunResult::output(Value::Object(input.sources)))
            }
            JoinStrategy::Any => {
                let winner = input.sources.into_iter().next().map(|(_, v)| v);
                Ok(NodeRunResult::output(winner.unwrap_or(Value::Null)))
            }
        }
    }
}

// ================================
// Split Node
// ================================

#[derive(Debug, Deserialize)]
struct SplitConfig {
    #[serde(default)]
    paths: Vec<String>,
}

/// Passes its input along every named path at once.
pub struct SplitExecutor;

#[async_trait]
impl NodeExecutor for SplitExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        _ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: SplitConfig = parse_config(&node.id, &node.config)?;
        let handle = if config.paths.is_empty() {
            EdgeHandle::Default
        } else {
            EdgeHandle::Many(config.paths)
        };
        Ok(NodeRunResult::with_handle(input.value, handle))
    }
}
