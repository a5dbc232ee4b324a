//! ForEach and WhileLoop: run a body graph repeatedly inside one node.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::NodeError;
use crate::evaluator::Condition;
use crate::graph::Node;
use crate::nodes::executor::{ExecutionContext, NodeExecutor, NodeInput, NodeRunResult};
use crate::nodes::utils::{input_array, parse_config};

#[derive(Debug, Deserialize)]
struct ForEachConfig {
    #[serde(default)]
    items_field: Option<String>,
    #[serde(default)]
    max_iterations: Option<usize>,
    #[serde(default = "one")]
    max_concurrency: usize,
    /// Feed the body `{"item": .., "index": i}` instead of the bare item.
    #[serde(default)]
    with_index: bool,
}

fn one() -> usize {
    1
}

/// Runs `body` once per item; output is the array of body outputs in item
/// order. With `with_index` the body sees the item's position as well.
pub struct ForEachExecutor;

#[async_trait]
impl NodeExecutor for ForEachExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: ForEachConfig = parse_config(&node.id, &node.config)?;
        let items = input_array(&input.value, config.items_field.as_deref())?;
        let limit = config
            .max_iterations
            .unwrap_or(ctx.config().default_max_iterations);
        if items.len() > limit {
            return Err(NodeError::IterationLimit { limit });
        }
        // Fail before the first item when the body is missing.
        ctx.nested("body")?;

        tracing::debug!(
            node_id = %ctx.node_path,
            items = items.len(),
            concurrency = config.max_concurrency,
            "for_each started"
        );

        // Cancelling the group abandons every in-flight item once one fails.
        let group = ctx.cancel.child_token();
        let _guard = group.clone().drop_guard();
        let outputs: Vec<Value> = stream::iter(items.iter().cloned().enumerate())
            .map(|(index, item)| {
                let item = if config.with_index {
                    json!({"item": item, "index": index})
                } else {
                    item
                };
                let token = group.child_token();
                async move { ctx.run_sub_graph("body", item, token).await }
            })
            .buffered(config.max_concurrency.max(1))
            .try_collect()
            .await?;

        Ok(NodeRunResult::output(Value::Array(outputs)))
    }
}

#[derive(Debug, Deserialize)]
struct WhileLoopConfig {
    condition: Value,
    #[serde(default)]
    initial: Option<Value>,
    #[serde(default)]
    max_iterations: Option<usize>,
}

/// Feeds the loop value through `body` while `condition` holds.
pub struct WhileLoopExecutor;

#[async_trait]
impl NodeExecutor for WhileLoopExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: WhileLoopConfig = parse_config(&node.id, &node.config)?;
        let condition = Condition::parse(&config.condition)?;
        let limit = config
            .max_iterations
            .unwrap_or(ctx.config().default_max_iterations);
        let mut value = config.initial.unwrap_or(input.value);

        for iteration in 0..limit {
            if ctx.is_cancelled() {
                return Err(NodeError::Cancelled);
            }
            if !condition.evaluate(&value, ctx.templates())? {
                tracing::debug!(node_id = %ctx.node_path, iterations = iteration, "while_loop finished");
                return Ok(NodeRunResult::output(value));
            }
            value = ctx
                .run_sub_graph("body", value, ctx.cancel.child_token())
                .await?;
        }

        if condition.evaluate(&value, ctx.templates())? {
            tracing::warn!(node_id = %ctx.node_path, limit, "while_loop hit its iteration limit");
            return Err(NodeError::IterationLimit { limit });
        }
        Ok(NodeRunResult::output(value))
    }
}
