//! Nodes backed by the run's [`SharedState`](crate::core::SharedState).
//!
//! Every write goes through the node's cancellation token, so an invocation
//! that was cancelled (race lost, timeout, fail-fast) leaves state untouched.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::NodeError;
use crate::graph::Node;
use crate::nodes::executor::{ExecutionContext, NodeExecutor, NodeInput, NodeRunResult};
use crate::nodes::utils::{millis, parse_config};

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum VariableOperation {
    #[default]
    Get,
    Set,
    Delete,
}

#[derive(Debug, Deserialize)]
struct VariableConfig {
    name: String,
    #[serde(default)]
    operation: VariableOperation,
    /// Value to store; the node input when absent.
    #[serde(default)]
    value: Option<Value>,
    /// Returned by `get` when the variable is unset.
    #[serde(default)]
    default: Option<Value>,
}

pub struct VariableExecutor;

#[async_trait]
impl NodeExecutor for VariableExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: VariableConfig = parse_config(&node.id, &node.config)?;
        let output = match config.operation {
            VariableOperation::Get => ctx
                .state
                .variable_get(&config.name)
                .or(config.default)
                .unwrap_or(Value::Null),
            VariableOperation::Set => {
                let value = config.value.unwrap_or(input.value);
                ctx.state
                    .variable_set(&config.name, value.clone(), &ctx.cancel)?;
                value
            }
            VariableOperation::Delete => ctx
                .state
                .variable_delete(&config.name, &ctx.cancel)?
                .unwrap_or(Value::Null),
        };
        Ok(NodeRunResult::output(output))
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum AccumulatorOperation {
    #[default]
    Append,
    Get,
    Reset,
    Len,
}

#[derive(Debug, Deserialize)]
struct AccumulatorConfig {
    name: String,
    #[serde(default)]
    operation: AccumulatorOperation,
    #[serde(default)]
    value: Option<Value>,
}

pub struct AccumulatorExecutor;

#[async_trait]
impl NodeExecutor for AccumulatorExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: AccumulatorConfig = parse_config(&node.id, &node.config)?;
        let output = match config.operation {
            AccumulatorOperation::Append => {
                let value = config.value.unwrap_or(input.value);
                let len = ctx
                    .state
                    .accumulator_append(&config.name, value, &ctx.cancel)?;
                Value::from(len)
            }
            AccumulatorOperation::Get => Value::Array(ctx.state.accumulator_get(&config.name)),
            AccumulatorOperation::Reset => {
                Value::Array(ctx.state.accumulator_reset(&config.name, &ctx.cancel)?)
            }
            AccumulatorOperation::Len => Value::from(ctx.state.accumulator_get(&config.name).len()),
        };
        Ok(NodeRunResult::output(output))
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum CounterOperation {
    #[default]
    Increment,
    Decrement,
    Get,
    Reset,
}

#[derive(Debug, Deserialize)]
struct CounterConfig {
    name: String,
    #[serde(default)]
    operation: CounterOperation,
    #[serde(default = "one")]
    step: i64,
    /// Target of `reset`.
    #[serde(default)]
    value: i64,
}

fn one() -> i64 {
    1
}

pub struct CounterExecutor;

#[async_trait]
impl NodeExecutor for CounterExecutor {
    async fn execute(
        &self,
        node: &Node,
        _input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: CounterConfig = parse_config(&node.id, &node.config)?;
        let state = &ctx.state;
        let n = match config.operation {
            CounterOperation::Increment => state.counter_add(&config.name, config.step, &ctx.cancel)?,
            CounterOperation::Decrement => {
                state.counter_add(&config.name, config.step.saturating_neg(), &ctx.cancel)?
            }
            CounterOperation::Get => state.counter_get(&config.name),
            CounterOperation::Reset => state.counter_reset(&config.name, config.value, &ctx.cancel)?,
        };
        Ok(NodeRunResult::output(Value::from(n)))
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum CacheOperation {
    #[default]
    Get,
    Set,
    Invalidate,
}

#[derive(Debug, Deserialize)]
struct CacheConfig {
    /// Rendered against the input when it contains `{{`.
    key: String,
    #[serde(default)]
    operation: CacheOperation,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    ttl_ms: Option<u64>,
}

/// `get` selects `"hit"` with the cached value or `"miss"` with the input.
pub struct CacheExecutor;

#[async_trait]
impl NodeExecutor for CacheExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: CacheConfig = parse_config(&node.id, &node.config)?;
        let key = if config.key.contains("{{") {
            ctx.templates().render(&config.key, &input.value)?
        } else {
            config.key
        };

        match config.operation {
            CacheOperation::Get => match ctx.state.cache_get(&key) {
                Some(hit) => Ok(NodeRunResult::route(hit, "hit")),
                None => Ok(NodeRunResult::route(input.value, "miss")),
            },
            CacheOperation::Set => {
                let value = config.value.unwrap_or(input.value);
                let ttl = config.ttl_ms.map(millis);
                ctx.state.cache_set(&key, value.clone(), ttl, &ctx.cancel)?;
                Ok(NodeRunResult::output(value))
            }
            CacheOperation::Invalidate => {
                let removed = ctx.state.cache_invalidate(&key, &ctx.cancel)?;
                Ok(NodeRunResult::output(Value::Bool(removed)))
            }
        }
    }
}
