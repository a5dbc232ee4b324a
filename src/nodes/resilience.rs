//! Retry, TryCatch, Timeout and Delay.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::NodeError;
use crate::graph::Node;
use crate::nodes::executor::{ExecutionContext, NodeExecutor, NodeInput, NodeRunResult};
use crate::nodes::utils::{millis, parse_config};

/// Sleep that ends early with `Cancelled` when `token` fires.
async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> Result<(), NodeError> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(NodeError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

// ================================
// Retry Node
// ================================

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_strategy: BackoffStrategy,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_strategy: BackoffStrategy::Fixed,
            initial_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Wait before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64;
        let ms = match self.backoff_strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => {
                let exp = attempt.saturating_sub(1).min(63) as i32;
                base * self.multiplier.max(1.0).powi(exp)
            }
        };
        let capped = if ms.is_finite() {
            ms.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        millis(capped.max(0.0) as u64)
    }
}

/// Re-runs `body` until it succeeds, a non-retryable error occurs, or
/// `max_attempts` is spent.
pub struct RetryExecutor;

#[async_trait]
impl NodeExecutor for RetryExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let policy: RetryPolicy = parse_config(&node.id, &node.config)?;
        let max_attempts = policy.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            let result = ctx
                .run_sub_graph("body", input.value.clone(), ctx.cancel.child_token())
                .await;
            let error = match result {
                Ok(output) => return Ok(NodeRunResult::output(output)),
                Err(e) => e,
            };
            if !error.error_context().is_retryable() || ctx.is_cancelled() {
                return Err(error);
            }
            if attempt >= max_attempts {
                tracing::warn!(node_id = %ctx.node_path, attempts = attempt, error = %error, "retries exhausted");
                return Err(error);
            }
            let delay = policy.delay_after(attempt);
            tracing::debug!(
                node_id = %ctx.node_path,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying"
            );
            sleep_or_cancel(delay, &ctx.cancel).await?;
            attempt += 1;
        }
    }
}

// ================================
// TryCatch Node
// ================================

#[derive(Debug, Deserialize)]
struct TryCatchConfig {
    #[serde(default)]
    fallback: Option<Value>,
    #[serde(default = "default_true")]
    continue_on_error: bool,
}

fn default_true() -> bool {
    true
}

/// Selects `"success"` with the body output, or `"error"` with the catch
/// output, the fallback, or an error sentinel.
pub struct TryCatchExecutor;

#[async_trait]
impl NodeExecutor for TryCatchExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: TryCatchConfig = parse_config(&node.id, &node.config)?;
        let error = match ctx
            .run_sub_graph("body", input.value.clone(), ctx.cancel.child_token())
            .await
        {
            Ok(output) => return Ok(NodeRunResult::route(output, "success")),
            Err(NodeError::Cancelled) => return Err(NodeError::Cancelled),
            Err(e) => e,
        };
        tracing::debug!(node_id = %ctx.node_path, error = %error, "try_catch caught");

        let mut report = error.to_structured_json();
        if ctx.definition.nested(&node.id, "catch").is_some() {
            if let Value::Object(map) = &mut report {
                map.insert("input".to_string(), input.value);
            }
            let output = ctx
                .run_sub_graph("catch", report, ctx.cancel.child_token())
                .await?;
            return Ok(NodeRunResult::route(output, "error"));
        }
        if let Some(fallback) = config.fallback {
            return Ok(NodeRunResult::route(fallback, "error"));
        }
        if config.continue_on_error {
            return Ok(NodeRunResult::route(report, "error"));
        }
        Err(error)
    }
}

// ================================
// Timeout Node
// ================================

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum TimeoutAction {
    #[default]
    Error,
    Fallback,
}

#[derive(Debug, Deserialize)]
struct TimeoutConfig {
    duration_ms: u64,
    #[serde(default)]
    timeout_action: TimeoutAction,
    #[serde(default)]
    fallback: Option<Value>,
}

/// Bounds the body's wall clock. On expiry the body is cancelled and its
/// tasks are dropped.
pub struct TimeoutExecutor;

#[async_trait]
impl NodeExecutor for TimeoutExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: TimeoutConfig = parse_config(&node.id, &node.config)?;
        let token = ctx.cancel.child_token();
        let body = ctx.run_sub_graph("body", input.value, token.clone());

        match tokio::time::timeout(millis(config.duration_ms), body).await {
            Ok(result) => result.map(NodeRunResult::output),
            Err(_) => {
                token.cancel();
                tracing::warn!(node_id = %ctx.node_path, limit_ms = config.duration_ms, "body timed out");
                match config.timeout_action {
                    TimeoutAction::Error => Err(NodeError::Timeout(format!(
                        "body of '{}' exceeded {} ms",
                        node.id, config.duration_ms
                    ))),
                    TimeoutAction::Fallback => Ok(NodeRunResult::output(
                        config.fallback.unwrap_or(Value::Null),
                    )),
                }
            }
        }
    }
}

// ================================
// Delay Node
// ================================

#[derive(Debug, Deserialize)]
struct DelayConfig {
    #[serde(default)]
    duration_ms: u64,
}

pub struct DelayExecutor;

#[async_trait]
impl NodeExecutor for DelayExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: DelayConfig = parse_config(&node.id, &node.config)?;
        sleep_or_cancel(millis(config.duration_ms), &ctx.cancel).await?;
        Ok(NodeRunResult::output(input.value))
    }
}
