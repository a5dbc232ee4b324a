use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::NodeError;
use crate::evaluator::{lookup_path, Condition};
use crate::graph::{EdgeHandle, Node};
use crate::nodes::executor::{ExecutionContext, NodeExecutor, NodeInput, NodeRunResult};
use crate::nodes::utils::parse_config;

// ================================
// Condition Node
// ================================

/// Evaluates a predicate over its input and selects the `"true"` or
/// `"false"` handle. The input passes through unchanged.
pub struct ConditionExecutor;

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        // `{condition: ">=18", field?}` and `{operator, value, field?}` are
        // both read from the node config itself.
        let spec = match node.config.get("condition") {
            None | Some(Value::String(_)) => &node.config,
            Some(other) => other,
        };
        let condition = Condition::parse(spec)?;
        let matched = condition.evaluate(&input.value, ctx.templates())?;
        tracing::debug!(node_id = %ctx.node_path, matched, "condition evaluated");
        let handle = if matched { "true" } else { "false" };
        Ok(NodeRunResult::branch(input.value, handle))
    }
}

// ================================
// Switch Node
// ================================

#[derive(Debug, Deserialize)]
struct SwitchCase {
    #[serde(alias = "condition")]
    when: Value,
    handle: String,
}

#[derive(Debug, Deserialize)]
struct SwitchConfig {
    #[serde(default)]
    cases: Vec<SwitchCase>,
    #[serde(default, alias = "defaultPath")]
    default_path: Option<String>,
    /// Dotted path of the value the cases are matched against.
    #[serde(default)]
    field: Option<String>,
}

/// First matching case wins; declaration order breaks ties.
pub struct SwitchExecutor;

#[async_trait]
impl NodeExecutor for SwitchExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: SwitchConfig = parse_config(&node.id, &node.config)?;
        if config.cases.is_empty() && config.default_path.is_none() {
            return Err(NodeError::ConfigError(format!(
                "switch '{}' has no cases and no default_path",
                node.id
            )));
        }

        let subject = match config.field.as_deref() {
            Some(path) => lookup_path(&input.value, path)
                .ok_or_else(|| NodeError::MissingField(path.to_string()))?,
            None => &input.value,
        };

        for case in &config.cases {
            let condition = Condition::parse(&case.when)?;
            if condition.evaluate(subject, ctx.templates())? {
                tracing::debug!(node_id = %ctx.node_path, handle = %case.handle, "switch matched");
                return Ok(NodeRunResult::branch(input.value, case.handle.clone()));
            }
        }

        let handle = match config.default_path {
            Some(default) => EdgeHandle::Branch(default),
            None => EdgeHandle::Unmatched,
        };
        Ok(NodeRunResult::with_handle(input.value, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeType;
    use crate::nodes::test_support::run_node;
    use serde_json::json;

    #[tokio::test]
    async fn test_condition_compact_forms() {
        let adult = run_node(NodeType::Condition, json!({"condition": ">=18"}), json!(25))
            .await
            .unwrap();
        assert_eq!(adult.handle, EdgeHandle::branch("true"));
        assert_eq!(adult.output, json!(25));

        let minor = run_node(NodeType::Condition, json!({"condition": ">=18"}), json!(12))
            .await
            .unwrap();
        assert_eq!(minor.handle, EdgeHandle::branch("false"));

        let named = run_node(
            NodeType::Condition,
            json!({"condition": "== 'adult'", "field": "group"}),
            json!({"group": "adult"}),
        )
        .await
        .unwrap();
        assert_eq!(named.handle, EdgeHandle::branch("true"));
    }

    #[tokio::test]
    async fn test_condition_object_and_expression() {
        let r = run_node(
            NodeType::Condition,
            json!({"operator": "less_than", "value_from": "limit", "field": "n"}),
            json!({"n": 3, "limit": 5}),
        )
        .await
        .unwrap();
        assert_eq!(r.handle, EdgeHandle::branch("true"));

        let r = run_node(
            NodeType::Condition,
            json!({"condition": {"expression": "age > 65"}}),
            json!({"age": 40}),
        )
        .await
        .unwrap();
        assert_eq!(r.handle, EdgeHandle::branch("false"));
    }

    #[tokio::test]
    async fn test_condition_without_predicate_is_config_error() {
        let err = run_node(NodeType::Condition, json!({}), json!(1)).await.unwrap_err();
        assert!(matches!(err, NodeError::ConfigError(_)));
    }

    fn status_switch() -> Value {
        json!({
            "cases": [
                {"when": "==200", "handle": "success"},
                {"when": "==404", "handle": "not_found"},
                {"when": ">=500", "handle": "error"},
            ],
            "default_path": "other",
        })
    }

    #[tokio::test]
    async fn test_switch_first_match_and_default() {
        let r = run_node(NodeType::Switch, status_switch(), json!(404)).await.unwrap();
        assert_eq!(r.handle, EdgeHandle::branch("not_found"));
        let r = run_node(NodeType::Switch, status_switch(), json!(503)).await.unwrap();
        assert_eq!(r.handle, EdgeHandle::branch("error"));
        let r = run_node(NodeType::Switch, status_switch(), json!(201)).await.unwrap();
        assert_eq!(r.handle, EdgeHandle::branch("other"));
        assert_eq!(r.output, json!(201));
    }

    #[tokio::test]
    async fn test_switch_declaration_order_breaks_ties() {
        let config = json!({
            "cases": [
                {"when": ">0", "handle": "first"},
                {"when": ">10", "handle": "second"},
            ]
        });
        let r = run_node(NodeType::Switch, config, json!(50)).await.unwrap();
        assert_eq!(r.handle, EdgeHandle::branch("first"));
    }

    #[tokio::test]
    async fn test_switch_unmatched_and_empty() {
        let config = json!({"cases": [{"when": "==1", "handle": "one"}]});
        let r = run_node(NodeType::Switch, config, json!(2)).await.unwrap();
        assert_eq!(r.handle, EdgeHandle::Unmatched);

        let err = run_node(NodeType::Switch, json!({"cases": []}), json!(2)).await.unwrap_err();
        assert!(matches!(err, NodeError::ConfigError(_)));
    }
}
