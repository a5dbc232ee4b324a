//! Pure value and transform nodes.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::NodeError;
use crate::evaluator::type_coercion::type_name;
use crate::evaluator::{compare_values, lookup_path, number_value, to_string, Condition};
use crate::graph::Node;

use super::executor::{ExecutionContext, NodeExecutor, NodeInput, NodeRunResult};
use super::utils::{input_array, parse_config};

fn numeric(value: &Value) -> Result<f64, NodeError> {
    crate::evaluator::type_coercion::as_number(value).ok_or_else(|| {
        NodeError::TypeError(format!("expected a number, got {}", type_name(value)))
    })
}

fn integral(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text(value: &Value) -> Result<&str, NodeError> {
    value
        .as_str()
        .ok_or_else(|| NodeError::TypeError(format!("expected a string, got {}", type_name(value))))
}

fn select<'a>(input: &'a Value, field: Option<&str>) -> Result<&'a Value, NodeError> {
    match field {
        Some(path) => lookup_path(input, path).ok_or_else(|| NodeError::MissingField(path.to_string())),
        None => Ok(input),
    }
}

// ---------------------------------------------------------------------------
// Number / TextInput
// ---------------------------------------------------------------------------

pub struct NumberExecutor;

#[async_trait]
impl NodeExecutor for NumberExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        _ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let source = node.config.get("value").unwrap_or(&input.value);
        let value = match source {
            Value::Number(_) => source.clone(),
            Value::String(s) => s
                .trim()
                .parse::<serde_json::Number>()
                .map(Value::Number)
                .map_err(|_| NodeError::ParseError(format!("'{}' is not a number", s)))?,
            other => {
                return Err(NodeError::TypeError(format!(
                    "number node needs a numeric value, got {}",
                    type_name(other)
                )))
            }
        };
        Ok(NodeRunResult::output(value))
    }
}

#[derive(Debug, Deserialize)]
struct TextInputConfig {
    #[serde(default)]
    value: Option<String>,
    /// Dotted path into the input.
    #[serde(default)]
    key: Option<String>,
}

pub struct TextInputExecutor;

#[async_trait]
impl NodeExecutor for TextInputExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: TextInputConfig = parse_config(&node.id, &node.config)?;
        if let Some(key) = config.key.as_deref() {
            return Ok(NodeRunResult::output(select(&input.value, Some(key))?.clone()));
        }
        let value = match config.value {
            Some(v) if v.contains("{{") => ctx.templates().render(&v, &input.value)?,
            Some(v) => v,
            None => to_string(&input.value),
        };
        Ok(NodeRunResult::output(Value::String(value)))
    }
}

// ---------------------------------------------------------------------------
// Math
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MathOperation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Min,
    Max,
    Abs,
    Negate,
    Round,
}

impl MathOperation {
    fn is_unary(&self) -> bool {
        matches!(
            self,
            MathOperation::Abs | MathOperation::Negate | MathOperation::Round
        )
    }
}

#[derive(Debug, Deserialize)]
struct MathConfig {
    operation: MathOperation,
    #[serde(default)]
    operand: Option<Value>,
    /// Path into the input holding the right-hand operand.
    #[serde(default)]
    operand_from: Option<String>,
    /// Path into the input holding the left-hand operand.
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    precision: u32,
}

pub struct MathExecutor;

#[async_trait]
impl NodeExecutor for MathExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        _ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: MathConfig = parse_config(&node.id, &node.config)?;
        let left = select(&input.value, config.field.as_deref())?;

        if config.operation.is_unary() {
            return Ok(NodeRunResult::output(unary(config.operation, left, config.precision)?));
        }

        let (lhs, rhs) = match (&config.operand, &config.operand_from) {
            (_, Some(path)) => (left, select(&input.value, Some(path))?),
            (Some(operand), None) => (left, operand),
            // `[a, b]` input without an operand
            (None, None) => match left.as_array().map(Vec::as_slice) {
                Some([a, b]) => (a, b),
                _ => {
                    return Err(NodeError::ConfigError(format!(
                        "math '{:?}' needs an operand",
                        config.operation
                    )))
                }
            },
        };
        Ok(NodeRunResult::output(binary(config.operation, lhs, rhs)?))
    }
}

fn unary(op: MathOperation, value: &Value, precision: u32) -> Result<Value, NodeError> {
    if let Some(i) = integral(value).filter(|_| value.is_number()) {
        match op {
            MathOperation::Abs => return Ok(i.checked_abs().map(Value::from).unwrap_or_else(|| number_value((i as f64).abs()))),
            MathOperation::Negate => return Ok(i.checked_neg().map(Value::from).unwrap_or_else(|| number_value(-(i as f64)))),
            MathOperation::Round => return Ok(Value::from(i)),
            _ => {}
        }
    }
    let x = numeric(value)?;
    let result = match op {
        MathOperation::Abs => x.abs(),
        MathOperation::Negate => -x,
        MathOperation::Round => {
            let factor = 10f64.powi(precision.min(15) as i32);
            (x * factor).round() / factor
        }
        _ => unreachable!("binary operation in unary path"),
    };
    Ok(number_value(result))
}

/// Integer operands stay integral unless the result overflows.
pub fn binary(op: MathOperation, lhs: &Value, rhs: &Value) -> Result<Value, NodeError> {
    let x = numeric(lhs)?;
    let y = numeric(rhs)?;

    if let (Some(a), Some(b)) = (integral(lhs), integral(rhs)) {
        let exact = match op {
            MathOperation::Add => a.checked_add(b),
            MathOperation::Subtract => a.checked_sub(b),
            MathOperation::Multiply => a.checked_mul(b),
            MathOperation::Modulo => {
                if b == 0 {
                    return Err(NodeError::DivisionByZero);
                }
                a.checked_rem(b)
            }
            MathOperation::Power => u32::try_from(b).ok().and_then(|e| a.checked_pow(e)),
            MathOperation::Min => Some(a.min(b)),
            MathOperation::Max => Some(a.max(b)),
            _ => None,
        };
        if let Some(v) = exact {
            return Ok(Value::from(v));
        }
    }

    let result = match op {
        MathOperation::Add => x + y,
        MathOperation::Subtract => x - y,
        MathOperation::Multiply => x * y,
        MathOperation::Divide => {
            if y == 0.0 {
                return Err(NodeError::DivisionByZero);
            }
            x / y
        }
        MathOperation::Modulo => {
            if y == 0.0 {
                return Err(NodeError::DivisionByZero);
            }
            x % y
        }
        MathOperation::Power => x.powf(y),
        MathOperation::Min => x.min(y),
        MathOperation::Max => x.max(y),
        MathOperation::Abs | MathOperation::Negate | MathOperation::Round => {
            return unary(op, lhs, 0)
        }
    };
    if !result.is_finite() {
        return Err(NodeError::ExecutionError(format!(
            "{:?} produced a non-finite result",
            op
        )));
    }
    Ok(number_value(result))
}

// ---------------------------------------------------------------------------
// TextOp
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TextOperation {
    Upper,
    Lower,
    Trim,
    Length,
    Concat,
    Replace,
    Split,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Deserialize)]
struct TextOpConfig {
    operation: TextOperation,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    replacement: Option<String>,
    #[serde(default)]
    separator: Option<String>,
    #[serde(default)]
    field: Option<String>,
}

pub struct TextOpExecutor;

#[async_trait]
impl NodeExecutor for TextOpExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        _ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: TextOpConfig = parse_config(&node.id, &node.config)?;
        let subject = select(&input.value, config.field.as_deref())?;
        let needs = |name: &str, v: &Option<String>| -> Result<String, NodeError> {
            v.clone().ok_or_else(|| {
                NodeError::ConfigError(format!("text_op '{}' needs '{}'", node.id, name))
            })
        };

        if let TextOperation::Concat = config.operation {
            let separator = config.separator.clone().unwrap_or_default();
            let joined = match subject {
                Value::Array(items) => items.iter().map(to_string).collect::<Vec<_>>().join(&separator),
                other => format!(
                    "{}{}{}",
                    to_string(other),
                    separator,
                    config.value.clone().unwrap_or_default()
                ),
            };
            return Ok(NodeRunResult::output(Value::String(joined)));
        }

        let s = text(subject)?;
        let out = match config.operation {
            TextOperation::Upper => Value::String(s.to_uppercase()),
            TextOperation::Lower => Value::String(s.to_lowercase()),
            TextOperation::Trim => Value::String(s.trim().to_string()),
            TextOperation::Length => Value::from(s.chars().count()),
            TextOperation::Replace => {
                let pattern = needs("pattern", &config.pattern)?;
                let replacement = config.replacement.clone().unwrap_or_default();
                Value::String(s.replace(&pattern, &replacement))
            }
            TextOperation::Split => {
                let separator = config.separator.clone().unwrap_or_else(|| ",".to_string());
                Value::Array(s.split(separator.as_str()).map(|p| Value::String(p.to_string())).collect())
            }
            TextOperation::Contains => Value::Bool(s.contains(needs("value", &config.value)?.as_str())),
            TextOperation::StartsWith => {
                Value::Bool(s.starts_with(needs("value", &config.value)?.as_str()))
            }
            TextOperation::EndsWith => Value::Bool(s.ends_with(needs("value", &config.value)?.as_str())),
            TextOperation::Concat => unreachable!("handled above"),
        };
        Ok(NodeRunResult::output(out))
    }
}

// ---------------------------------------------------------------------------
// Extract / Transform / Parse / Expression
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ExtractConfig {
    path: String,
    #[serde(default)]
    default: Option<Value>,
}

pub struct ExtractExecutor;

#[async_trait]
impl NodeExecutor for ExtractExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        _ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: ExtractConfig = parse_config(&node.id, &node.config)?;
        match lookup_path(&input.value, &config.path) {
            Some(v) => Ok(NodeRunResult::output(v.clone())),
            None => config
                .default
                .map(NodeRunResult::output)
                .ok_or(NodeError::MissingField(config.path)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TransformConfig {
    template: String,
    /// Parse the rendered text as JSON.
    #[serde(default)]
    json: bool,
}

pub struct TransformExecutor;

#[async_trait]
impl NodeExecutor for TransformExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: TransformConfig = parse_config(&node.id, &node.config)?;
        let rendered = ctx.templates().render(&config.template, &input.value)?;
        if config.json {
            let parsed = serde_json::from_str(&rendered)
                .map_err(|e| NodeError::ParseError(format!("rendered template is not JSON: {}", e)))?;
            return Ok(NodeRunResult::output(parsed));
        }
        Ok(NodeRunResult::output(Value::String(rendered)))
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum ParseFormat {
    #[default]
    Json,
    Number,
    Integer,
    Boolean,
}

#[derive(Debug, Deserialize)]
struct ParseConfig {
    #[serde(default)]
    format: ParseFormat,
    #[serde(default)]
    field: Option<String>,
}

pub struct ParseExecutor;

#[async_trait]
impl NodeExecutor for ParseExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        _ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: ParseConfig = parse_config(&node.id, &node.config)?;
        let raw = text(select(&input.value, config.field.as_deref())?)?;
        let trimmed = raw.trim();
        let malformed = |what: &str| NodeError::ParseError(format!("'{}' is not a valid {}", raw, what));
        let value = match config.format {
            ParseFormat::Json => {
                serde_json::from_str(trimmed).map_err(|e| NodeError::ParseError(e.to_string()))?
            }
            ParseFormat::Number => trimmed
                .parse::<serde_json::Number>()
                .map(Value::Number)
                .map_err(|_| malformed("number"))?,
            ParseFormat::Integer => Value::from(trimmed.parse::<i64>().map_err(|_| malformed("integer"))?),
            ParseFormat::Boolean => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Value::Bool(true),
                "false" | "no" | "0" => Value::Bool(false),
                _ => return Err(malformed("boolean")),
            },
        };
        Ok(NodeRunResult::output(value))
    }
}

#[derive(Debug, Deserialize)]
struct ExpressionConfig {
    expression: String,
}

pub struct ExpressionExecutor;

#[async_trait]
impl NodeExecutor for ExpressionExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: ExpressionConfig = parse_config(&node.id, &node.config)?;
        let value = ctx.templates().eval(&config.expression, &input.value)?;
        Ok(NodeRunResult::output(value))
    }
}

// ---------------------------------------------------------------------------
// Collections: Map / Reduce / Filter / Sort / Slice
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MapConfig {
    #[serde(default)]
    expression: Option<String>,
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    items_field: Option<String>,
}

pub struct MapExecutor;

#[async_trait]
impl NodeExecutor for MapExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: MapConfig = parse_config(&node.id, &node.config)?;
        let items = input_array(&input.value, config.items_field.as_deref())?;
        let mapped = match (&config.expression, &config.field) {
            (Some(expr), _) => items
                .iter()
                .map(|item| ctx.templates().eval(expr, item))
                .collect::<Result<Vec<_>, _>>()?,
            (None, Some(field)) => items
                .iter()
                .map(|item| select(item, Some(field)).cloned())
                .collect::<Result<Vec<_>, _>>()?,
            (None, None) => {
                return Err(NodeError::ConfigError(format!(
                    "map '{}' needs an 'expression' or a 'field'",
                    node.id
                )))
            }
        };
        Ok(NodeRunResult::output(Value::Array(mapped)))
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ReduceOperation {
    Sum,
    Product,
    Min,
    Max,
    Count,
    Avg,
    Concat,
}

#[derive(Debug, Deserialize)]
struct ReduceConfig {
    operation: ReduceOperation,
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    items_field: Option<String>,
    #[serde(default)]
    separator: Option<String>,
}

pub struct ReduceExecutor;

#[async_trait]
impl NodeExecutor for ReduceExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        _ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: ReduceConfig = parse_config(&node.id, &node.config)?;
        let items = input_array(&input.value, config.items_field.as_deref())?;
        let values = items
            .iter()
            .map(|item| select(item, config.field.as_deref()))
            .collect::<Result<Vec<_>, _>>()?;

        let out = match config.operation {
            ReduceOperation::Count => Value::from(values.len()),
            ReduceOperation::Sum => fold(&values, Value::from(0), MathOperation::Add)?,
            ReduceOperation::Product => fold(&values, Value::from(1), MathOperation::Multiply)?,
            ReduceOperation::Min | ReduceOperation::Max => {
                let op = if matches!(config.operation, ReduceOperation::Min) {
                    MathOperation::Min
                } else {
                    MathOperation::Max
                };
                match values.split_first() {
                    Some((first, rest)) => {
                        let mut acc = Value::from(numeric(first)?);
                        acc = if let Some(i) = integral(first) { Value::from(i) } else { acc };
                        for v in rest {
                            acc = binary(op, &acc, v)?;
                        }
                        acc
                    }
                    None => Value::Null,
                }
            }
            ReduceOperation::Avg => {
                if values.is_empty() {
                    Value::Null
                } else {
                    let mut total = 0.0;
                    for v in &values {
                        total += numeric(v)?;
                    }
                    number_value(total / values.len() as f64)
                }
            }
            ReduceOperation::Concat => {
                if values.iter().all(|v| v.is_array()) {
                    Value::Array(
                        values
                            .iter()
                            .filter_map(|v| v.as_array())
                            .flatten()
                            .cloned()
                            .collect(),
                    )
                } else {
                    let separator = config.separator.unwrap_or_default();
                    Value::String(values.iter().map(|v| to_string(v)).collect::<Vec<_>>().join(&separator))
                }
            }
        };
        Ok(NodeRunResult::output(out))
    }
}

fn fold(values: &[&Value], init: Value, op: MathOperation) -> Result<Value, NodeError> {
    values.iter().try_fold(init, |acc, v| binary(op, &acc, v))
}

#[derive(Debug, Deserialize)]
struct FilterConfig {
    condition: Value,
    #[serde(default)]
    items_field: Option<String>,
}

pub struct FilterExecutor;

#[async_trait]
impl NodeExecutor for FilterExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: FilterConfig = parse_config(&node.id, &node.config)?;
        let condition = Condition::parse(&config.condition)?;
        let items = input_array(&input.value, config.items_field.as_deref())?;
        let mut kept = Vec::new();
        for item in items {
            if condition.evaluate(item, ctx.templates())? {
                kept.push(item.clone());
            }
        }
        Ok(NodeRunResult::output(Value::Array(kept)))
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Deserialize)]
struct SortConfig {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    order: SortOrder,
    #[serde(default)]
    items_field: Option<String>,
}

pub struct SortExecutor;

#[async_trait]
impl NodeExecutor for SortExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        _ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: SortConfig = parse_config(&node.id, &node.config)?;
        let mut items = input_array(&input.value, config.items_field.as_deref())?.clone();
        let key = |v: &Value| -> Value {
            match config.field.as_deref() {
                Some(path) => lookup_path(v, path).cloned().unwrap_or(Value::Null),
                None => v.clone(),
            }
        };
        items.sort_by(|a, b| {
            let ord = compare_values(&key(a), &key(b)).unwrap_or(Ordering::Equal);
            if config.order == SortOrder::Desc {
                ord.reverse()
            } else {
                ord
            }
        });
        Ok(NodeRunResult::output(Value::Array(items)))
    }
}

#[derive(Debug, Deserialize)]
struct SliceConfig {
    #[serde(default)]
    start: Option<i64>,
    #[serde(default)]
    end: Option<i64>,
    #[serde(default)]
    items_field: Option<String>,
}

/// Resolve Python-style bounds against `len`.
fn slice_bounds(len: usize, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
    let resolve = |i: i64| -> usize {
        if i < 0 {
            len.saturating_sub(i.unsigned_abs() as usize)
        } else {
            (i as usize).min(len)
        }
    };
    let s = start.map(resolve).unwrap_or(0);
    let e = end.map(resolve).unwrap_or(len);
    (s, e.max(s))
}

pub struct SliceExecutor;

#[async_trait]
impl NodeExecutor for SliceExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        _ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: SliceConfig = parse_config(&node.id, &node.config)?;
        let target = select(&input.value, config.items_field.as_deref())?;
        let out = match target {
            Value::String(s) => {
                let chars: Vec<char> = s.chars().collect();
                let (a, b) = slice_bounds(chars.len(), config.start, config.end);
                Value::String(chars[a..b].iter().collect())
            }
            Value::Array(items) => {
                let (a, b) = slice_bounds(items.len(), config.start, config.end);
                Value::Array(items[a..b].to_vec())
            }
            other => {
                return Err(NodeError::TypeError(format!(
                    "slice needs an array or string, got {}",
                    type_name(other)
                )))
            }
        };
        Ok(NodeRunResult::output(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::{ctx_for, run_node};
    use crate::graph::NodeType;
    use serde_json::json;

    async fn run(node_type: NodeType, config: Value, input: Value) -> Result<Value, NodeError> {
        run_node(node_type, config, input).await.map(|r| r.output)
    }

    #[tokio::test]
    async fn test_number_and_text_input() {
        assert_eq!(run(NodeType::Number, json!({"value": 25}), json!(null)).await.unwrap(), json!(25));
        assert_eq!(run(NodeType::Number, json!({"value": "1.5"}), json!(null)).await.unwrap(), json!(1.5));
        assert_eq!(
            run(NodeType::TextInput, json!({"value": "hi {{ name }}"}), json!({"name": "bo"})).await.unwrap(),
            json!("hi bo")
        );
        assert!(matches!(
            run(NodeType::TextInput, json!({"key": "missing"}), json!({})).await,
            Err(NodeError::MissingField(_))
        ));
    }

    #[tokio::test]
    async fn test_math_operations() {
        let cases = [
            (json!({"operation": "add", "operand": 3}), json!(4), json!(7)),
            (json!({"operation": "subtract", "operand": 10}), json!(4), json!(-6)),
            (json!({"operation": "divide", "operand": 4}), json!(10), json!(2.5)),
            (json!({"operation": "divide", "operand": 2}), json!(10), json!(5)),
            (json!({"operation": "modulo", "operand": 3}), json!(10), json!(1)),
            (json!({"operation": "power", "operand": 10}), json!(2), json!(1024)),
            (json!({"operation": "max"}), json!([3, 9]), json!(9)),
            (json!({"operation": "abs"}), json!(-4), json!(4)),
            (json!({"operation": "negate"}), json!(2.5), json!(-2.5)),
            (json!({"operation": "round", "precision": 1}), json!(2.46), json!(2.5)),
            (json!({"operation": "add", "field": "a", "operand_from": "b"}), json!({"a": 1, "b": 2}), json!(3)),
        ];
        for (config, input, expected) in cases {
            assert_eq!(run(NodeType::Math, config.clone(), input).await.unwrap(), expected, "{}", config);
        }
    }

    #[tokio::test]
    async fn test_division_by_zero_is_typed() {
        for op in ["divide", "modulo"] {
            let err = run(NodeType::Math, json!({"operation": op, "operand": 0}), json!(5))
                .await
                .unwrap_err();
            assert!(matches!(err, NodeError::DivisionByZero));
        }
        let err = run(NodeType::Math, json!({"operation": "add", "operand": 1}), json!("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::TypeError(_)));
    }

    #[tokio::test]
    async fn test_text_ops() {
        let s = json!("  Hello World ");
        assert_eq!(run(NodeType::TextOp, json!({"operation": "trim"}), s.clone()).await.unwrap(), json!("Hello World"));
        assert_eq!(run(NodeType::TextOp, json!({"operation": "length"}), s.clone()).await.unwrap(), json!(14));
        assert_eq!(
            run(NodeType::TextOp, json!({"operation": "split", "separator": " "}), json!("a b")).await.unwrap(),
            json!(["a", "b"])
        );
        assert_eq!(
            run(NodeType::TextOp, json!({"operation": "concat", "separator": "-"}), json!(["a", 1])).await.unwrap(),
            json!("a-1")
        );
        assert_eq!(
            run(NodeType::TextOp, json!({"operation": "replace", "pattern": "o", "replacement": "0"}), json!("foo")).await.unwrap(),
            json!("f00")
        );
        assert_eq!(
            run(NodeType::TextOp, json!({"operation": "starts_with", "value": "fo"}), json!("foo")).await.unwrap(),
            json!(true)
        );
    }

    #[tokio::test]
    async fn test_extract_missing_field() {
        let input = json!({"user": {"name": "ada"}});
        assert_eq!(run(NodeType::Extract, json!({"path": "user.name"}), input.clone()).await.unwrap(), json!("ada"));
        let err = run(NodeType::Extract, json!({"path": "user.age"}), input.clone()).await.unwrap_err();
        assert!(matches!(err, NodeError::MissingField(ref p) if p == "user.age"));
        assert_eq!(
            run(NodeType::Extract, json!({"path": "user.age", "default": 0}), input).await.unwrap(),
            json!(0)
        );
    }

    #[tokio::test]
    async fn test_parse_formats() {
        assert_eq!(run(NodeType::Parse, json!({}), json!("{\"a\": [1]}")).await.unwrap(), json!({"a": [1]}));
        assert_eq!(run(NodeType::Parse, json!({"format": "integer"}), json!(" 42 ")).await.unwrap(), json!(42));
        assert_eq!(run(NodeType::Parse, json!({"format": "boolean"}), json!("yes")).await.unwrap(), json!(true));
        for (format, bad) in [("json", "{oops"), ("number", "abc"), ("integer", "1.5"), ("boolean", "maybe")] {
            let err = run(NodeType::Parse, json!({"format": format}), json!(bad)).await.unwrap_err();
            assert!(matches!(err, NodeError::ParseError(_)), "{}", format);
        }
    }

    #[tokio::test]
    async fn test_parse_keeps_big_integers() {
        let out = run(NodeType::Parse, json!({}), json!("{\"id\": 123456789012345678901234567890}"))
            .await
            .unwrap();
        assert_eq!(out["id"].to_string(), "123456789012345678901234567890");
    }

    #[tokio::test]
    async fn test_transform_and_expression() {
        assert_eq!(
            run(NodeType::Transform, json!({"template": "{{ a }}-{{ b }}"}), json!({"a": 1, "b": 2})).await.unwrap(),
            json!("1-2")
        );
        assert_eq!(
            run(NodeType::Transform, json!({"template": "[{{ a }}]", "json": true}), json!({"a": 1})).await.unwrap(),
            json!([1])
        );
        assert_eq!(
            run(NodeType::Expression, json!({"expression": "a * 2 + 1"}), json!({"a": 4})).await.unwrap(),
            json!(9)
        );
    }

    #[tokio::test]
    async fn test_collections() {
        let people = json!([{"name": "c", "age": 30}, {"name": "a", "age": 12}, {"name": "b", "age": 20}]);
        assert_eq!(
            run(NodeType::Map, json!({"field": "name"}), people.clone()).await.unwrap(),
            json!(["c", "a", "b"])
        );
        assert_eq!(
            run(NodeType::Map, json!({"expression": "age + 1"}), people.clone()).await.unwrap(),
            json!([31, 13, 21])
        );
        assert_eq!(
            run(NodeType::Filter, json!({"condition": {"field": "age", "operator": ">=", "value": 18}}), people.clone())
                .await
                .unwrap(),
            json!([{"name": "c", "age": 30}, {"name": "b", "age": 20}])
        );
        assert_eq!(
            run(NodeType::Sort, json!({"field": "age", "order": "desc"}), people.clone()).await.unwrap()[0]["name"],
            json!("c")
        );
        assert_eq!(run(NodeType::Reduce, json!({"operation": "sum", "field": "age"}), people.clone()).await.unwrap(), json!(62));
        assert_eq!(run(NodeType::Reduce, json!({"operation": "max", "field": "age"}), people.clone()).await.unwrap(), json!(30));
        assert_eq!(run(NodeType::Reduce, json!({"operation": "count"}), people.clone()).await.unwrap(), json!(3));
        assert_eq!(run(NodeType::Reduce, json!({"operation": "avg"}), json!([1, 2])).await.unwrap(), json!(1.5));
        assert_eq!(run(NodeType::Reduce, json!({"operation": "min"}), json!([])).await.unwrap(), Value::Null);
        assert_eq!(run(NodeType::Reduce, json!({"operation": "concat"}), json!([[1], [2, 3]])).await.unwrap(), json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_slice_negative_indexes() {
        let items = json!([1, 2, 3, 4, 5]);
        assert_eq!(run(NodeType::Slice, json!({"start": -2}), items.clone()).await.unwrap(), json!([4, 5]));
        assert_eq!(run(NodeType::Slice, json!({"start": 1, "end": -1}), items.clone()).await.unwrap(), json!([2, 3, 4]));
        assert_eq!(run(NodeType::Slice, json!({"start": 4, "end": 2}), items).await.unwrap(), json!([]));
        assert_eq!(run(NodeType::Slice, json!({"end": 3}), json!("héllo")).await.unwrap(), json!("hél"));
    }

    #[test]
    fn test_ctx_helper_builds() {
        let ctx = ctx_for(Node::new("n", NodeType::Math, json!({})));
        assert_eq!(ctx.node_id, "n");
    }
}
