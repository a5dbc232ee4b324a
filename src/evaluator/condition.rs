use serde_json::Value;

use crate::error::NodeError;
use crate::template::TemplateEngine;

use super::operators::ComparisonOperator;
use super::type_coercion::lookup_path;

/// Where the right-hand side of a comparison comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    /// Dotted path into the node input.
    FromPath(String),
}

/// A parsed predicate over a node input.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        /// Dotted path selecting the left-hand side; `None` = the whole input.
        field: Option<String>,
        operator: ComparisonOperator,
        operand: Operand,
    },
    /// A minijinja expression evaluated for truthiness, against `field`
    /// when one is given.
    Expression {
        field: Option<String>,
        expr: String,
    },
    Constant(bool),
}

impl Condition {
    /// Parse a condition from its config value.
    ///
    /// Accepted forms:
    /// * compact string: `">=18"`, `"== 'adult'"`, `"!=3"`;
    /// * any other string: a template expression (`"input.age >= 18"`);
    /// * `true` / `false`;
    /// * object: `{field?, operator, value | value_from}` or `{field?, expression}`.
    pub fn parse(spec: &Value) -> Result<Self, NodeError> {
        match spec {
            Value::Bool(b) => Ok(Condition::Constant(*b)),
            Value::String(s) => parse_compact(s, None),
            Value::Object(map) => {
                let field = map
                    .get("field")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if let Some(expr) = map.get("expression").and_then(Value::as_str) {
                    return Ok(Condition::Expression {
                        field,
                        expr: expr.to_string(),
                    });
                }
                let Some(op) = map.get("operator") else {
                    if let Some(Value::String(s)) = map.get("condition") {
                        return parse_compact(s, field);
                    }
                    return Err(NodeError::ConfigError(
                        "condition needs an 'operator' or an 'expression'".to_string(),
                    ));
                };
                let op_str = op.as_str().ok_or_else(|| {
                    NodeError::ConfigError("condition 'operator' must be a string".to_string())
                })?;
                let operator: ComparisonOperator = op_str.parse()?;
                let operand = if let Some(path) = map.get("value_from").and_then(Value::as_str) {
                    Operand::FromPath(path.to_string())
                } else if let Some(value) = map.get("value") {
                    Operand::Literal(value.clone())
                } else if operator.is_unary() {
                    Operand::Literal(Value::Null)
                } else {
                    return Err(NodeError::ConfigError(format!(
                        "operator '{}' needs a 'value' or 'value_from'",
                        operator
                    )));
                };
                Ok(Condition::Compare {
                    field,
                    operator,
                    operand,
                })
            }
            other => Err(NodeError::ConfigError(format!(
                "unsupported condition: {}",
                other
            ))),
        }
    }

    /// Evaluate against `input`. A missing `field` compares as `null`.
    pub fn evaluate(&self, input: &Value, templates: &TemplateEngine) -> Result<bool, NodeError> {
        match self {
            Condition::Constant(b) => Ok(*b),
            Condition::Expression { field, expr } => {
                let scoped = match field {
                    Some(path) => lookup_path(input, path).unwrap_or(&Value::Null),
                    None => input,
                };
                templates.eval_bool(expr, scoped)
            }
            Condition::Compare {
                field,
                operator,
                operand,
            } => {
                let actual = match field {
                    Some(path) => lookup_path(input, path).unwrap_or(&Value::Null),
                    None => input,
                };
                let expected = match operand {
                    Operand::Literal(v) => v,
                    Operand::FromPath(path) => lookup_path(input, path).ok_or_else(|| {
                        NodeError::MissingField(format!("value_from '{}'", path))
                    })?,
                };
                Ok(operator.apply(actual, expected))
            }
        }
    }
}

fn parse_compact(text: &str, field: Option<String>) -> Result<Condition, NodeError> {
    let trimmed = text.trim();
    match trimmed {
        "true" => return Ok(Condition::Constant(true)),
        "false" => return Ok(Condition::Constant(false)),
        "" => return Err(NodeError::ConfigError("empty condition".to_string())),
        _ => {}
    }
    for (symbol, operator) in ComparisonOperator::SYMBOLS {
        if let Some(rest) = trimmed.strip_prefix(symbol) {
            return Ok(Condition::Compare {
                field,
                operator,
                operand: Operand::Literal(parse_literal(rest)),
            });
        }
    }
    Ok(Condition::Expression {
        field,
        expr: trimmed.to_string(),
    })
}

/// Quoted text is a string; anything JSON can read is taken as JSON; the
/// remainder is a bare string.
fn parse_literal(text: &str) -> Value {
    let text = text.trim();
    for quote in ['\'', '"'] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return Value::String(text[1..text.len() - 1].to_string());
        }
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
