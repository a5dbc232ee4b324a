use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::NodeError;

use super::type_coercion::{as_number, compare_values, to_string};

/// Comparison operators usable in conditions and switch cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    Empty,
    NotEmpty,
    Null,
    NotNull,
}

impl ComparisonOperator {
    /// Symbolic prefixes recognised by the compact syntax, longest first.
    pub const SYMBOLS: [(&'static str, ComparisonOperator); 6] = [
        (">=", ComparisonOperator::GreaterOrEqual),
        ("<=", ComparisonOperator::LessOrEqual),
        ("==", ComparisonOperator::Equal),
        ("!=", ComparisonOperator::NotEqual),
        (">", ComparisonOperator::GreaterThan),
        ("<", ComparisonOperator::LessThan),
    ];

    /// Operators that ignore their operand.
    pub fn is_unary(&self) -> bool {
        matches!(
            self,
            ComparisonOperator::Empty
                | ComparisonOperator::NotEmpty
                | ComparisonOperator::Null
                | ComparisonOperator::NotNull
        )
    }

    pub fn apply(&self, actual: &Value, expected: &Value) -> bool {
        match self {
            ComparisonOperator::Equal => equal(actual, expected),
            ComparisonOperator::NotEqual => !equal(actual, expected),
            ComparisonOperator::GreaterThan => ordered(actual, expected, Ordering::is_gt),
            ComparisonOperator::GreaterOrEqual => ordered(actual, expected, Ordering::is_ge),
            ComparisonOperator::LessThan => ordered(actual, expected, Ordering::is_lt),
            ComparisonOperator::LessOrEqual => ordered(actual, expected, Ordering::is_le),
            ComparisonOperator::Contains => contains(actual, expected),
            ComparisonOperator::NotContains => !contains(actual, expected),
            ComparisonOperator::StartsWith => starts_with(actual, expected),
            ComparisonOperator::EndsWith => ends_with(actual, expected),
            ComparisonOperator::In => contains(expected, actual),
            ComparisonOperator::NotIn => !contains(expected, actual),
            ComparisonOperator::Empty => is_empty(actual),
            ComparisonOperator::NotEmpty => !is_empty(actual),
            ComparisonOperator::Null => actual.is_null(),
            ComparisonOperator::NotNull => !actual.is_null(),
        }
    }
}

impl FromStr for ComparisonOperator {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.trim().to_ascii_lowercase().as_str() {
            "==" | "=" | "eq" | "equal" | "equals" | "is" => ComparisonOperator::Equal,
            "!=" | "ne" | "not_equal" | "is_not" => ComparisonOperator::NotEqual,
            ">" | "gt" | "greater_than" => ComparisonOperator::GreaterThan,
            ">=" | "gte" | "ge" | "greater_or_equal" => ComparisonOperator::GreaterOrEqual,
            "<" | "lt" | "less_than" => ComparisonOperator::LessThan,
            "<=" | "lte" | "le" | "less_or_equal" => ComparisonOperator::LessOrEqual,
            "contains" => ComparisonOperator::Contains,
            "not_contains" => ComparisonOperator::NotContains,
            "starts_with" | "start_with" => ComparisonOperator::StartsWith,
            "ends_with" | "end_with" => ComparisonOperator::EndsWith,
            "in" => ComparisonOperator::In,
            "not_in" => ComparisonOperator::NotIn,
            "empty" | "is_empty" => ComparisonOperator::Empty,
            "not_empty" | "is_not_empty" => ComparisonOperator::NotEmpty,
            "null" | "is_null" => ComparisonOperator::Null,
            "not_null" | "is_not_null" => ComparisonOperator::NotNull,
            other => {
                return Err(NodeError::ConfigError(format!(
                    "unknown comparison operator '{}'",
                    other
                )))
            }
        };
        Ok(op)
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComparisonOperator::Equal => "==",
            ComparisonOperator::NotEqual => "!=",
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::GreaterOrEqual => ">=",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::LessOrEqual => "<=",
            ComparisonOperator::Contains => "contains",
            ComparisonOperator::NotContains => "not_contains",
            ComparisonOperator::StartsWith => "starts_with",
            ComparisonOperator::EndsWith => "ends_with",
            ComparisonOperator::In => "in",
            ComparisonOperator::NotIn => "not_in",
            ComparisonOperator::Empty => "empty",
            ComparisonOperator::NotEmpty => "not_empty",
            ComparisonOperator::Null => "null",
            ComparisonOperator::NotNull => "not_null",
        };
        f.write_str(s)
    }
}

fn ordered(actual: &Value, expected: &Value, pred: fn(Ordering) -> bool) -> bool {
    compare_values(actual, expected).is_some_and(pred)
}

pub fn contains(value: &Value, target: &Value) -> bool {
    match (value, target) {
        (Value::String(s), Value::String(t)) => s.contains(t.as_str()),
        (Value::String(s), Value::Number(n)) => s.contains(&n.to_string()),
        (Value::Array(arr), target) => arr.iter().any(|item| equal(item, target)),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}

pub fn starts_with(value: &Value, target: &Value) -> bool {
    match value {
        Value::String(s) => s.starts_with(to_string(target).as_str()),
        _ => false,
    }
}

pub fn ends_with(value: &Value, target: &Value) -> bool {
    match value {
        Value::String(s) => s.ends_with(to_string(target).as_str()),
        _ => false,
    }
}

pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(arr) => arr.is_empty(),
        Value::Object(obj) => obj.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Equality with numeric and boolean coercion.
pub fn equal(value: &Value, target: &Value) -> bool {
    if value == target {
        return true;
    }

    match (value, target) {
        (Value::Number(_), Value::Number(_))
        | (Value::String(_), Value::Number(_))
        | (Value::Number(_), Value::String(_)) => {
            match (as_number(value), as_number(target)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            }
        }
        (Value::Bool(b), Value::String(s)) | (Value::String(s), Value::Bool(b)) => {
            match s.to_lowercase().as_str() {
                "true" => *b,
                "false" => !*b,
                _ => false,
            }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_contains() {
        assert!(contains(&json!("hello world"), &json!("world")));
        assert!(!contains(&json!("hello world"), &json!("xyz")));
        assert!(contains(&json!([1, 2, 3]), &json!(2)));
        assert!(contains(&json!(["1"]), &json!(1)));
        assert!(!contains(&json!([1, 2, 3]), &json!(4)));
    }

    #[test]
    fn test_is_empty_various_types() {
        assert!(is_empty(&json!(null)));
        assert!(is_empty(&json!("")));
        assert!(is_empty(&json!([])));
        assert!(is_empty(&json!({})));
        assert!(!is_empty(&json!("hello")));
        assert!(!is_empty(&json!(0)));
    }

    #[test]
    fn test_equal_cross_type() {
        assert!(equal(&json!("42"), &json!(42)));
        assert!(equal(&json!(42), &json!(42.0)));
        assert!(equal(&json!("true"), &json!(true)));
        assert!(!equal(&json!("adult"), &json!("minor")));
    }

    #[test]
    fn test_ordering_operators() {
        assert!(ComparisonOperator::GreaterOrEqual.apply(&json!(18), &json!(18)));
        assert!(!ComparisonOperator::GreaterThan.apply(&json!(15), &json!(18)));
        assert!(ComparisonOperator::LessThan.apply(&json!("b"), &json!("c")));
        assert!(!ComparisonOperator::GreaterThan.apply(&json!(null), &json!(1)));
    }

    #[test]
    fn test_membership() {
        assert!(ComparisonOperator::In.apply(&json!("b"), &json!(["a", "b"])));
        assert!(ComparisonOperator::NotIn.apply(&json!("z"), &json!(["a", "b"])));
    }

    #[test]
    fn test_parse_operator_names() {
        assert_eq!(">=".parse::<ComparisonOperator>().unwrap(), ComparisonOperator::GreaterOrEqual);
        assert_eq!("EQ".parse::<ComparisonOperator>().unwrap(), ComparisonOperator::Equal);
        assert!(matches!(
            "~=".parse::<ComparisonOperator>(),
            Err(NodeError::ConfigError(_))
        ));
    }
}
