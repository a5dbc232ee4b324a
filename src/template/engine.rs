use std::collections::BTreeMap;

use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;

use crate::error::NodeError;

/// Template and expression engine, a thin wrapper around minijinja.
///
/// Templates and expressions see the node input as `input`; when the input is
/// an object its top-level keys are bound as well, so `{{ name }}` and
/// `{{ input.name }}` are equivalent.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Lenient);

        env.add_filter("default", minijinja_default_filter);
        env.add_filter("upper", minijinja_upper_filter);
        env.add_filter("lower", minijinja_lower_filter);
        env.add_filter("trim", minijinja_trim_filter);
        env.add_filter("json", minijinja_json_filter);
        env.add_filter("number", minijinja_number_filter);

        TemplateEngine { env }
    }

    /// Render `template` against `input`.
    pub fn render(&self, template: &str, input: &Value) -> Result<String, NodeError> {
        let tmpl = self
            .env
            .template_from_str(template)
            .map_err(|e| NodeError::TemplateError(format!("Template compile error: {}", e)))?;
        tmpl.render(bind_input(input))
            .map_err(|e| NodeError::TemplateError(format!("Template render error: {}", e)))
    }

    /// Evaluate a single expression such as `input.age >= 18` and return
    /// its value as JSON.
    pub fn eval(&self, expr: &str, input: &Value) -> Result<Value, NodeError> {
        let value = self.eval_raw(expr, input)?;
        from_template_value(&value)
    }

    /// Evaluate an expression for its truthiness.
    pub fn eval_bool(&self, expr: &str, input: &Value) -> Result<bool, NodeError> {
        Ok(self.eval_raw(expr, input)?.is_true())
    }

    fn eval_raw(&self, expr: &str, input: &Value) -> Result<minijinja::Value, NodeError> {
        let compiled = self
            .env
            .compile_expression(expr)
            .map_err(|e| NodeError::TemplateError(format!("Expression compile error: {}", e)))?;
        compiled
            .eval(bind_input(input))
            .map_err(|e| NodeError::TemplateError(format!("Expression eval error: {}", e)))
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn bind_input(input: &Value) -> minijinja::Value {
    let mut ctx: BTreeMap<String, minijinja::Value> = BTreeMap::new();
    if let Value::Object(map) = input {
        for (k, v) in map {
            ctx.insert(k.clone(), to_template_value(v));
        }
    }
    ctx.insert("input".to_string(), to_template_value(input));
    minijinja::Value::from(ctx)
}

/// Convert JSON into a minijinja value.
///
/// `serde_json` is built with `arbitrary_precision`, under which
/// `Value::from_serialize` would see numbers as opaque maps, so the
/// conversion walks the tree by hand.
pub fn to_template_value(value: &Value) -> minijinja::Value {
    match value {
        Value::Null => minijinja::Value::from(()),
        Value::Bool(b) => minijinja::Value::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                minijinja::Value::from(i)
            } else if let Some(u) = n.as_u64() {
                minijinja::Value::from(u)
            } else if let Ok(i) = n.to_string().parse::<i128>() {
                minijinja::Value::from(i)
            } else {
                minijinja::Value::from(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => minijinja::Value::from(s.as_str()),
        Value::Array(items) => {
            minijinja::Value::from(items.iter().map(to_template_value).collect::<Vec<_>>())
        }
        Value::Object(map) => {
            let obj: BTreeMap<String, minijinja::Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), to_template_value(v)))
                .collect();
            minijinja::Value::from(obj)
        }
    }
}

pub fn from_template_value(value: &minijinja::Value) -> Result<Value, NodeError> {
    if value.is_undefined() {
        return Ok(Value::Null);
    }
    serde_json::to_value(value).map_err(|e| NodeError::SerializationError(e.to_string()))
}

fn minijinja_default_filter(
    value: minijinja::Value,
    default: Option<minijinja::Value>,
) -> minijinja::Value {
    if value.is_undefined() || value.is_none() {
        default.unwrap_or(minijinja::Value::from(""))
    } else {
        value
    }
}

fn minijinja_upper_filter(value: String) -> String {
    value.to_uppercase()
}

fn minijinja_lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn minijinja_trim_filter(value: String) -> String {
    value.trim().to_string()
}

fn minijinja_json_filter(value: minijinja::Value) -> Result<String, minijinja::Error> {
    serde_json::to_string(&value).map_err(|e| {
        minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string())
    })
}

fn minijinja_number_filter(value: minijinja::Value) -> minijinja::Value {
    if let Some(s) = value.as_str() {
        let s = s.trim();
        if let Ok(i) = s.parse::<i64>() {
            return minijinja::Value::from(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return minijinja::Value::from(f);
        }
        return minijinja::Value::from(());
    }
    value
}
