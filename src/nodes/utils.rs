use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::NodeError;

/// Deserialize a node's config into its typed form.
pub fn parse_config<T: DeserializeOwned>(node_id: &str, config: &Value) -> Result<T, NodeError> {
    let config = if config.is_null() {
        Value::Object(Default::default())
    } else {
        config.clone()
    };
    serde_json::from_value(config)
        .map_err(|e| NodeError::ConfigError(format!("node '{}': {}", node_id, e)))
}

pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// An array input, or the array found under `field` of the input.
pub fn input_array<'a>(input: &'a Value, field: Option<&str>) -> Result<&'a Vec<Value>, NodeError> {
    let target = match field {
        Some(path) => crate::evaluator::lookup_path(input, path)
            .ok_or_else(|| NodeError::MissingField(path.to_string()))?,
        None => input,
    };
    target.as_array().ok_or_else(|| {
        NodeError::TypeError(format!(
            "expected an array, got {}",
            crate::evaluator::type_coercion::type_name(target)
        ))
    })
}
