//! Document parser: converts raw YAML/JSON text into a [`Graph`] or any other
//! serde document (engine config, network policy).

use serde::de::DeserializeOwned;

use crate::error::WorkflowError;
use crate::graph::Graph;

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowFormat {
    /// YAML format (`.yaml` / `.yml`).
    Yaml,
    /// JSON format (`.json`).
    Json,
}

impl WorkflowFormat {
    /// Guess the format from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Some(WorkflowFormat::Yaml),
            "json" => Some(WorkflowFormat::Json),
            _ => None,
        }
    }
}

/// Parse any serde document.
pub fn parse_document<T: DeserializeOwned>(
    content: &str,
    format: WorkflowFormat,
) -> Result<T, WorkflowError> {
    match format {
        WorkflowFormat::Yaml => {
            serde_saphyr::from_str(content).map_err(|e| WorkflowError::ParseError(e.to_string()))
        }
        WorkflowFormat::Json => {
            serde_json::from_str(content).map_err(|e| WorkflowError::ParseError(e.to_string()))
        }
    }
}

/// Parse a workflow graph document. Structural validation happens later in
/// [`build_graph`](crate::graph::build_graph).
pub fn parse_workflow(content: &str, format: WorkflowFormat) -> Result<Graph, WorkflowError> {
    parse_document(content, format)
}
