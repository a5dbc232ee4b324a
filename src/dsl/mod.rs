//! Workflow document parsing.

pub mod parser;

pub use parser::{parse_document, parse_workflow, WorkflowFormat};
