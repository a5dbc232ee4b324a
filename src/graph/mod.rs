//! Graph model and structural validation.
//!
//! A [`Graph`] document is checked by [`validate_graph`] and turned into an
//! immutable [`WorkflowDefinition`] by [`build_graph`]. The definition is what
//! the [`WorkflowDispatcher`](crate::core::WorkflowDispatcher) walks.

pub mod builder;
pub mod types;
pub mod validator;

pub use builder::*;
pub use types::*;
pub use validator::{validate_graph, GraphLimits};
