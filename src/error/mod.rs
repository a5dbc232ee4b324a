//! Error types for the workflow engine.
//!
//! - [`NodeError`]: errors raised while a single node executes. They never
//!   abort the run on their own; the scheduler marks the node `Failed`.
//! - [`WorkflowError`]: structural errors (validation time) and run-level
//!   aborts such as the whole-run timeout or fail-fast.
//! - [`ErrorContext`]: structured error metadata.

pub mod error_context;
pub mod node_error;
pub mod workflow_error;

pub use error_context::{ErrorCode, ErrorContext, ErrorKind, ErrorRetryability, ErrorSeverity};
pub use node_error::NodeError;
pub use workflow_error::WorkflowError;

/// Convenience alias for workflow-level results.
pub type WorkflowResult<T> = Result<T, WorkflowError>;
/// Convenience alias for node-level results.
pub type NodeResult<T> = Result<T, NodeError>;
