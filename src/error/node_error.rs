use thiserror::Error;

use super::error_context::{ErrorCode, ErrorContext, ErrorKind, ErrorRetryability, ErrorSeverity};

/// Node-level errors
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Missing field: {0}")]
    MissingField(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Iteration limit of {limit} exceeded")]
    IterationLimit { limit: usize },
    #[error("Template error: {0}")]
    TemplateError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Execution error: {0}")]
    ExecutionError(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Security violation: {0}")]
    Security(String),
    #[error("HTTP error: {0}")]
    HttpError(String),
    #[error("HTTP status {status}: {message}")]
    HttpStatus { status: u16, message: String },
    #[error("Cancelled")]
    Cancelled,
    #[error("Nested node '{node_id}' failed: {source}")]
    Nested {
        node_id: String,
        #[source]
        source: Box<NodeError>,
    },
}

impl NodeError {
    /// Wrap an error raised by a node inside a nested body graph.
    pub fn nested(node_id: impl Into<String>, source: NodeError) -> Self {
        NodeError::Nested {
            node_id: node_id.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error once nested-body wrappers are peeled off.
    pub fn root_cause(&self) -> &NodeError {
        match self {
            NodeError::Nested { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            NodeError::ConfigError(_) => ErrorKind::Configuration,
            NodeError::TypeError(_)
            | NodeError::DivisionByZero
            | NodeError::MissingField(_)
            | NodeError::ParseError(_)
            | NodeError::IterationLimit { .. }
            | NodeError::TemplateError(_)
            | NodeError::SerializationError(_)
            | NodeError::ExecutionError(_) => ErrorKind::Runtime,
            NodeError::Timeout(_) => ErrorKind::Timeout,
            NodeError::Security(_) => ErrorKind::Security,
            NodeError::HttpError(_) | NodeError::HttpStatus { .. } => ErrorKind::Network,
            NodeError::Cancelled => ErrorKind::Cancellation,
            NodeError::Nested { source, .. } => source.kind(),
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            NodeError::ConfigError(_) => ErrorCode::ConfigError,
            NodeError::TypeError(_) => ErrorCode::TypeError,
            NodeError::DivisionByZero => ErrorCode::DivisionByZero,
            NodeError::MissingField(_) => ErrorCode::MissingField,
            NodeError::ParseError(_) => ErrorCode::ParseError,
            NodeError::IterationLimit { .. } => ErrorCode::IterationLimit,
            NodeError::TemplateError(_) => ErrorCode::TemplateError,
            NodeError::SerializationError(_) => ErrorCode::SerializationError,
            NodeError::ExecutionError(_) => ErrorCode::ExecutionError,
            NodeError::Timeout(_) => ErrorCode::Timeout,
            NodeError::Security(_) => ErrorCode::SecurityViolation,
            NodeError::HttpError(_) => ErrorCode::NetworkError,
            NodeError::HttpStatus { status, .. } if *status >= 500 => ErrorCode::HttpServerError,
            NodeError::HttpStatus { .. } => ErrorCode::HttpClientError,
            NodeError::Cancelled => ErrorCode::Cancelled,
            NodeError::Nested { source, .. } => source.error_code(),
        }
    }

    /// Policy rejections, bad configuration, cancellation and deterministic
    /// client-side HTTP statuses are never worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            NodeError::ConfigError(_) | NodeError::Security(_) | NodeError::Cancelled => false,
            NodeError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            NodeError::Nested { source, .. } => source.is_retryable(),
            _ => true,
        }
    }

    pub fn error_context(&self) -> ErrorContext {
        let message = self.to_string();
        let mut ctx = if self.is_retryable() {
            ErrorContext::retryable(self.kind(), self.error_code(), message)
        } else {
            ErrorContext::non_retryable(self.kind(), self.error_code(), message)
        };
        if let NodeError::HttpStatus { status, .. } = self.root_cause() {
            ctx = ctx.with_http_status(*status);
        }
        if self.kind() == ErrorKind::Cancellation {
            ctx = ctx.with_severity(ErrorSeverity::Warning);
        }
        ctx
    }

    /// JSON shape used for sentinel outputs and catch-branch bindings.
    pub fn to_structured_json(&self) -> serde_json::Value {
        let ErrorContext {
            kind,
            code,
            retryability,
            severity,
            message,
            http_status,
        } = self.error_context();
        let mut json = serde_json::json!({
            "error": message,
            "kind": kind,
            "code": code,
            "retryable": retryability == ErrorRetryability::Retryable,
            "severity": severity,
        });
        if let Some(status) = http_status {
            json["http_status"] = status.into();
        }
        json
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::SerializationError(e.to_string())
    }
}
