use serde::{Deserialize, Serialize};

/// Error retryability marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorRetryability {
    Retryable,
    NonRetryable,
}

/// Error severity marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Warning,
    Error,
    Fatal,
}

/// Coarse error taxonomy used for recovery decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The node's config is invalid for its type.
    Configuration,
    /// Type mismatch, divide-by-zero, missing field, bad parse input, iteration bound.
    Runtime,
    /// A wrapped subtree or a node exceeded its wall-clock bound.
    Timeout,
    /// SSRF policy rejection or an HTTP guard (redirects, body size) tripped.
    Security,
    /// Transport-level failure talking to a remote host.
    Network,
    /// Work abandoned because a sibling won a race or the run stopped.
    Cancellation,
}

/// Error classification code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Configuration
    ConfigError,

    // Runtime
    TypeError,
    DivisionByZero,
    MissingField,
    ParseError,
    IterationLimit,
    TemplateError,
    SerializationError,
    ExecutionError,

    // Time / cancellation
    Timeout,
    Cancelled,

    // Network/HTTP
    SecurityViolation,
    NetworkError,
    HttpClientError,
    HttpServerError,

    InternalError,
}

/// Structured error context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub retryability: ErrorRetryability,
    pub severity: ErrorSeverity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

impl ErrorContext {
    pub fn non_retryable(kind: ErrorKind, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            retryability: ErrorRetryability::NonRetryable,
            severity: ErrorSeverity::Error,
            message: message.into(),
            http_status: None,
        }
    }

    pub fn retryable(kind: ErrorKind, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            retryability: ErrorRetryability::Retryable,
            severity: ErrorSeverity::Error,
            message: message.into(),
            http_status: None,
        }
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryability == ErrorRetryability::Retryable
    }
}
