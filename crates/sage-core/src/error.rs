//! Error types for the sage answer engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using sage's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for sage operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector index operation failed
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// Inference/generation failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// Retrieval failed as a whole
    #[error("Search error: {0}")]
    Search(String),

    /// A tool call failed
    #[error("Tool error: {0}")]
    Tool(String),

    /// Autonomous mode ran past its hard budget ceiling
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    /// The client went away mid-stream
    #[error("Stream aborted")]
    Aborted,

    /// Job queue error
    #[error("Job error: {0}")]
    Job(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable machine-readable error codes carried by terminal stream events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    UpstreamUnavailable,
    ToolExecutionError,
    BudgetExceeded,
    StreamAborted,
    NotFound,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorCode::ToolExecutionError => "TOOL_EXECUTION_ERROR",
            ErrorCode::BudgetExceeded => "BUDGET_EXCEEDED",
            ErrorCode::StreamAborted => "STREAM_ABORTED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Map this error onto the stable code reported to clients.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidInput(_) => ErrorCode::ValidationError,
            Error::Database(_)
            | Error::Embedding(_)
            | Error::VectorStore(_)
            | Error::Inference(_)
            | Error::Search(_)
            | Error::Request(_) => ErrorCode::UpstreamUnavailable,
            Error::Tool(_) => ErrorCode::ToolExecutionError,
            Error::BudgetExceeded(_) => ErrorCode::BudgetExceeded,
            Error::Aborted => ErrorCode::StreamAborted,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::Job(_)
            | Error::Serialization(_)
            | Error::Config(_)
            | Error::Internal(_)
            | Error::Io(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the client may retry the same request unchanged.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.code(), ErrorCode::UpstreamUnavailable)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("thread 42".to_string());
        assert_eq!(err.to_string(), "Not found: thread 42");
    }

    #[test]
    fn test_error_display_embedding() {
        let err = Error::Embedding("failed to generate".to_string());
        assert_eq!(err.to_string(), "Embedding error: failed to generate");
    }

    #[test]
    fn test_error_display_vector_store() {
        let err = Error::VectorStore("collection offline".to_string());
        assert_eq!(err.to_string(), "Vector store error: collection offline");
    }

    #[test]
    fn test_error_display_aborted() {
        assert_eq!(Error::Aborted.to_string(), "Stream aborted");
    }

    #[test]
    fn test_code_validation() {
        let err = Error::InvalidInput("message is empty".to_string());
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_code_upstream_is_recoverable() {
        for err in [
            Error::Inference("timeout".into()),
            Error::Embedding("503".into()),
            Error::VectorStore("down".into()),
            Error::Request("reset".into()),
        ] {
            assert_eq!(err.code(), ErrorCode::UpstreamUnavailable);
            assert!(err.is_recoverable());
        }
    }

    #[test]
    fn test_code_budget_not_recoverable() {
        let err = Error::BudgetExceeded("50000 tokens".into());
        assert_eq!(err.code(), ErrorCode::BudgetExceeded);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::UpstreamUnavailable).unwrap();
        assert_eq!(json, r#""UPSTREAM_UNAVAILABLE""#);
        assert_eq!(ErrorCode::UpstreamUnavailable.to_string(), "UPSTREAM_UNAVAILABLE");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.code(), ErrorCode::InternalError);
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
