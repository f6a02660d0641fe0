//! OpenAI-specific error handling.

use sage_core::Error;

/// OpenAI-specific error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAIErrorCode {
    AuthenticationError,
    RateLimitExceeded,
    ModelNotFound,
    ContextLengthExceeded,
    ServerError,
    Unknown,
}

impl OpenAIErrorCode {
    /// Determine error code from HTTP status and error type.
    pub fn from_response(status: u16, error_type: &str) -> Self {
        match (status, error_type) {
            (401, _) => Self::AuthenticationError,
            (429, _) => Self::RateLimitExceeded,
            (404, _) | (_, "model_not_found") => Self::ModelNotFound,
            (400, _) if error_type.contains("context_length") => Self::ContextLengthExceeded,
            (500..=599, _) => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimitExceeded | Self::ServerError)
    }
}

/// Which call failed; selects the core error variant for upstream failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Embedding,
    Completion,
}

/// Convert an OpenAI error to a sage Error.
///
/// Credential and model problems are configuration errors; everything else
/// is an upstream failure of the call that produced it.
pub fn to_sage_error(code: OpenAIErrorCode, kind: CallKind, message: &str) -> Error {
    let upstream = |msg: String| match kind {
        CallKind::Embedding => Error::Embedding(msg),
        CallKind::Completion => Error::Inference(msg),
    };
    match code {
        OpenAIErrorCode::AuthenticationError => {
            Error::Config(format!("Authentication failed: {}", message))
        }
        OpenAIErrorCode::ModelNotFound => Error::Config(format!("Model not found: {}", message)),
        OpenAIErrorCode::RateLimitExceeded => upstream(format!("Rate limit exceeded: {}", message)),
        OpenAIErrorCode::ContextLengthExceeded => {
            upstream(format!("Context too long: {}", message))
        }
        OpenAIErrorCode::ServerError => upstream(format!("Server error: {}", message)),
        OpenAIErrorCode::Unknown => upstream(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_from_status() {
        assert_eq!(
            OpenAIErrorCode::from_response(401, "invalid_api_key"),
            OpenAIErrorCode::AuthenticationError
        );
        assert_eq!(
            OpenAIErrorCode::from_response(429, "rate_limit_exceeded"),
            OpenAIErrorCode::RateLimitExceeded
        );
        assert_eq!(
            OpenAIErrorCode::from_response(404, "model_not_found"),
            OpenAIErrorCode::ModelNotFound
        );
        assert_eq!(
            OpenAIErrorCode::from_response(400, "context_length_exceeded"),
            OpenAIErrorCode::ContextLengthExceeded
        );
        assert_eq!(
            OpenAIErrorCode::from_response(502, "bad_gateway"),
            OpenAIErrorCode::ServerError
        );
        assert_eq!(
            OpenAIErrorCode::from_response(418, "im_a_teapot"),
            OpenAIErrorCode::Unknown
        );
    }

    #[test]
    fn test_retryable() {
        assert!(OpenAIErrorCode::RateLimitExceeded.is_retryable());
        assert!(OpenAIErrorCode::ServerError.is_retryable());
        assert!(!OpenAIErrorCode::AuthenticationError.is_retryable());
    }

    #[test]
    fn test_to_sage_error_variant_by_kind() {
        let err = to_sage_error(OpenAIErrorCode::ServerError, CallKind::Embedding, "boom");
        assert!(matches!(err, Error::Embedding(_)));
        assert!(err.is_recoverable());

        let err = to_sage_error(OpenAIErrorCode::ServerError, CallKind::Completion, "boom");
        assert!(matches!(err, Error::Inference(_)));
    }

    #[test]
    fn test_to_sage_error_auth_is_config() {
        let err = to_sage_error(
            OpenAIErrorCode::AuthenticationError,
            CallKind::Completion,
            "Invalid key",
        );
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("Authentication failed"));
    }
}
