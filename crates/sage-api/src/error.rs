//! HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use sage_core::{Error, ErrorCode};

/// Error returned by HTTP handlers. Rendered as `{"error": ..., "code": ...}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Unavailable(Error),
    Internal(Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => ErrorCode::ValidationError.as_str(),
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::NotFound(_) => ErrorCode::NotFound.as_str(),
            ApiError::Unavailable(e) | ApiError::Internal(e) => e.code().as_str(),
        }
    }

    /// Map a terminal stream error onto an HTTP error.
    pub fn from_stream_error(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::ValidationError => ApiError::BadRequest(message),
            ErrorCode::NotFound => ApiError::NotFound(message),
            ErrorCode::UpstreamUnavailable => ApiError::Unavailable(Error::Inference(message)),
            _ => ApiError::Internal(Error::Internal(message)),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match &err {
            Error::InvalidInput(msg) => ApiError::BadRequest(msg.clone()),
            Error::NotFound(msg) => ApiError::NotFound(msg.clone()),
            _ if err.code() == ErrorCode::UpstreamUnavailable => ApiError::Unavailable(err),
            _ => ApiError::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match self {
            ApiError::BadRequest(msg) | ApiError::Unauthorized(msg) | ApiError::NotFound(msg) => {
                msg
            }
            ApiError::Unavailable(err) => {
                tracing::warn!(error = %err, "Upstream failure");
                err.to_string()
            }
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "Request failed");
                err.to_string()
            }
        };

        let body = Json(serde_json::json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}
