//! Caller identity from trusted upstream headers.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

use sage_core::AuthPrincipal;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// Authenticated caller, set by the identity proxy in front of the API.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity(pub AuthPrincipal);

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        let id = header(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("Missing X-User-Id header".into()))?;
        let email = header(USER_EMAIL_HEADER).unwrap_or_default();

        Ok(Identity(AuthPrincipal { id, email }))
    }
}
