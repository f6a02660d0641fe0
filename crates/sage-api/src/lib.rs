//! # sage-api
//!
//! HTTP surface for the sage answer engine.
//!
//! - `POST /api/v1/chat/stream`: one chat turn as Server-Sent Events
//! - `POST /api/v1/chat`: the same turn, buffered into one JSON response
//! - `POST /api/v1/collections/:name/documents`: ingest a document
//! - `POST /api/v1/skills/reload`: re-read the skill registry
//! - `GET /health`
//!
//! Callers are identified by the `X-User-Id` and `X-User-Email` headers set
//! by the fronting gateway.

pub mod cache;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod orchestrator;
pub mod state;

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use sage_core::defaults;

pub use cache::ResponseCache;
pub use error::ApiError;
pub use identity::Identity;
pub use orchestrator::{ChatRequest, StreamConfig, StreamFrame, StreamOrchestrator};
pub use state::AppState;

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Parse allowed CORS origins from `ALLOWED_ORIGINS` (comma separated).
///
/// Defaults to `http://localhost:3000` when unset or empty. Invalid entries are
/// logged and skipped.
pub fn parse_allowed_origins() -> Vec<HeaderValue> {
    let origins_str = std::env::var("ALLOWED_ORIGINS").unwrap_or_default();
    if origins_str.trim().is_empty() {
        return vec![HeaderValue::from_static("http://localhost:3000")];
    }

    origins_str
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect()
}

/// Build the application router with its middleware stack.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::system::health_check))
        .route("/api/v1/chat", post(handlers::chat::chat))
        .route("/api/v1/chat/stream", post(handlers::chat::chat_stream))
        .route(
            "/api/v1/collections/:name/documents",
            post(handlers::ingest::upload_document),
        )
        .route("/api/v1/skills/reload", post(handlers::system::reload_skills))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(parse_allowed_origins()))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    HeaderName::from_static(identity::USER_ID_HEADER),
                    HeaderName::from_static(identity::USER_EMAIL_HEADER),
                ])
                .allow_credentials(true)
                .max_age(Duration::from_secs(defaults::CORS_MAX_AGE_SECS)),
        )
        .layer(DefaultBodyLimit::max(defaults::MAX_BODY_SIZE_BYTES))
        .layer(RequestBodyLimitLayer::new(defaults::MAX_BODY_SIZE_BYTES))
        .with_state(state)
}
