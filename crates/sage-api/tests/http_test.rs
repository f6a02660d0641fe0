//! HTTP surface tests driven through the router with `tower::ServiceExt`.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::harness;
use sage_core::VectorStore;
use sage_inference::mock::MockCompletionBackend;

fn chat_request(uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(user) = user {
        builder = builder
            .header("x-user-id", user)
            .header("x-user-email", format!("{}@example.com", user));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let h = harness(MockCompletionBackend::new());
    let response = sage_api::router(h.state)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["redis"], false);
}

#[tokio::test]
async fn test_missing_identity_is_unauthorized() {
    let h = harness(MockCompletionBackend::new());
    let response = sage_api::router(h.state)
        .oneshot(chat_request(
            "/api/v1/chat/stream",
            None,
            json!({ "message": "hi" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_empty_message_rejected_before_stream() {
    let h = harness(MockCompletionBackend::new());
    let response = sage_api::router(h.state)
        .oneshot(chat_request(
            "/api/v1/chat/stream",
            Some("user-1"),
            json!({ "message": "   " }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
    assert_eq!(h.backend.call_count(), 0);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let h = harness(MockCompletionBackend::new());
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-user-id", "user-1")
        .body(Body::from("{not json"))
        .unwrap();
    let response = sage_api::router(h.state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stream_is_server_sent_events() {
    let h = harness(MockCompletionBackend::new().with_default_response("Hello from sage."));
    let response = sage_api::router(h.state)
        .oneshot(chat_request(
            "/api/v1/chat/stream",
            Some("user-1"),
            json!({ "message": "Say hello" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(body.starts_with("data: {\"type\":\"status\",\"phase\":\"init\"}"));
    assert!(body.contains("\"type\":\"chunk\""));
    assert!(body.trim_end().ends_with('}'));
    let last = body
        .lines()
        .filter(|l| l.starts_with("data: "))
        .last()
        .unwrap();
    assert!(last.contains("\"type\":\"done\""));
}

#[tokio::test]
async fn test_buffered_chat_returns_answer() {
    let h = harness(MockCompletionBackend::new().with_default_response("Benefits start day one."));
    let response = sage_api::router(h.state)
        .oneshot(chat_request(
            "/api/v1/chat",
            Some("user-1"),
            json!({ "message": "When do benefits start?", "categoryIds": ["hr"] }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["content"], "Benefits start day one.");
    assert!(body["messageId"].is_string());
    assert!(body["threadId"].is_string());
    assert_eq!(body["toolsUsed"], json!([]));
}

#[tokio::test]
async fn test_invalid_category_rejected() {
    let h = harness(MockCompletionBackend::new());
    let response = sage_api::router(h.state)
        .oneshot(chat_request(
            "/api/v1/chat",
            Some("user-1"),
            json!({ "message": "hi", "categoryIds": ["Not A Slug"] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

fn multipart_upload(uri: &str, filename: &str, content: &str) -> Request<Body> {
    let boundary = "sage-test-boundary";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\n\
         Content-Type: text/plain\r\n\r\n{c}\r\n--{b}--\r\n",
        b = boundary,
        f = filename,
        c = content
    );
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .header("x-user-id", "admin")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_ingest_document_and_invalidate_cache() {
    let h = harness(MockCompletionBackend::new());
    h.cache.set("sage:answer:stale", &"old answer").await;

    let response = sage_api::router(h.state)
        .oneshot(multipart_upload(
            "/api/v1/collections/global_knowledge/documents",
            "handbook.txt",
            "Employees accrue 1.5 days of PTO per month. Unused PTO carries over.",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let report = body_json(response).await;
    assert_eq!(report["collection"], "global_knowledge");
    assert_eq!(report["documentName"], "handbook.txt");
    assert!(report["chunks"].as_u64().unwrap() >= 1);

    assert!(h.vectors.count("global_knowledge").await.unwrap() >= 1);
    assert_eq!(h.cache.get::<String>("sage:answer:stale").await, None);
}

#[tokio::test]
async fn test_ingest_unknown_collection_rejected() {
    let h = harness(MockCompletionBackend::new());
    let response = sage_api::router(h.state)
        .oneshot(multipart_upload(
            "/api/v1/collections/other_stuff/documents",
            "notes.txt",
            "text",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_skills_reload_reports_generation() {
    let h = harness(MockCompletionBackend::new());
    let response = sage_api::router(h.state)
        .oneshot(
            Request::post("/api/v1/skills/reload")
                .header("x-user-id", "admin")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["generation"].as_u64().is_some());
}
