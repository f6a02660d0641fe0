//! Chat endpoints: SSE stream and a buffered JSON variant.

use std::convert::Infallible;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::{sse::Event, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use sage_core::{ArtifactKind, SourceRef, StreamEvent};

use crate::error::ApiError;
use crate::identity::Identity;
use crate::orchestrator::{ChatRequest, StreamFrame};
use crate::state::AppState;

fn parse_body(body: Result<Json<ChatRequest>, JsonRejection>) -> Result<ChatRequest, ApiError> {
    body.map(|Json(req)| req)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

/// One SSE line per frame: `data: <json>` for events, a bare comment for heartbeats.
pub fn to_sse_event(frame: StreamFrame) -> Event {
    match frame {
        StreamFrame::Event(event) => Event::default()
            .json_data(&event)
            .unwrap_or_else(|e| Event::default().comment(format!("unserializable event: {}", e))),
        StreamFrame::Heartbeat => Event::default().comment(""),
    }
}

/// `POST /api/v1/chat/stream`
pub async fn chat_stream(
    State(state): State<AppState>,
    Identity(principal): Identity,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let request = parse_body(body)?;
    let turn = state.orchestrator.prepare(principal, request).await?;
    let frames = state.orchestrator.start(turn);

    let stream = ReceiverStream::new(frames).map(|frame| Ok(to_sse_event(frame)));
    Ok(Sse::new(stream))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactOut {
    pub subtype: ArtifactKind,
    pub payload: JsonValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub message_id: Uuid,
    pub thread_id: Uuid,
    pub content: String,
    pub sources: Vec<SourceRef>,
    pub artifacts: Vec<ArtifactOut>,
    pub tools_used: Vec<String>,
}

/// `POST /api/v1/chat`: runs the same turn and returns the final answer.
pub async fn chat(
    State(state): State<AppState>,
    Identity(principal): Identity,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let request = parse_body(body)?;
    let turn = state.orchestrator.prepare(principal, request).await?;
    let thread_id = turn.thread.id;
    let mut frames = state.orchestrator.start(turn);

    let mut content = String::new();
    let mut sources = Vec::new();
    let mut artifacts = Vec::new();
    let mut tools_used = Vec::new();

    while let Some(frame) = frames.recv().await {
        let StreamFrame::Event(event) = frame else {
            continue;
        };
        match event {
            StreamEvent::Chunk { text_delta } => content.push_str(&text_delta),
            StreamEvent::Sources { sources: s } => sources = s,
            StreamEvent::Artifact { subtype, payload } => {
                artifacts.push(ArtifactOut { subtype, payload })
            }
            StreamEvent::ToolStart { name, .. } => tools_used.push(name),
            StreamEvent::Done { message_id } => {
                return Ok(Json(ChatResponse {
                    message_id,
                    thread_id,
                    content,
                    sources,
                    artifacts,
                    tools_used,
                }))
            }
            StreamEvent::Error { code, message, .. } => {
                return Err(ApiError::from_stream_error(code, message))
            }
            _ => {}
        }
    }

    Err(ApiError::Internal(sage_core::Error::Internal(
        "Stream ended without a terminal event".into(),
    )))
}
