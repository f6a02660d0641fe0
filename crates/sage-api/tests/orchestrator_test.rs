//! End-to-end turns through the stream orchestrator with mock backends.

mod common;

use std::time::Duration;

use common::{collect_events, harness, principal, text_of};
use sage_api::{ChatRequest, StreamFrame};
use sage_core::{
    ArtifactKind, CompletionResponse, ConversationStore, ErrorCode, MessageRole, StreamEvent,
    StreamPhase, ToolCall,
};
use sage_inference::mock::MockCompletionBackend;

fn request(message: &str) -> ChatRequest {
    ChatRequest {
        message: message.into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_turn_event_order_and_persistence() {
    let h = harness(
        MockCompletionBackend::new().with_default_response("PTO accrues monthly at 1.5 days."),
    );
    let turn = h
        .orchestrator
        .prepare(principal(), request("How does PTO accrue?"))
        .await
        .unwrap();
    let thread_id = turn.thread.id;
    let events = collect_events(h.orchestrator.start(turn)).await;

    assert_eq!(events.first(), Some(&StreamEvent::status(StreamPhase::Init)));
    let inits = events
        .iter()
        .filter(|e| **e == StreamEvent::status(StreamPhase::Init))
        .count();
    assert_eq!(inits, 1);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let Some(StreamEvent::Done { message_id }) = events.last() else {
        panic!("expected done last, got {:?}", events.last());
    };

    let phases: Vec<StreamPhase> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Status { phase } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            StreamPhase::Init,
            StreamPhase::RagRetrieval,
            StreamPhase::Generating,
            StreamPhase::Complete
        ]
    );
    assert!(events
        .iter()
        .any(|e| matches!(e, StreamEvent::ContextLoaded { .. })));
    assert!(events.iter().any(|e| matches!(e, StreamEvent::Sources { .. })));
    assert_eq!(text_of(&events), "PTO accrues monthly at 1.5 days.");

    let messages = h.conversations.get_messages(thread_id, 10).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[0].content, "How does PTO accrue?");
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].id, *message_id);
    assert!(!messages[1].metadata.cached);
}

#[tokio::test]
async fn test_streaming_backend_forwards_deltas() {
    let h = harness(MockCompletionBackend::new().with_stream(
        vec!["Hel".into(), "lo".into(), " there".into()],
        Duration::from_millis(1),
    ));
    let turn = h
        .orchestrator
        .prepare(principal(), request("hi"))
        .await
        .unwrap();
    let events = collect_events(h.orchestrator.start(turn)).await;

    let chunks: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk { text_delta } => Some(text_delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec!["Hel", "lo", " there"]);
    assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
}

#[tokio::test]
async fn test_client_abort_persists_nothing() {
    let deltas: Vec<String> = (0..20).map(|i| format!("part{} ", i)).collect();
    let h = harness(MockCompletionBackend::new().with_stream(deltas, Duration::from_millis(20)));
    let turn = h
        .orchestrator
        .prepare(principal(), request("tell me a long story"))
        .await
        .unwrap();
    let thread_id = turn.thread.id;
    let mut frames = h.orchestrator.start(turn);

    let mut chunks = 0;
    while let Some(frame) = frames.recv().await {
        match frame {
            StreamFrame::Event(StreamEvent::Chunk { .. }) => {
                chunks += 1;
                if chunks == 2 {
                    break;
                }
            }
            StreamFrame::Event(event) => assert!(!event.is_terminal()),
            StreamFrame::Heartbeat => {}
        }
    }
    drop(frames);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.conversations.count_messages(thread_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_repeated_question_served_from_cache() {
    let h = harness(MockCompletionBackend::new().with_default_response("Expenses are due Friday."));

    let first = h
        .orchestrator
        .prepare(principal(), request("When are expenses due?"))
        .await
        .unwrap();
    let first_events = collect_events(h.orchestrator.start(first)).await;
    let calls_after_first = h.backend.call_count();
    let embeds_after_first = h.embeddings.call_count();
    assert!(calls_after_first > 0);

    let second = h
        .orchestrator
        .prepare(principal(), request("  when are EXPENSES due? "))
        .await
        .unwrap();
    let thread_id = second.thread.id;
    let second_events = collect_events(h.orchestrator.start(second)).await;

    assert_eq!(h.backend.call_count(), calls_after_first);
    assert_eq!(h.embeddings.call_count(), embeds_after_first);
    assert_eq!(text_of(&second_events), text_of(&first_events));
    assert!(!second_events
        .iter()
        .any(|e| *e == StreamEvent::status(StreamPhase::RagRetrieval)));
    assert!(matches!(second_events.last(), Some(StreamEvent::Done { .. })));

    let messages = h.conversations.get_messages(thread_id, 10).await.unwrap();
    assert!(messages[1].metadata.cached);
}

#[tokio::test]
async fn test_tool_events_are_bridged() {
    let backend = MockCompletionBackend::new()
        .with_scripted(CompletionResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: "generate_document".into(),
                arguments_json: r#"{"title":"Onboarding memo","content":"Welcome aboard."}"#
                    .into(),
            }],
            usage: Default::default(),
        })
        .with_default_response("I drafted the memo.");
    let h = harness(backend);

    let turn = h
        .orchestrator
        .prepare(
            principal(),
            ChatRequest {
                message: "Write an onboarding memo".into(),
                enable_tools: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let thread_id = turn.thread.id;
    let events = collect_events(h.orchestrator.start(turn)).await;

    let Some(StreamEvent::ContextLoaded {
        tools_available, ..
    }) = events
        .iter()
        .find(|e| matches!(e, StreamEvent::ContextLoaded { .. }))
    else {
        panic!("missing contextLoaded");
    };
    assert!(tools_available.contains(&"generate_document".to_string()));

    let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
    let start = kinds.iter().position(|k| *k == "toolStart").unwrap();
    let end = kinds.iter().position(|k| *k == "toolEnd").unwrap();
    let first_chunk = kinds.iter().position(|k| *k == "chunk").unwrap();
    assert!(start < end);
    assert!(end < first_chunk);
    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::Artifact {
            subtype: ArtifactKind::Document,
            ..
        }
    )));
    assert!(events
        .iter()
        .any(|e| *e == StreamEvent::status(StreamPhase::ToolExecution)));
    assert_eq!(text_of(&events), "I drafted the memo.");

    let messages = h.conversations.get_messages(thread_id, 10).await.unwrap();
    assert_eq!(messages[1].metadata.tools_used, vec!["generate_document".to_string()]);
}

#[tokio::test]
async fn test_backend_failure_ends_with_error_event() {
    let h = harness(MockCompletionBackend::new().with_failure());
    let turn = h
        .orchestrator
        .prepare(principal(), request("anything"))
        .await
        .unwrap();
    let thread_id = turn.thread.id;
    let events = collect_events(h.orchestrator.start(turn)).await;

    match events.last() {
        Some(StreamEvent::Error {
            code, recoverable, ..
        }) => {
            assert_eq!(*code, ErrorCode::UpstreamUnavailable);
            assert!(*recoverable);
        }
        other => panic!("expected error event, got {:?}", other),
    }
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Done { .. })));
    assert_eq!(h.conversations.count_messages(thread_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_foreign_thread_is_not_found() {
    let h = harness(MockCompletionBackend::new());
    let thread = h
        .conversations
        .create_thread("someone-else", Some("private"))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .prepare(
            principal(),
            ChatRequest {
                message: "hello".into(),
                thread_id: Some(thread.id),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_autonomous_turn_uses_tools() {
    let backend = MockCompletionBackend::new()
        .with_scripted(CompletionResponse::text(
            r#"{"tasks":[{"id":"chart","description":"Chart headcount by team"}]}"#,
        ))
        .with_scripted(CompletionResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: "create_chart".into(),
                arguments_json: r#"{"chartType":"pie","title":"Headcount","labels":["Ops","Eng"],"datasets":[{"label":"people","data":[4,9]}]}"#.into(),
            }],
            usage: Default::default(),
        })
        .with_scripted(CompletionResponse::text("Chart ready\nCONFIDENCE: 0.9"))
        .with_default_response("Here is the headcount chart.");
    let h = harness(backend);

    let turn = h
        .orchestrator
        .prepare(
            principal(),
            ChatRequest {
                message: "Chart our headcount".into(),
                autonomous: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let thread_id = turn.thread.id;
    let events = collect_events(h.orchestrator.start(turn)).await;

    let Some(StreamEvent::ContextLoaded {
        tools_available, ..
    }) = events
        .iter()
        .find(|e| matches!(e, StreamEvent::ContextLoaded { .. }))
    else {
        panic!("missing contextLoaded");
    };
    assert!(tools_available.contains(&"create_chart".to_string()));

    let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
    let task_started = kinds.iter().position(|k| *k == "agentTaskStarted").unwrap();
    let tool_start = kinds.iter().position(|k| *k == "toolStart").unwrap();
    let task_done = kinds.iter().position(|k| *k == "agentTaskCompleted").unwrap();
    assert!(task_started < tool_start && tool_start < task_done);
    assert!(events.iter().any(|e| matches!(
        e,
        StreamEvent::Artifact {
            subtype: ArtifactKind::Chart,
            ..
        }
    )));
    assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));

    let messages = h.conversations.get_messages(thread_id, 10).await.unwrap();
    assert_eq!(messages[1].content, "Here is the headcount chart.");
    assert_eq!(messages[1].metadata.tools_used, vec!["create_chart".to_string()]);
    assert!(messages[1].metadata.autonomous);
}
