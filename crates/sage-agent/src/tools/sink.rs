//! Tool progress delivery.

use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use sage_core::{ArtifactKind, StreamEvent, ToolExecutionState, ToolStatus};

/// Progress reported while tools run.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEvent {
    Started { name: String, display_name: String },
    Finished(ToolExecutionState),
    Artifact { kind: ArtifactKind, payload: JsonValue },
}

impl From<ToolEvent> for StreamEvent {
    fn from(event: ToolEvent) -> Self {
        match event {
            ToolEvent::Started { name, display_name } => StreamEvent::ToolStart { name, display_name },
            ToolEvent::Finished(state) => StreamEvent::ToolEnd {
                success: state.status == ToolStatus::Success,
                duration_ms: state.duration_ms.unwrap_or(0),
                error: state.error,
                name: state.name,
            },
            ToolEvent::Artifact { kind, payload } => StreamEvent::Artifact {
                subtype: kind,
                payload,
            },
        }
    }
}

/// Sending half for [`ToolEvent`]s. Cloning shares the channel.
#[derive(Debug, Clone, Default)]
pub struct ToolEventSink {
    tx: Option<mpsc::Sender<ToolEvent>>,
}

impl ToolEventSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ToolEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything.
    pub fn noop() -> Self {
        Self { tx: None }
    }

    /// Deliver an event. Returns false once the receiver is gone.
    pub async fn emit(&self, event: ToolEvent) -> bool {
        match &self.tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => true,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map(|tx| tx.is_closed()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_delivers_in_order() {
        let (sink, mut rx) = ToolEventSink::channel(4);
        sink.emit(ToolEvent::Started {
            name: "create_chart".into(),
            display_name: "Creating chart".into(),
        })
        .await;
        sink.emit(ToolEvent::Finished(ToolExecutionState::start("create_chart").succeed()))
            .await;

        assert!(matches!(rx.recv().await, Some(ToolEvent::Started { .. })));
        assert!(matches!(rx.recv().await, Some(ToolEvent::Finished(_))));
    }

    #[tokio::test]
    async fn test_emit_reports_closed_receiver() {
        let (sink, rx) = ToolEventSink::channel(1);
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.emit(ToolEvent::Artifact { kind: ArtifactKind::Chart, payload: json!({}) }).await);
    }

    #[tokio::test]
    async fn test_noop_never_closed() {
        let sink = ToolEventSink::noop();
        assert!(!sink.is_closed());
        assert!(sink.emit(ToolEvent::Artifact { kind: ArtifactKind::Document, payload: json!({}) }).await);
    }

    #[test]
    fn test_finished_maps_to_tool_end() {
        let state = ToolExecutionState::start("query_data_source").fail("timeout");
        let event: StreamEvent = ToolEvent::Finished(state).into();
        match event {
            StreamEvent::ToolEnd { name, success, error, .. } => {
                assert_eq!(name, "query_data_source");
                assert!(!success);
                assert_eq!(error.as_deref(), Some("timeout"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
