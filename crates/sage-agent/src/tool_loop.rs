//! Bounded completion loop with tool execution.
//!
//! The model is called, any tool calls it requests run in order, their
//! results are appended, and the model is called again. The loop stops on
//! the first response without tool calls or after `max_iterations` tool
//! rounds, so the model is called at most `max_iterations + 1` times.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use sage_core::defaults;
use sage_core::{
    ChatMessage, CompletionBackend, Error, MessageContent, MessageRole, Result, StreamEvent,
    TokenUsage,
};

use crate::context::user_turn;
use crate::tools::{ToolContext, ToolEventSink, ToolRegistry};

#[derive(Debug, Clone, Default)]
pub struct ToolLoopRequest {
    pub system_prompt: String,
    pub history: Vec<ChatMessage>,
    /// Rendered context block placed ahead of the question.
    pub context: String,
    pub message: String,
    pub enable_tools: bool,
    pub category_ids: Vec<String>,
    /// Base64 images or `data:` URIs attached to the final user turn.
    pub images: Vec<String>,
}

impl ToolLoopRequest {
    /// Conversation sent on the first model call.
    pub fn initial_messages(&self) -> Vec<ChatMessage> {
        let mut messages = self.history.clone();
        messages.push(ChatMessage::user(MessageContent::with_images(
            user_turn(&self.context, &self.message),
            &self.images,
        )));
        messages
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolLoopOutcome {
    /// Final model text; empty if the ceiling was hit on a tool-only turn.
    pub content: String,
    /// Every message exchanged, excluding the system prompt.
    pub full_history: Vec<ChatMessage>,
    /// Tool rounds executed.
    pub iterations: usize,
    pub usage: TokenUsage,
    /// Names of tools called, in call order.
    pub tools_used: Vec<String>,
}

impl ToolLoopOutcome {
    /// `(tool name, result body)` for every call made, in call order.
    pub fn tool_results(&self) -> Vec<(String, String)> {
        self.full_history
            .iter()
            .filter(|m| m.role == MessageRole::Tool)
            .zip(&self.tools_used)
            .map(|(m, name)| (name.clone(), m.content.as_text()))
            .collect()
    }
}

pub struct ToolLoop {
    backend: Arc<dyn CompletionBackend>,
    tools: Arc<ToolRegistry>,
    max_iterations: usize,
}

impl ToolLoop {
    pub fn new(backend: Arc<dyn CompletionBackend>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            backend,
            tools,
            max_iterations: defaults::TOOL_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Names of tools advertised for a request.
    pub fn tools_available(&self, request: &ToolLoopRequest) -> Vec<String> {
        if request.enable_tools {
            self.tools.names(&request.category_ids)
        } else {
            Vec::new()
        }
    }

    #[instrument(
        skip(self, request, sink),
        fields(subsystem = "agent", component = "tool_loop", op = "complete_with_tools", iteration)
    )]
    pub async fn complete_with_tools(
        &self,
        request: ToolLoopRequest,
        sink: &ToolEventSink,
    ) -> Result<ToolLoopOutcome> {
        let definitions = if request.enable_tools {
            self.tools.definitions(&request.category_ids)
        } else {
            Vec::new()
        };
        let ctx = ToolContext {
            category_ids: request.category_ids.clone(),
        };

        let mut outcome = ToolLoopOutcome {
            full_history: request.initial_messages(),
            ..Default::default()
        };

        loop {
            let response = self
                .backend
                .complete_with_tools(&request.system_prompt, &outcome.full_history, &definitions)
                .await?;
            outcome.usage.add(response.usage);

            if !response.has_tool_calls() {
                outcome.full_history.push(ChatMessage::assistant(&response.content));
                outcome.content = response.content;
                break;
            }

            if outcome.iterations >= self.max_iterations {
                warn!(
                    iterations = outcome.iterations,
                    pending_calls = response.tool_calls.len(),
                    "Tool iteration ceiling reached, returning last content"
                );
                outcome.content = response.content;
                break;
            }

            outcome.iterations += 1;
            tracing::Span::current().record("iteration", outcome.iterations);
            debug!(
                call_count = response.tool_calls.len(),
                "Model requested tools"
            );

            let calls = response.tool_calls.clone();
            outcome
                .full_history
                .push(ChatMessage::assistant_with_tools(response.content, response.tool_calls));

            for call in &calls {
                if sink.is_closed() {
                    debug!(tool = %call.name, "Receiver gone, not starting tool");
                    return Err(Error::Aborted);
                }
                let body = self.tools.execute_call(call, &ctx, sink).await;
                outcome.tools_used.push(call.name.clone());
                outcome
                    .full_history
                    .push(ChatMessage::tool_result(&call.id, body));
            }

            if sink.is_closed() {
                return Err(Error::Aborted);
            }
        }

        info!(
            iterations = outcome.iterations,
            total_tokens = outcome.usage.total_tokens,
            "Completion finished"
        );
        Ok(outcome)
    }

    /// [`Self::complete_with_tools`] with tool progress forwarded onto
    /// `events`. Dropping the receiving end of `events` aborts the loop
    /// before its next tool call.
    pub async fn complete_bridged(
        &self,
        request: ToolLoopRequest,
        events: &mpsc::Sender<StreamEvent>,
        capacity: usize,
    ) -> Result<ToolLoopOutcome> {
        let (sink, mut tool_events) = ToolEventSink::channel(capacity.max(1));

        let bridge_tx = events.clone();
        let bridge = async move {
            while let Some(event) = tool_events.recv().await {
                if bridge_tx.send(StreamEvent::from(event)).await.is_err() {
                    break;
                }
            }
        };
        let run = async move {
            let result = self.complete_with_tools(request, &sink).await;
            drop(sink);
            result
        };

        let (outcome, ()) = tokio::join!(run, bridge);
        outcome
    }
}
