use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use tracing::{debug, instrument, warn};

use sage_core::{Error, Result, ToolCall, ToolDefinition, ToolExecutionState};

use super::sink::{ToolEvent, ToolEventSink};
use super::validation::validate_arguments;
use super::{Tool, ToolContext, ToolOutput};

/// Named tools, kept in registration order.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any earlier tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn allowed(tool: &dyn Tool, category_ids: &[String]) -> bool {
        let restricted = tool.categories();
        restricted.is_empty()
            || restricted
                .iter()
                .any(|c| category_ids.iter().any(|r| c.eq_ignore_ascii_case(r)))
    }

    /// Tools usable for a request in these categories.
    pub fn available(&self, category_ids: &[String]) -> Vec<&Arc<dyn Tool>> {
        self.tools
            .iter()
            .filter(|t| Self::allowed(t.as_ref(), category_ids))
            .collect()
    }

    pub fn definitions(&self, category_ids: &[String]) -> Vec<ToolDefinition> {
        self.available(category_ids)
            .into_iter()
            .map(|t| t.definition())
            .collect()
    }

    pub fn names(&self, category_ids: &[String]) -> Vec<String> {
        self.available(category_ids)
            .into_iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    /// Execute one model-requested call, reporting progress through `sink`.
    ///
    /// Always yields the tool-message body; failures become
    /// `{"error": ..., "tool": ...}` rather than an `Err`.
    #[instrument(skip(self, call, ctx, sink), fields(subsystem = "agent", component = "tools", op = "execute", tool = %call.name))]
    pub async fn execute_call(
        &self,
        call: &ToolCall,
        ctx: &ToolContext,
        sink: &ToolEventSink,
    ) -> String {
        let display_name = self
            .get(&call.name)
            .map(|t| t.display_name().to_string())
            .unwrap_or_else(|| call.name.clone());
        sink.emit(ToolEvent::Started {
            name: call.name.clone(),
            display_name,
        })
        .await;

        let state = ToolExecutionState::start(&call.name);
        let (state, body) = match self.run(call, ctx).await {
            Ok(output) => {
                if let Some((kind, payload)) = output.artifact {
                    sink.emit(ToolEvent::Artifact { kind, payload }).await;
                }
                debug!("Tool succeeded");
                (state.succeed(), output.content.to_string())
            }
            Err(e) => {
                warn!(error = %e, "Tool failed");
                let message = e.to_string();
                let body = error_body(&call.name, &message);
                (state.fail(message), body)
            }
        };
        sink.emit(ToolEvent::Finished(state)).await;
        body
    }

    async fn run(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolOutput> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| Error::Tool(format!("Unknown tool '{}'", call.name)))?;
        if !Self::allowed(tool.as_ref(), &ctx.category_ids) {
            return Err(Error::Tool(format!(
                "Tool '{}' is not available for this request",
                call.name
            )));
        }

        let raw = if call.arguments_json.trim().is_empty() {
            "{}"
        } else {
            call.arguments_json.as_str()
        };
        let args: JsonValue = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidInput(format!("Arguments are not valid JSON: {}", e)))?;
        validate_arguments(&tool.parameters(), &args)?;

        tool.execute(args, ctx).await
    }
}

fn error_body(tool: &str, message: &str) -> String {
    json!({"error": message, "tool": tool}).to_string()
}
