//! Tool runtime: the [`Tool`] trait, the registry that validates and runs
//! calls, the progress sink, and the built-in tools.

mod chart;
mod data_source;
mod document;
mod registry;
mod search;
mod sink;
mod validation;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use sage_core::{ArtifactKind, Result, ToolDefinition};

pub use chart::CreateChartTool;
pub use data_source::QueryDataSourceTool;
pub use document::GenerateDocumentTool;
pub use registry::ToolRegistry;
pub use search::SearchKnowledgeBaseTool;
pub use sink::{ToolEvent, ToolEventSink};
pub use validation::validate_arguments;

/// Request-scoped facts a tool may consult.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub category_ids: Vec<String>,
}

/// Result of a successful tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Returned to the model as the tool message.
    pub content: JsonValue,
    /// Surfaced to the client immediately.
    pub artifact: Option<(ArtifactKind, JsonValue)>,
}

impl ToolOutput {
    pub fn new(content: JsonValue) -> Self {
        Self {
            content,
            artifact: None,
        }
    }

    pub fn with_artifact(mut self, kind: ArtifactKind, payload: JsonValue) -> Self {
        self.artifact = Some((kind, payload));
        self
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Human-facing label shown in `toolStart`.
    fn display_name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> JsonValue;

    /// Categories the tool is limited to; empty means unrestricted.
    fn categories(&self) -> &[String] {
        &[]
    }

    /// Run with arguments already validated against [`parameters`](Self::parameters).
    async fn execute(&self, args: JsonValue, ctx: &ToolContext) -> Result<ToolOutput>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}
