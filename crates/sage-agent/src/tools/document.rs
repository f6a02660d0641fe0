use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use sage_core::{ArtifactKind, Error, Result};

use super::{Tool, ToolContext, ToolOutput};

const FORMATS: [&str; 3] = ["markdown", "html", "text"];

/// Produces a document artifact from model-written content.
#[derive(Debug, Default)]
pub struct GenerateDocumentTool;

impl GenerateDocumentTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for GenerateDocumentTool {
    fn name(&self) -> &str {
        "generate_document"
    }

    fn display_name(&self) -> &str {
        "Generating document"
    }

    fn description(&self) -> &str {
        "Create a downloadable document (report, memo, checklist) from content you write."
    }

    fn parameters(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "content": {"type": "string", "description": "Full document body"},
                "format": {"type": "string", "enum": FORMATS}
            },
            "required": ["title", "content"]
        })
    }

    async fn execute(&self, args: JsonValue, _ctx: &ToolContext) -> Result<ToolOutput> {
        let title = args["title"].as_str().unwrap_or_default().trim();
        let content = args["content"].as_str().unwrap_or_default();
        if title.is_empty() || content.trim().is_empty() {
            return Err(Error::Tool("Document title and content must not be empty".into()));
        }
        let format = args["format"].as_str().unwrap_or("markdown");

        let id = Uuid::now_v7();
        let payload = json!({
            "id": id,
            "title": title,
            "format": format,
            "content": content,
            "createdAt": Utc::now(),
        });
        Ok(ToolOutput::new(json!({
            "status": "created",
            "documentId": id,
            "title": title,
        }))
        .with_artifact(ArtifactKind::Document, payload))
    }
}
