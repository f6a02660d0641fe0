//! Chat completion request/response types.
//!
//! These are provider-neutral; `sage-inference` maps them onto the
//! OpenAI-compatible wire format.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Result;
use crate::models::MessageRole;

/// Stream of text deltas from a streaming completion.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One part of a multi-part user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    /// Image as a URL or `data:` URI.
    ImageUrl { url: String },
}

/// Message body: plain text or text-plus-images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Build a user body from text and base64 images.
    ///
    /// Images without a `data:` prefix are assumed to be PNG.
    pub fn with_images(text: impl Into<String>, images: &[String]) -> Self {
        let text = text.into();
        if images.is_empty() {
            return MessageContent::Text(text);
        }
        let mut parts = Vec::with_capacity(images.len() + 1);
        parts.push(ContentPart::Text { text });
        for image in images {
            let url = if image.starts_with("data:") || image.starts_with("http") {
                image.clone()
            } else {
                format!("data:image/png;base64,{}", image)
            };
            parts.push(ContentPart::ImageUrl { url });
        }
        MessageContent::Parts(parts)
    }

    /// Concatenated text of the message, images omitted.
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string as produced by the model.
    pub arguments_json: String,
}

/// Tool advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: JsonValue,
}

/// Message in a completion conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::System, content.into())
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::Assistant, content.into())
    }

    /// Assistant turn that requested tools.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Text(content.into()),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Result of one tool call, correlated by call id.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: MessageContent::Text(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    fn plain(role: MessageRole, content: String) -> Self {
        Self {
            role,
            content: MessageContent::Text(content),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// Token accounting reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Response from a tool-capable completion call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Text content, empty when the model only requested tools.
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl CompletionResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            usage: TokenUsage::default(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_images_none_is_plain_text() {
        let c = MessageContent::with_images("hello", &[]);
        assert_eq!(c, MessageContent::Text("hello".into()));
    }

    #[test]
    fn test_with_images_adds_data_uri() {
        let c = MessageContent::with_images("look", &["QUJD".to_string()]);
        match c {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(
                    parts[1],
                    ContentPart::ImageUrl {
                        url: "data:image/png;base64,QUJD".into()
                    }
                );
            }
            _ => panic!("expected parts"),
        }
    }

    #[test]
    fn test_with_images_keeps_existing_data_uri() {
        let img = "data:image/jpeg;base64,AAAA".to_string();
        let c = MessageContent::with_images("x", &[img.clone()]);
        let MessageContent::Parts(parts) = c else {
            panic!("expected parts")
        };
        assert_eq!(parts[1], ContentPart::ImageUrl { url: img });
    }

    #[test]
    fn test_as_text_skips_images() {
        let c = MessageContent::with_images("caption", &["QUJD".to_string()]);
        assert_eq!(c.as_text(), "caption");
    }

    #[test]
    fn test_tool_result_message() {
        let m = ChatMessage::tool_result("call_1", "{}");
        assert_eq!(m.role, MessageRole::Tool);
        assert_eq!(m.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_usage_add() {
        let mut total = TokenUsage::default();
        total.add(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        total.add(TokenUsage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
        });
        assert_eq!(total.total_tokens, 17);
        assert_eq!(total.prompt_tokens, 11);
    }
}
