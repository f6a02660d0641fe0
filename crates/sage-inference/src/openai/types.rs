//! OpenAI API request and response types.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use sage_core::{ChatMessage, ContentPart, MessageContent, ToolCall, ToolDefinition};

// =============================================================================
// EMBEDDING TYPES
// =============================================================================

/// Request body for the embeddings endpoint.
#[derive(Debug, Serialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<String>,
}

/// Response from the embeddings endpoint.
#[derive(Debug, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
}

/// Single embedding data point.
#[derive(Debug, Deserialize)]
pub struct EmbeddingData {
    pub embedding: Vec<f32>,
    pub index: usize,
}

// =============================================================================
// CHAT COMPLETION TYPES
// =============================================================================

/// Request body for chat completions endpoint.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

/// Chat message in OpenAI wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<WireContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WirePart {
    Text { text: String },
    ImageUrl { image_url: WireImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// Tool advertised in a request.
#[derive(Debug, Clone, Serialize)]
pub struct WireTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: WireFunction,
}

#[derive(Debug, Clone, Serialize)]
pub struct WireFunction {
    pub name: String,
    pub description: String,
    pub parameters: JsonValue,
}

fn function_type() -> String {
    "function".to_string()
}

/// Response from chat completions endpoint.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
    pub usage: Option<ChatUsage>,
}

/// Single chat completion choice.
#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: WireMessage,
    pub finish_reason: Option<String>,
}

/// Token usage for chat completion request.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ChatUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

// =============================================================================
// STREAMING TYPES
// =============================================================================

/// Streaming chunk for chat completions.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    pub choices: Vec<ChatChunkChoice>,
}

/// Single choice in a streaming chunk.
#[derive(Debug, Deserialize)]
pub struct ChatChunkChoice {
    pub delta: ChatDelta,
}

/// Delta content in streaming response.
#[derive(Debug, Deserialize)]
pub struct ChatDelta {
    #[serde(default)]
    pub content: Option<String>,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Error response from OpenAI API.
#[derive(Debug, Deserialize)]
pub struct OpenAIErrorResponse {
    pub error: OpenAIError,
}

/// Detailed error information.
#[derive(Debug, Deserialize)]
pub struct OpenAIError {
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: String,
}

// =============================================================================
// CONVERSIONS
// =============================================================================

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            call_type: function_type(),
            function: WireFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments_json.clone(),
            },
        }
    }
}

impl From<WireToolCall> for ToolCall {
    fn from(call: WireToolCall) -> Self {
        Self {
            id: call.id,
            name: call.function.name,
            arguments_json: call.function.arguments,
        }
    }
}

impl From<&ToolDefinition> for WireTool {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            tool_type: function_type(),
            function: WireFunction {
                name: def.name.clone(),
                description: def.description.clone(),
                parameters: def.parameters.clone(),
            },
        }
    }
}

impl From<&MessageContent> for WireContent {
    fn from(content: &MessageContent) -> Self {
        match content {
            MessageContent::Text(t) => WireContent::Text(t.clone()),
            MessageContent::Parts(parts) => WireContent::Parts(
                parts
                    .iter()
                    .map(|p| match p {
                        ContentPart::Text { text } => WirePart::Text { text: text.clone() },
                        ContentPart::ImageUrl { url } => WirePart::ImageUrl {
                            image_url: WireImageUrl { url: url.clone() },
                        },
                    })
                    .collect(),
            ),
        }
    }
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        let tool_calls = if message.tool_calls.is_empty() {
            None
        } else {
            Some(message.tool_calls.iter().map(WireToolCall::from).collect())
        };
        Self {
            role: message.role.as_str().to_string(),
            content: Some(WireContent::from(&message.content)),
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

impl WireMessage {
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(WireContent::Text(content.to_string())),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Text content of a response message (empty if absent).
    pub fn text(&self) -> String {
        match &self.content {
            Some(WireContent::Text(t)) => t.clone(),
            Some(WireContent::Parts(parts)) => parts
                .iter()
                .filter_map(|p| match p {
                    WirePart::Text { text } => Some(text.as_str()),
                    WirePart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
            None => String::new(),
        }
    }
}

/// Prepend the system prompt (if any) to converted messages.
pub fn build_messages(system: &str, messages: &[ChatMessage]) -> Vec<WireMessage> {
    let mut wire = Vec::with_capacity(messages.len() + 1);
    if !system.is_empty() {
        wire.push(WireMessage::system(system));
    }
    wire.extend(messages.iter().map(WireMessage::from));
    wire
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_embedding_request_serialization() {
        let request = EmbeddingRequest {
            model: "text-embedding-3-small".to_string(),
            input: vec!["hello".to_string()],
            encoding_format: Some("float".to_string()),
        };
        let v = serde_json::to_value(&request).unwrap();
        assert_eq!(v["model"], "text-embedding-3-small");
        assert_eq!(v["encoding_format"], "float");
    }

    #[test]
    fn test_request_omits_empty_tools() {
        let request = ChatCompletionRequest {
            model: "m".into(),
            messages: build_messages("sys", &[ChatMessage::user("hi")]),
            tools: vec![],
            tool_choice: None,
            temperature: None,
            max_tokens: None,
            stream: false,
        };
        let v = serde_json::to_value(&request).unwrap();
        assert!(v.get("tools").is_none());
        assert_eq!(v["messages"][0]["role"], "system");
        assert_eq!(v["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_image_parts_wire_shape() {
        let msg = ChatMessage::user(MessageContent::with_images("see", &["QUJD".into()]));
        let v = serde_json::to_value(WireMessage::from(&msg)).unwrap();
        assert_eq!(v["content"][0], json!({"type": "text", "text": "see"}));
        assert_eq!(v["content"][1]["type"], "image_url");
        assert_eq!(
            v["content"][1]["image_url"]["url"],
            "data:image/png;base64,QUJD"
        );
    }

    #[test]
    fn test_assistant_tool_calls_wire_shape() {
        let msg = ChatMessage::assistant_with_tools(
            "",
            vec![ToolCall {
                id: "call_1".into(),
                name: "create_chart".into(),
                arguments_json: r#"{"title":"x"}"#.into(),
            }],
        );
        let v = serde_json::to_value(WireMessage::from(&msg)).unwrap();
        assert_eq!(v["tool_calls"][0]["type"], "function");
        assert_eq!(v["tool_calls"][0]["function"]["name"], "create_chart");
    }

    #[test]
    fn test_parse_tool_call_response() {
        let raw = json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "search_knowledge_base", "arguments": "{\"query\":\"q\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 2, "total_tokens": 5}
        });
        let parsed: ChatCompletionResponse = serde_json::from_value(raw).unwrap();
        let message = &parsed.choices[0].message;
        assert_eq!(message.text(), "");
        let call: ToolCall = message.tool_calls.clone().unwrap().remove(0).into();
        assert_eq!(call.name, "search_knowledge_base");
        assert_eq!(call.arguments_json, r#"{"query":"q"}"#);
    }
}
