//! OpenAI-compatible inference backend implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, instrument, warn};

use sage_core::defaults;
use sage_core::{
    ChatMessage, CompletionBackend, CompletionResponse, EmbeddingBackend, Error, Result,
    TokenStream, TokenUsage, ToolDefinition,
};

use super::error::{to_sage_error, CallKind, OpenAIErrorCode};
use super::streaming::parse_sse_stream;
use super::types::*;

/// Configuration for OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Base URL for the API endpoint.
    pub base_url: String,
    /// API key for authentication (optional for local endpoints).
    pub api_key: Option<String>,
    pub embed_model: String,
    pub gen_model: String,
    /// Expected embedding dimension.
    pub embed_dimension: usize,
    pub timeout_seconds: u64,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::OPENAI_URL.to_string(),
            api_key: None,
            embed_model: defaults::EMBED_MODEL.to_string(),
            gen_model: defaults::GEN_MODEL.to_string(),
            embed_dimension: defaults::EMBED_DIMENSION,
            timeout_seconds: defaults::GEN_TIMEOUT_SECS,
            temperature: Some(defaults::GEN_TEMPERATURE),
            max_tokens: Some(defaults::GEN_MAX_TOKENS),
        }
    }
}

impl OpenAIConfig {
    /// Read configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `OPENAI_BASE_URL` | `https://api.openai.com/v1` |
    /// | `OPENAI_API_KEY` | (none) |
    /// | `OPENAI_EMBED_MODEL` | `text-embedding-3-small` |
    /// | `OPENAI_GEN_MODEL` | `gpt-4o-mini` |
    /// | `OPENAI_EMBED_DIM` | `1536` |
    /// | `OPENAI_TIMEOUT` | `120` |
    /// | `OPENAI_TEMPERATURE` | `0.3` |
    /// | `OPENAI_MAX_TOKENS` | `2048` |
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(base.base_url),
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            embed_model: std::env::var("OPENAI_EMBED_MODEL").unwrap_or(base.embed_model),
            gen_model: std::env::var("OPENAI_GEN_MODEL").unwrap_or(base.gen_model),
            embed_dimension: std::env::var("OPENAI_EMBED_DIM")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(base.embed_dimension),
            timeout_seconds: std::env::var("OPENAI_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(base.timeout_seconds),
            temperature: std::env::var("OPENAI_TEMPERATURE")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(base.temperature),
            max_tokens: std::env::var("OPENAI_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok())
                .or(base.max_tokens),
        }
    }
}

/// OpenAI-compatible embedding and completion backend.
///
/// Works with OpenAI, Azure OpenAI, Ollama's `/v1`, vLLM, and other
/// servers exposing the same endpoints.
pub struct OpenAIBackend {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIBackend {
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Inference(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "openai",
            url = %config.base_url,
            embed_model = %config.embed_model,
            gen_model = %config.gen_model,
            "Initializing OpenAI backend"
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(OpenAIConfig::from_env())
    }

    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    /// Build a request with authentication if configured.
    fn build_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut req = self.client.post(&url);

        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        req.header("Content-Type", "application/json")
    }

    fn chat_request(
        &self,
        messages: Vec<WireMessage>,
        tools: &[ToolDefinition],
        stream: bool,
    ) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.config.gen_model.clone(),
            messages,
            tool_choice: (!tools.is_empty()).then(|| "auto".to_string()),
            tools: tools.iter().map(WireTool::from).collect(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream,
        }
    }

    /// Turn a non-success response into a sage error.
    async fn error_from_response(response: reqwest::Response, kind: CallKind) -> Error {
        let status = response.status();
        let body: Option<OpenAIErrorResponse> = response.json().await.ok();
        let (message, error_type) = body
            .map(|b| (b.error.message, b.error.error_type))
            .unwrap_or_else(|| ("Unknown error".to_string(), "unknown".to_string()));
        let code = OpenAIErrorCode::from_response(status.as_u16(), &error_type);
        warn!(
            subsystem = "inference",
            component = "openai",
            status = status.as_u16(),
            retryable = code.is_retryable(),
            error = %message,
            "OpenAI request failed"
        );
        to_sage_error(code, kind, &format!("OpenAI returned {}: {}", status, message))
    }

    async fn send_chat(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse> {
        let response = self
            .build_request("/chat/completions")
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response, CallKind::Completion).await);
        }

        response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse response: {}", e)))
    }

    /// Probe `/models`; false when the endpoint is unreachable or unhappy.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/models", self.config.base_url.trim_end_matches('/'));
        let mut req = self.client.get(&url).timeout(Duration::from_secs(5));
        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }
        match req.send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                warn!(status = resp.status().as_u16(), "OpenAI health check failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "OpenAI health check error");
                false
            }
        }
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAIBackend {
    #[instrument(skip(self, texts), fields(subsystem = "inference", component = "openai", op = "embed_texts", input_count = texts.len()))]
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let request = EmbeddingRequest {
            model: self.config.embed_model.clone(),
            input: texts.to_vec(),
            encoding_format: Some("float".to_string()),
        };

        let response = self
            .build_request("/embeddings")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response, CallKind::Embedding).await);
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse response: {}", e)))?;

        let mut data = result.data;
        data.sort_by_key(|d| d.index);
        if data.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }

        debug!(result_count = data.len(), "Generated embeddings");
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.config.embed_dimension
    }

    fn model_name(&self) -> &str {
        &self.config.embed_model
    }
}

#[async_trait]
impl CompletionBackend for OpenAIBackend {
    #[instrument(skip(self, system, history, user_content), fields(subsystem = "inference", component = "openai", op = "complete", prompt_len = user_content.len()))]
    async fn complete(
        &self,
        system: &str,
        history: &[ChatMessage],
        user_content: &str,
    ) -> Result<String> {
        let mut messages = build_messages(system, history);
        messages.push(WireMessage::from(&ChatMessage::user(user_content)));
        let request = self.chat_request(messages, &[], false);

        let result = self.send_chat(&request).await?;
        let content = result
            .choices
            .first()
            .map(|c| c.message.text())
            .unwrap_or_default();

        debug!(response_len = content.len(), "Completion finished");
        Ok(content)
    }

    #[instrument(skip(self, system, messages, tools), fields(subsystem = "inference", component = "openai", op = "complete_with_tools", message_count = messages.len(), tool_count = tools.len()))]
    async fn complete_with_tools(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<CompletionResponse> {
        let request = self.chat_request(build_messages(system, messages), tools, false);
        let result = self.send_chat(&request).await?;

        let usage = result
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        let Some(choice) = result.choices.into_iter().next() else {
            return Err(Error::Inference("Completion returned no choices".into()));
        };

        let content = choice.message.text();
        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(Into::into)
            .collect::<Vec<_>>();

        debug!(
            response_len = content.len(),
            tool_calls = tool_calls.len(),
            finish_reason = ?choice.finish_reason,
            "Completion finished"
        );

        Ok(CompletionResponse {
            content,
            tool_calls,
            usage,
        })
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn complete_stream(&self, system: &str, messages: &[ChatMessage]) -> Result<TokenStream> {
        let request = self.chat_request(build_messages(system, messages), &[], true);

        let response = self
            .build_request("/chat/completions")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response, CallKind::Completion).await);
        }

        Ok(parse_sse_stream(response.bytes_stream()))
    }

    fn model_name(&self) -> &str {
        &self.config.gen_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OpenAIConfig::default();
        assert_eq!(config.base_url, defaults::OPENAI_URL);
        assert_eq!(config.embed_model, defaults::EMBED_MODEL);
        assert_eq!(config.gen_model, defaults::GEN_MODEL);
        assert_eq!(config.embed_dimension, defaults::EMBED_DIMENSION);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_model_name_accessors() {
        let config = OpenAIConfig {
            embed_model: "test-embed".to_string(),
            gen_model: "test-gen".to_string(),
            embed_dimension: 512,
            ..Default::default()
        };
        let backend = OpenAIBackend::new(config).unwrap();
        assert_eq!(EmbeddingBackend::model_name(&backend), "test-embed");
        assert_eq!(CompletionBackend::model_name(&backend), "test-gen");
        assert_eq!(backend.dimension(), 512);
        assert!(backend.supports_streaming());
    }

    #[test]
    fn test_chat_request_tool_choice_only_with_tools() {
        let backend = OpenAIBackend::new(OpenAIConfig::default()).unwrap();
        let req = backend.chat_request(vec![], &[], false);
        assert!(req.tool_choice.is_none());

        let tool = ToolDefinition {
            name: "t".into(),
            description: "d".into(),
            parameters: serde_json::json!({"type": "object"}),
        };
        let req = backend.chat_request(vec![], &[tool], false);
        assert_eq!(req.tool_choice.as_deref(), Some("auto"));
        assert_eq!(req.tools.len(), 1);
    }
}
