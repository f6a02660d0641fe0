//! Mock inference backends for deterministic testing.
//!
//! Embeddings are derived from the input characters so the same text always
//! maps to the same unit vector. Completions come from a scripted queue,
//! then substring mappings, then a default response.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sage_inference::mock::{MockCompletionBackend, MockEmbeddingBackend};
//! use sage_core::CompletionResponse;
//!
//! let embedder = MockEmbeddingBackend::new().with_dimension(64);
//! let llm = MockCompletionBackend::new()
//!     .with_default_response("fallback")
//!     .with_scripted(CompletionResponse::text("first answer"));
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use sage_core::{
    ChatMessage, CompletionBackend, CompletionResponse, EmbeddingBackend, Error, Result,
    TokenStream, ToolDefinition,
};

/// Deterministic embedding generator.
pub struct MockEmbeddingGenerator;

impl MockEmbeddingGenerator {
    /// Generate a deterministic unit vector from text.
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0; dimension.max(1)];
        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % vec.len();
            vec[idx] += 0.1;
        }
        Self::normalize(&mut vec);
        vec
    }

    /// Unit vector along one axis. Two different axes are orthogonal.
    pub fn axis(index: usize, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0; dimension.max(1)];
        vec[index % dimension.max(1)] = 1.0;
        vec
    }

    fn normalize(vec: &mut [f32]) {
        let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vec.iter_mut().for_each(|x| *x /= magnitude);
        }
    }
}

// =============================================================================
// EMBEDDINGS
// =============================================================================

/// Mock embedding backend.
#[derive(Clone)]
pub struct MockEmbeddingBackend {
    dimension: usize,
    overrides: Arc<HashMap<String, Vec<f32>>>,
    fail_on: Arc<HashSet<String>>,
    fail_all: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockEmbeddingBackend {
    pub fn new() -> Self {
        Self {
            dimension: 16,
            overrides: Arc::new(HashMap::new()),
            fail_on: Arc::new(HashSet::new()),
            fail_all: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Return `vector` whenever `text` is embedded.
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        Arc::make_mut(&mut self.overrides).insert(text.into(), vector);
        self
    }

    /// Fail any batch that contains `text`.
    pub fn with_failure_on(mut self, text: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.fail_on).insert(text.into());
        self
    }

    /// Fail every call.
    pub fn with_failure(self) -> Self {
        self.fail_all.store(true, Ordering::SeqCst);
        self
    }

    /// Number of `embed_texts` calls made.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Size of each batch, in call order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.calls
            .lock()
            .map(|c| c.iter().map(Vec::len).collect())
            .unwrap_or_default()
    }

    /// Every text embedded so far, in call order.
    pub fn embedded_texts(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|c| c.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MockEmbeddingBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(texts.to_vec());
        }

        if self.fail_all.load(Ordering::SeqCst) || texts.iter().any(|t| self.fail_on.contains(t))
        {
            return Err(Error::Embedding("Simulated embedding failure".into()));
        }

        Ok(texts
            .iter()
            .map(|t| {
                self.overrides
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| MockEmbeddingGenerator::generate(t, self.dimension))
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}

// =============================================================================
// COMPLETIONS
// =============================================================================

/// One recorded completion call.
#[derive(Debug, Clone)]
pub struct MockCall {
    /// `complete`, `complete_with_tools`, or `complete_stream`.
    pub operation: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub tool_names: Vec<String>,
}

impl MockCall {
    /// Text of the last message in the call.
    pub fn last_message_text(&self) -> String {
        self.messages
            .last()
            .map(|m| m.content.as_text())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
struct StreamScript {
    deltas: Vec<String>,
    delay: Duration,
}

/// Mock completion backend.
#[derive(Clone)]
pub struct MockCompletionBackend {
    scripted: Arc<Mutex<VecDeque<CompletionResponse>>>,
    mappings: Arc<Vec<(String, String)>>,
    default_response: String,
    stream: Option<StreamScript>,
    fail_all: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockCompletionBackend {
    pub fn new() -> Self {
        Self {
            scripted: Arc::new(Mutex::new(VecDeque::new())),
            mappings: Arc::new(Vec::new()),
            default_response: "Mock response".to_string(),
            stream: None,
            fail_all: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = response.into();
        self
    }

    /// Queue a response; queued responses are served before anything else.
    pub fn with_scripted(self, response: CompletionResponse) -> Self {
        self.push_scripted(response);
        self
    }

    pub fn push_scripted(&self, response: CompletionResponse) {
        if let Ok(mut q) = self.scripted.lock() {
            q.push_back(response);
        }
    }

    /// Answer with `output` when the system prompt or last message contains `needle`.
    pub fn with_response_mapping(
        mut self,
        needle: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Arc::make_mut(&mut self.mappings).push((needle.into(), output.into()));
        self
    }

    /// Enable real streaming with the given deltas.
    pub fn with_stream(mut self, deltas: Vec<String>, delay: Duration) -> Self {
        self.stream = Some(StreamScript { deltas, delay });
        self
    }

    pub fn with_failure(self) -> Self {
        self.fail_all.store(true, Ordering::SeqCst);
        self
    }

    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn record(&self, operation: &str, system: &str, messages: &[ChatMessage], tools: &[ToolDefinition]) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(MockCall {
                operation: operation.to_string(),
                system: system.to_string(),
                messages: messages.to_vec(),
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
            });
        }
    }

    fn check_failure(&self) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            Err(Error::Inference("Simulated completion failure".into()))
        } else {
            Ok(())
        }
    }

    fn next_response(&self, system: &str, messages: &[ChatMessage]) -> CompletionResponse {
        if let Some(r) = self.scripted.lock().ok().and_then(|mut q| q.pop_front()) {
            return r;
        }
        let last = messages
            .last()
            .map(|m| m.content.as_text())
            .unwrap_or_default();
        for (needle, output) in self.mappings.iter() {
            if last.contains(needle.as_str()) || system.contains(needle.as_str()) {
                return CompletionResponse::text(output.clone());
            }
        }
        CompletionResponse::text(self.default_response.clone())
    }
}

impl Default for MockCompletionBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionBackend for MockCompletionBackend {
    async fn complete(
        &self,
        system: &str,
        history: &[ChatMessage],
        user_content: &str,
    ) -> Result<String> {
        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(user_content));
        self.record("complete", system, &messages, &[]);
        self.check_failure()?;
        Ok(self.next_response(system, &messages).content)
    }

    async fn complete_with_tools(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<CompletionResponse> {
        self.record("complete_with_tools", system, messages, tools);
        self.check_failure()?;
        Ok(self.next_response(system, messages))
    }

    fn supports_streaming(&self) -> bool {
        self.stream.is_some()
    }

    async fn complete_stream(&self, system: &str, messages: &[ChatMessage]) -> Result<TokenStream> {
        self.record("complete_stream", system, messages, &[]);
        self.check_failure()?;

        let script = match &self.stream {
            Some(script) => script.clone(),
            None => StreamScript {
                deltas: vec![self.next_response(system, messages).content],
                delay: Duration::ZERO,
            },
        };

        let deltas: VecDeque<String> = script.deltas.into();
        let delay = script.delay;
        let stream = futures::stream::unfold(deltas, move |mut rest| async move {
            let next = rest.pop_front()?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Some((Ok(next), rest))
        });
        Ok(Box::pin(stream))
    }

    fn model_name(&self) -> &str {
        "mock-gen"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use sage_core::{cosine_similarity, ToolCall};

    #[test]
    fn test_embedding_generator_deterministic() {
        let e1 = MockEmbeddingGenerator::generate("test", 256);
        let e2 = MockEmbeddingGenerator::generate("test", 256);
        assert_eq!(e1, e2);
    }

    #[test]
    fn test_embedding_generator_normalized() {
        let embedding = MockEmbeddingGenerator::generate("test", 128);
        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 0.01, "Should be normalized");
    }

    #[test]
    fn test_axis_vectors_orthogonal() {
        let a = MockEmbeddingGenerator::axis(0, 8);
        let b = MockEmbeddingGenerator::axis(1, 8);
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_embedding_overrides_and_failures() {
        let backend = MockEmbeddingBackend::new()
            .with_dimension(4)
            .with_vector("pinned", vec![1.0, 0.0, 0.0, 0.0])
            .with_failure_on("bad");

        let out = backend.embed_texts(&["pinned".into()]).await.unwrap();
        assert_eq!(out[0], vec![1.0, 0.0, 0.0, 0.0]);

        assert!(backend
            .embed_texts(&["ok".into(), "bad".into()])
            .await
            .is_err());
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn test_completion_scripted_then_mapping_then_default() {
        let backend = MockCompletionBackend::new()
            .with_default_response("default")
            .with_response_mapping("summarize", "a summary")
            .with_scripted(CompletionResponse {
                content: String::new(),
                tool_calls: vec![ToolCall {
                    id: "c1".into(),
                    name: "search_knowledge_base".into(),
                    arguments_json: "{}".into(),
                }],
                usage: Default::default(),
            });

        let first = backend
            .complete_with_tools("sys", &[ChatMessage::user("hi")], &[])
            .await
            .unwrap();
        assert!(first.has_tool_calls());

        let mapped = backend.complete("", &[], "please summarize").await.unwrap();
        assert_eq!(mapped, "a summary");

        let fallback = backend.complete("", &[], "hello").await.unwrap();
        assert_eq!(fallback, "default");
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_completion_stream_deltas() {
        let backend = MockCompletionBackend::new()
            .with_stream(vec!["a".into(), "b".into()], Duration::ZERO);
        assert!(backend.supports_streaming());

        let stream = backend.complete_stream("", &[]).await.unwrap();
        let out: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(out, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_completion_failure() {
        let backend = MockCompletionBackend::new().with_failure();
        let err = backend.complete("", &[], "x").await.unwrap_err();
        assert!(err.is_recoverable());
    }
}
