//! Core traits for sage abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use uuid::Uuid;

use crate::completion::{ChatMessage, CompletionResponse, TokenStream, ToolDefinition};
use crate::error::Result;
use crate::models::*;

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Backend for generating text embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts.
    ///
    /// Returns one vector per input text, in input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Backend for chat completions.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Plain completion: system prompt, prior turns, then the user turn.
    async fn complete(
        &self,
        system: &str,
        history: &[ChatMessage],
        user_content: &str,
    ) -> Result<String>;

    /// Tool-capable completion over a full message list.
    ///
    /// `messages` excludes the system prompt. An empty `tools` slice means
    /// no tools are advertised.
    async fn complete_with_tools(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<CompletionResponse>;

    /// Whether [`complete_stream`](Self::complete_stream) yields real deltas.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Streaming completion. The default yields the whole answer as one item.
    async fn complete_stream(
        &self,
        system: &str,
        messages: &[ChatMessage],
    ) -> Result<TokenStream> {
        let response = self.complete_with_tools(system, messages, &[]).await?;
        Ok(Box::pin(futures::stream::once(async move {
            Ok(response.content)
        })))
    }

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

// =============================================================================
// STORAGE TRAITS
// =============================================================================

/// Named vector collections with cosine-distance search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records by id. Creates the collection on first use.
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<()>;

    /// Nearest `k` records to `vector`, nearest first.
    ///
    /// A collection that does not exist yields an empty result.
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<QueryResult>;

    /// Delete records; returns how many were removed.
    async fn delete(&self, collection: &str, selector: DeleteSelector) -> Result<u64>;

    /// Number of records in a collection (0 if absent).
    async fn count(&self, collection: &str) -> Result<u64>;
}

/// Threads, messages, uploads, summaries, and memories.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_thread(&self, thread_id: Uuid) -> Result<Option<Thread>>;

    async fn create_thread(&self, user_id: &str, title: Option<&str>) -> Result<Thread>;

    async fn add_message(&self, message: NewMessage) -> Result<StoredMessage>;

    /// The most recent `limit` messages, oldest first.
    async fn get_messages(&self, thread_id: Uuid, limit: i64) -> Result<Vec<StoredMessage>>;

    async fn count_messages(&self, thread_id: Uuid) -> Result<i64>;

    /// Blob-store paths of files attached to the thread.
    async fn get_upload_paths(&self, thread_id: Uuid) -> Result<Vec<String>>;

    async fn get_upload_details(&self, thread_id: Uuid) -> Result<Vec<UploadDetail>>;

    async fn get_summary(&self, thread_id: Uuid) -> Result<Option<String>>;

    async fn set_summary(&self, thread_id: Uuid, summary: &str) -> Result<()>;

    async fn get_memories(&self, user_id: &str) -> Result<Vec<String>>;

    async fn add_memories(&self, user_id: &str, memories: &[String]) -> Result<()>;
}

/// Read-only access to uploaded files.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn read_file_buffer(&self, path: &str) -> Result<Vec<u8>>;
}
