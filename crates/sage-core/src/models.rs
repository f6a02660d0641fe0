//! Data models shared across sage crates.
//!
//! Wire-facing types serialize in camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// =============================================================================
// RETRIEVAL
// =============================================================================

/// Where a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Indexed knowledge-base collection.
    Global,
    /// Document attached by the user to this conversation.
    User,
}

/// A scored passage of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub document_name: String,
    pub page_number: u32,
    pub chunk_index: usize,
    pub source_kind: SourceKind,
    /// Relevance, higher is better (1 - cosine distance).
    pub score: f32,
}

impl Chunk {
    /// Stable identifier for a chunk of a named document.
    pub fn chunk_id(document_name: &str, chunk_index: usize) -> String {
        format!("{}-chunk-{}", document_name, chunk_index)
    }

    /// Build a chunk whose id is derived from document name and index.
    pub fn new(
        text: impl Into<String>,
        document_name: impl Into<String>,
        page_number: u32,
        chunk_index: usize,
        source_kind: SourceKind,
        score: f32,
    ) -> Self {
        let document_name = document_name.into();
        Self {
            id: Self::chunk_id(&document_name, chunk_index),
            text: text.into(),
            document_name,
            page_number,
            chunk_index,
            source_kind,
            score,
        }
    }
}

/// Output of one retrieval pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    pub global_chunks: Vec<Chunk>,
    pub user_chunks: Vec<Chunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.global_chunks.is_empty() && self.user_chunks.is_empty()
    }

    /// All chunks as source references, knowledge base first.
    pub fn sources(&self) -> Vec<SourceRef> {
        self.global_chunks
            .iter()
            .chain(self.user_chunks.iter())
            .map(SourceRef::from)
            .collect()
    }
}

/// Wire form of a chunk cited by an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub chunk_id: String,
    pub document_name: String,
    pub page_number: u32,
    pub source_kind: SourceKind,
    pub score: f32,
}

impl From<&Chunk> for SourceRef {
    fn from(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            document_name: chunk.document_name.clone(),
            page_number: chunk.page_number,
            source_kind: chunk.source_kind,
            score: chunk.score,
        }
    }
}

// =============================================================================
// VECTOR STORE
// =============================================================================

/// Record written to a vector collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    pub document: String,
    pub metadata: JsonValue,
}

/// Column-oriented result of a nearest-neighbour query, nearest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub ids: Vec<String>,
    pub texts: Vec<String>,
    pub metadatas: Vec<JsonValue>,
    /// Cosine distances; score = 1 - distance.
    pub distances: Vec<f32>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Cosine similarity of two vectors; 0.0 for mismatched or zero-length input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Exact-match metadata filter: every key must equal the given value.
pub type MetadataFilter = serde_json::Map<String, JsonValue>;

/// Returns true when `metadata` satisfies `filter`.
pub fn metadata_matches(metadata: &JsonValue, filter: &MetadataFilter) -> bool {
    filter
        .iter()
        .all(|(k, v)| metadata.get(k).map(|m| m == v).unwrap_or(false))
}

/// What to remove from a collection.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteSelector {
    Ids(Vec<String>),
    Filter(MetadataFilter),
}

// =============================================================================
// SKILLS
// =============================================================================

/// Why a skill was activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerReason {
    Always,
    Category,
    Keyword,
}

/// A skill selected for the current request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSkill {
    pub name: String,
    pub prompt_fragment: String,
    pub trigger_reason: TriggerReason,
    pub token_estimate: usize,
    /// Lower sorts first.
    pub priority: i32,
}

/// Skills selected for a request and those dropped for budget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSkills {
    pub skills: Vec<ResolvedSkill>,
    pub dropped: Vec<String>,
    pub total_tokens: usize,
}

impl ResolvedSkills {
    pub fn names(&self) -> Vec<String> {
        self.skills.iter().map(|s| s.name.clone()).collect()
    }
}

// =============================================================================
// TOOLS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Running,
    Success,
    Error,
}

/// Lifecycle record of one tool invocation.
///
/// Created when the call starts and consumed by its terminal transition,
/// so a state is never reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionState {
    pub name: String,
    pub status: ToolStatus,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolExecutionState {
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ToolStatus::Running,
            start_time: Utc::now(),
            duration_ms: None,
            error: None,
        }
    }

    fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.start_time).num_milliseconds().max(0) as u64
    }

    pub fn succeed(mut self) -> Self {
        self.duration_ms = Some(self.elapsed_ms());
        self.status = ToolStatus::Success;
        self
    }

    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.duration_ms = Some(self.elapsed_ms());
        self.status = ToolStatus::Error;
        self.error = Some(error.into());
        self
    }
}

// =============================================================================
// AUTONOMOUS AGENT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentTaskStatus {
    Pending,
    Running,
    Done,
    Skipped,
    NeedsReview,
    Error,
}

impl AgentTaskStatus {
    /// Whether dependents of a task in this state must be skipped.
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, AgentTaskStatus::Skipped | AgentTaskStatus::Error)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentTaskStatus::Pending | AgentTaskStatus::Running)
    }
}

/// One step of an autonomous plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTask {
    pub id: String,
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub status: AgentTaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl AgentTask {
    pub fn new(id: impl Into<String>, description: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            task_type: task_type.into(),
            status: AgentTaskStatus::Pending,
            confidence: None,
            depends_on: Vec::new(),
            result: None,
        }
    }
}

// =============================================================================
// CONVERSATIONS
// =============================================================================

/// Identity asserted by the trusted upstream proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPrincipal {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: Uuid,
    pub user_id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(MessageRole::System),
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "tool" => Some(MessageRole::Tool),
            _ => None,
        }
    }
}

/// Per-message bookkeeping persisted alongside the content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageMetadata {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub sources: Vec<SourceRef>,
    pub skills: Vec<String>,
    pub tools_used: Vec<String>,
    pub cached: bool,
    pub autonomous: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub metadata: MessageMetadata,
    pub created_at: DateTime<Utc>,
}

/// Message to append to a thread.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub thread_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub metadata: MessageMetadata,
}

impl NewMessage {
    pub fn user(thread_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            thread_id,
            role: MessageRole::User,
            content: content.into(),
            metadata: MessageMetadata::default(),
        }
    }

    pub fn assistant(thread_id: Uuid, content: impl Into<String>, metadata: MessageMetadata) -> Self {
        Self {
            thread_id,
            role: MessageRole::Assistant,
            content: content.into(),
            metadata,
        }
    }
}

/// File attached to a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDetail {
    pub path: String,
    pub filename: String,
    pub mime_type: Option<String>,
    pub size_bytes: i64,
}

/// Answer stored in the response cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedAnswer {
    pub content: String,
    pub sources: Vec<SourceRef>,
    pub skills: Vec<String>,
    pub created_at: DateTime<Utc>,
}
