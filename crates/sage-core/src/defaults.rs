//! Centralized default constants for the sage answer engine.
//!
//! **This module is the single source of truth** for all shared default values.
//! Every `from_env()` constructor falls back to these constants when the
//! corresponding environment variable is unset or unparseable.
//!
//! Organized by domain area.

// =============================================================================
// RETRIEVAL
// =============================================================================

/// Minimum relevance score (1 - cosine distance) for a chunk to be kept.
pub const SIMILARITY_THRESHOLD: f32 = 0.3;

/// Maximum number of knowledge-base chunks placed into the context.
pub const MAX_CONTEXT_CHUNKS: usize = 8;

/// Maximum number of query variants (including the original query).
pub const MAX_QUERY_EXPANSIONS: usize = 3;

/// Results requested from each collection per query variant.
pub const TOP_K: usize = 10;

/// Maximum number of user-document chunks placed into the context.
pub const USER_DOC_TOP_K: usize = 5;

/// Maximum number of chunks embedded per user-supplied document.
pub const USER_DOC_MAX_EMBED_CHUNKS: usize = 64;

/// Retries per collection query before the collection is treated as empty.
pub const COLLECTION_QUERY_RETRIES: u32 = 1;

/// Context block used when neither the knowledge base nor user documents
/// produced anything above threshold.
pub const NO_CONTEXT_SENTINEL: &str = "No relevant documents were found for this question.";

// =============================================================================
// COLLECTIONS
// =============================================================================

/// Collection shared by every category query.
pub const GLOBAL_COLLECTION: &str = "global_knowledge";

/// Collection queried when no categories are supplied.
pub const LEGACY_COLLECTION: &str = "documents";

/// Prefix applied to a category slug to form its collection name.
pub const CATEGORY_COLLECTION_PREFIX: &str = "category_";

// =============================================================================
// CHUNKING
// =============================================================================

/// Maximum characters per chunk for text splitting.
pub const CHUNK_SIZE: usize = 1000;

/// Overlap characters between adjacent chunks for context preservation.
pub const CHUNK_OVERLAP: usize = 150;

/// Chunks shorter than this are folded into their predecessor.
pub const CHUNK_MIN_SIZE: usize = 50;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding model name.
pub const EMBED_MODEL: &str = "text-embedding-3-small";

/// Default embedding vector dimension for text-embedding-3-small.
pub const EMBED_DIMENSION: usize = 1536;

/// Maximum texts sent to the embedding endpoint in a single request.
pub const EMBED_BATCH_SIZE: usize = 64;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default OpenAI-compatible base URL.
pub const OPENAI_URL: &str = "https://api.openai.com/v1";

/// Default generation model name.
pub const GEN_MODEL: &str = "gpt-4o-mini";

/// Timeout for completion and embedding requests in seconds.
pub const GEN_TIMEOUT_SECS: u64 = 120;

/// Sampling temperature for answers.
pub const GEN_TEMPERATURE: f32 = 0.3;

/// Token ceiling for a single completion.
pub const GEN_MAX_TOKENS: u32 = 2048;

// =============================================================================
// SKILLS
// =============================================================================

/// Token budget shared by all activated skill fragments.
pub const SKILL_MAX_TOTAL_TOKENS: usize = 2000;

/// Priority assigned to skills whose definition omits one.
pub const SKILL_DEFAULT_PRIORITY: i32 = 100;

/// Default skills registry location.
pub const SKILLS_PATH: &str = "config/skills.yaml";

/// Default data source registry location.
pub const DATA_SOURCES_PATH: &str = "config/data_sources.yaml";

// =============================================================================
// TOOLS
// =============================================================================

/// Hard ceiling on tool-loop iterations; model calls never exceed this + 1.
pub const TOOL_MAX_ITERATIONS: usize = 3;

/// Timeout for a single data-source HTTP call in seconds.
pub const DATA_SOURCE_TIMEOUT_SECS: u64 = 15;

// =============================================================================
// AUTONOMOUS AGENT
// =============================================================================

/// Maximum number of tasks accepted from a plan.
pub const AGENT_MAX_TASKS: usize = 8;

/// Token budget for one autonomous request.
pub const AGENT_TOKEN_BUDGET: usize = 50_000;

/// Fraction of the budget at which the medium warning fires.
pub const AGENT_BUDGET_MEDIUM: f32 = 0.5;

/// Fraction of the budget at which the high warning fires.
pub const AGENT_BUDGET_HIGH: f32 = 0.8;

/// Confidence below which a task is flagged `needsReview`.
pub const AGENT_REVIEW_THRESHOLD: f32 = 0.6;

// =============================================================================
// STREAMING
// =============================================================================

/// Heartbeat interval in seconds.
pub const STREAM_HEARTBEAT_SECS: u64 = 15;

/// Characters per `chunk` event when slicing a finished answer.
pub const STREAM_SLICE_CHARS: usize = 24;

/// Delay between sliced `chunk` events in milliseconds.
pub const STREAM_SLICE_DELAY_MS: u64 = 15;

/// Capacity of the per-request event channel.
pub const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Number of prior messages loaded as conversation history.
pub const HISTORY_LIMIT: i64 = 20;

// =============================================================================
// CHAT REQUESTS
// =============================================================================

/// Longest accepted user message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 16_000;

/// Images accepted on one chat request.
pub const MAX_IMAGES: usize = 4;

/// Characters of the first message used as a new thread's title.
pub const THREAD_TITLE_CHARS: usize = 60;

/// Base system prompt used when `SAGE_SYSTEM_PROMPT` is unset.
pub const SYSTEM_PROMPT: &str = "You are Sage, a helpful assistant that answers questions using the \
provided context. Cite document names when you rely on them. If the context does not contain the \
answer, say so plainly.";

// =============================================================================
// CACHE
// =============================================================================

/// Prefix for answer cache keys.
pub const CACHE_KEY_PREFIX: &str = "sage:answer:";

/// Default answer cache TTL in seconds (1 hour).
pub const CACHE_TTL_SECS: u64 = 3600;

/// Entries held by the in-process fallback cache.
pub const CACHE_LOCAL_CAPACITY: usize = 512;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Default file storage root for uploads.
pub const FILE_STORAGE_PATH: &str = "./data/uploads";

/// Maximum request body size in bytes (25 MB, room for inline images).
pub const MAX_BODY_SIZE_BYTES: usize = 25 * 1024 * 1024;

/// Default CORS max-age in seconds (1 hour).
pub const CORS_MAX_AGE_SECS: u64 = 3600;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Capacity of the in-process job queue.
pub const JOB_QUEUE_CAPACITY: usize = 256;

/// Default maximum concurrent jobs per worker.
pub const JOB_MAX_CONCURRENT: usize = 2;

/// Default job execution timeout in seconds (2 minutes).
pub const JOB_TIMEOUT_SECS: u64 = 120;

/// Attempts after the first for a job whose handler asks for a retry.
pub const JOB_MAX_RETRIES: u32 = 2;

/// Capacity of the worker event broadcast channel.
pub const JOB_EVENT_CAPACITY: usize = 256;

/// Thread length at which the summarization job rewrites the summary.
pub const SUMMARY_TRIGGER_MESSAGES: usize = 12;

/// Most recent messages left out of the rolling summary.
pub const SUMMARY_KEEP_RECENT: usize = 6;

/// Maximum memories stored per extraction run.
pub const MEMORY_MAX_FACTS: usize = 5;

// =============================================================================
// EXTRACTION
// =============================================================================

/// Timeout for the external PDF text extractor in seconds.
pub const PDF_EXTRACT_TIMEOUT_SECS: u64 = 60;
