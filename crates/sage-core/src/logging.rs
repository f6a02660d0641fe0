//! Structured logging schema and field name constants for sage.
//!
//! All crates use these constants for consistent structured logging fields
//! so log aggregation can query by the same names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (hits, chunks, tokens) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated across request → job → sub-calls.
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "search", "store", "inference", "agent", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "retriever", "tool_loop", "openai", "orchestrator", "worker"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "retrieve", "embed_texts", "complete_with_tools", "submit"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Conversation thread ID.
pub const THREAD_ID: &str = "thread_id";

/// Authenticated user ID.
pub const USER_ID: &str = "user_id";

/// Persisted message ID.
pub const MESSAGE_ID: &str = "message_id";

/// Job UUID being processed.
pub const JOB_ID: &str = "job_id";

/// Job type enum variant.
pub const JOB_TYPE: &str = "job_type";

/// Vector collection name.
pub const COLLECTION: &str = "collection";

/// Tool name.
pub const TOOL: &str = "tool";

/// Autonomous task ID.
pub const TASK_ID: &str = "task_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of chunks processed.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of input texts sent to an embedding model.
pub const INPUT_COUNT: &str = "input_count";

/// Number of query variants after expansion.
pub const VARIANT_COUNT: &str = "variant_count";

/// Tool-loop iteration index.
pub const ITERATION: &str = "iteration";

/// Tokens consumed so far.
pub const TOKENS_USED: &str = "tokens_used";

/// Byte length of a prompt.
pub const PROMPT_LEN: &str = "prompt_len";

/// Byte length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Stream phase at the time of the event.
pub const PHASE: &str = "phase";

/// Whether the answer came from the cache.
pub const CACHE_HIT: &str = "cache_hit";
