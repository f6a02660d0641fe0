//! Streaming protocol events.
//!
//! A chat request produces an ordered, append-only sequence of
//! [`StreamEvent`]s. Exactly one terminal event (`done` or `error`) ends the
//! sequence; nothing is emitted after it.
//!
//! ## Wire Format (SSE)
//!
//! ```text
//! data: {"type":"status","phase":"rag_retrieval"}
//! data: {"type":"chunk","textDelta":"The answer"}
//! data: {"type":"done","messageId":"019508a0-1234-7def-8000-abcdef123456"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::models::{AgentTask, AgentTaskStatus, SourceRef, TriggerReason};

/// Orchestration phase reported by `status` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    Init,
    RagRetrieval,
    ToolExecution,
    Generating,
    Complete,
}

impl StreamPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamPhase::Init => "init",
            StreamPhase::RagRetrieval => "rag_retrieval",
            StreamPhase::ToolExecution => "tool_execution",
            StreamPhase::Generating => "generating",
            StreamPhase::Complete => "complete",
        }
    }
}

/// Skill as reported in `contextLoaded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillSummary {
    pub name: String,
    pub trigger_reason: TriggerReason,
}

/// Kind of artifact a tool produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Document,
    Chart,
}

/// Budget warning level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentBudgetLevel {
    Medium,
    High,
}

/// Roll-up of an autonomous run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPlanStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub needs_review: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_confidence: Option<f32>,
}

/// One event on the chat stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    Status {
        phase: StreamPhase,
    },
    ContextLoaded {
        skills: Vec<SkillSummary>,
        tools_available: Vec<String>,
    },
    Chunk {
        text_delta: String,
    },
    Sources {
        sources: Vec<SourceRef>,
    },
    ToolStart {
        name: String,
        display_name: String,
    },
    ToolEnd {
        name: String,
        success: bool,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Artifact {
        subtype: ArtifactKind,
        payload: JsonValue,
    },
    AgentPlanCreated {
        tasks: Vec<AgentTask>,
    },
    AgentTaskStarted {
        task_id: String,
        description: String,
    },
    AgentTaskCompleted {
        task_id: String,
        status: AgentTaskStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f32>,
    },
    AgentPlanSummary {
        stats: AgentPlanStats,
        summary: String,
    },
    AgentBudgetWarning {
        level: AgentBudgetLevel,
        tokens_used: usize,
        token_budget: usize,
    },
    AgentBudgetExceeded {
        tokens_used: usize,
        token_budget: usize,
    },
    Done {
        message_id: Uuid,
    },
    Error {
        code: ErrorCode,
        message: String,
        recoverable: bool,
    },
}

impl StreamEvent {
    pub fn status(phase: StreamPhase) -> Self {
        StreamEvent::Status { phase }
    }

    pub fn chunk(text_delta: impl Into<String>) -> Self {
        StreamEvent::Chunk {
            text_delta: text_delta.into(),
        }
    }

    /// Terminal error event for a core error.
    pub fn from_error(err: &crate::Error) -> Self {
        StreamEvent::Error {
            code: err.code(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }

    /// Wire `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Status { .. } => "status",
            StreamEvent::ContextLoaded { .. } => "contextLoaded",
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::Sources { .. } => "sources",
            StreamEvent::ToolStart { .. } => "toolStart",
            StreamEvent::ToolEnd { .. } => "toolEnd",
            StreamEvent::Artifact { .. } => "artifact",
            StreamEvent::AgentPlanCreated { .. } => "agentPlanCreated",
            StreamEvent::AgentTaskStarted { .. } => "agentTaskStarted",
            StreamEvent::AgentTaskCompleted { .. } => "agentTaskCompleted",
            StreamEvent::AgentPlanSummary { .. } => "agentPlanSummary",
            StreamEvent::AgentBudgetWarning { .. } => "agentBudgetWarning",
            StreamEvent::AgentBudgetExceeded { .. } => "agentBudgetExceeded",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }
}
