//! # sage-agent
//!
//! Everything between retrieval and the streamed answer:
//!
//! - [`skills`]: versioned skill registry and budgeted resolution
//! - [`context`]: context block and system prompt assembly
//! - [`datasources`]: HTTP JSON data sources from config
//! - [`tools`]: tool registry, argument validation, progress sink, built-ins
//! - [`tool_loop`]: bounded completion loop with tool execution
//! - [`autonomous`]: planner, executor, and token budget for autonomous mode

pub mod autonomous;
pub mod context;
pub mod datasources;
pub mod skills;
pub mod tool_loop;
pub mod tools;

pub use autonomous::{AgentConfig, AgentExecutor, AgentRequest, AgentRunOutcome};
pub use context::{AssembledContext, ContextAssembler};
pub use datasources::{DataSourceConfig, DataSourceRegistry};
pub use skills::{SkillDefinition, SkillRegistry, SkillResolver, SkillTrigger};
pub use tool_loop::{ToolLoop, ToolLoopOutcome, ToolLoopRequest};
pub use tools::{
    CreateChartTool, GenerateDocumentTool, QueryDataSourceTool, SearchKnowledgeBaseTool, Tool,
    ToolContext, ToolEvent, ToolEventSink, ToolOutput, ToolRegistry,
};
