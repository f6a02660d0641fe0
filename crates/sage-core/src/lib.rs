//! # sage-core
//!
//! Core types, traits, and abstractions for the sage answer engine.
//!
//! This crate provides the data model shared by retrieval, prompt assembly,
//! tool execution, and the streaming protocol, along with the trait
//! definitions for every external collaborator (embedding model, vector
//! index, completion model, conversation store, blob store).

pub mod collections;
pub mod completion;
pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod tokenizer;
pub mod traits;

// Re-export commonly used types at crate root
pub use collections::CollectionRef;
pub use completion::*;
pub use error::{Error, ErrorCode, Result};
pub use events::{
    AgentBudgetLevel, AgentPlanStats, ArtifactKind, SkillSummary, StreamEvent, StreamPhase,
};
pub use models::*;
pub use tokenizer::*;
pub use traits::*;
