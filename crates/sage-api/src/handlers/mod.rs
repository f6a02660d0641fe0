//! HTTP handlers and background job handlers for sage-api.

pub mod chat;
pub mod ingest;
pub mod jobs;
pub mod system;

pub use jobs::{MemoryExtractionHandler, SummarizationHandler};
