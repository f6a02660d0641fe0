//! # sage-inference
//!
//! Embedding and completion backends for the sage answer engine.
//!
//! This crate provides:
//! - OpenAI-compatible backend for embeddings, tool-calling completions,
//!   and token streaming (feature `openai`, default)
//! - [`EmbeddingGateway`] for batched embedding with count checks
//! - Deterministic mock backends for tests (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use sage_inference::OpenAIBackend;
//! use sage_core::EmbeddingBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OpenAIBackend::from_env().unwrap();
//!     let texts = vec!["Hello".to_string()];
//!     let embeddings = backend.embed_texts(&texts).await.unwrap();
//! }
//! ```

pub mod gateway;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use gateway::EmbeddingGateway;

#[cfg(feature = "openai")]
pub use openai::{OpenAIBackend, OpenAIConfig};
