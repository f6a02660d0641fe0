//! OpenAI-compatible inference backend.
//!
//! Works with any endpoint that speaks the OpenAI embeddings and chat
//! completions API, including Ollama in compatibility mode, vLLM, and
//! LM Studio.
//!
//! # Example
//!
//! ```rust,no_run
//! use sage_inference::openai::{OpenAIBackend, OpenAIConfig};
//! use sage_core::EmbeddingBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = OpenAIConfig {
//!         base_url: "http://localhost:11434/v1".to_string(),
//!         embed_model: "nomic-embed-text".to_string(),
//!         embed_dimension: 768,
//!         ..Default::default()
//!     };
//!     let backend = OpenAIBackend::new(config).unwrap();
//!     let vectors = backend.embed_texts(&["Hello".to_string()]).await.unwrap();
//! }
//! ```

mod backend;
mod error;
mod streaming;
mod types;

pub use backend::{OpenAIBackend, OpenAIConfig};
pub use error::{to_sage_error, CallKind, OpenAIErrorCode};
pub use streaming::parse_sse_stream;
pub use types::*;
