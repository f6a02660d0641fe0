//! Token counting for prompt budgets.
//!
//! Skill budgets and autonomous-mode budgets are tracked in tokens. Exact
//! counts use tiktoken; the cheap estimate is used where a rough number is
//! enough (skill definitions that omit `tokenEstimate`).

use crate::error::{Error, Result};

/// Trait for tokenization operations.
pub trait Tokenizer: Send + Sync {
    /// Count the number of tokens in the given text.
    fn count_tokens(&self, text: &str) -> usize;

    /// Get the name/identifier of this tokenizer.
    fn name(&self) -> &str;
}

/// Tiktoken-based tokenizer implementation.
pub struct TiktokenTokenizer {
    bpe: tiktoken_rs::CoreBPE,
    name: String,
}

impl TiktokenTokenizer {
    /// Create a tokenizer for the given model (e.g. "gpt-4").
    pub fn new(model: &str) -> Result<Self> {
        let bpe = tiktoken_rs::get_bpe_from_model(model)
            .map_err(|e| Error::Internal(format!("Failed to initialize tokenizer: {}", e)))?;

        Ok(Self {
            bpe,
            name: model.to_string(),
        })
    }

    /// Create a cl100k_base tokenizer, shared by current chat and embedding models.
    pub fn cl100k() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| Error::Internal(format!("Failed to initialize cl100k_base: {}", e)))?;

        Ok(Self {
            bpe,
            name: "cl100k_base".to_string(),
        })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Heuristic tokenizer (~4 characters per token) for when tiktoken data is
/// unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatingTokenizer;

impl Tokenizer for EstimatingTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }

    fn name(&self) -> &str {
        "estimate"
    }
}

/// Quickly estimate token count without full tokenization.
///
/// Uses ~4 characters per token, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
