//! Splitting extracted document text into embeddable chunks.
//!
//! Windows are at most `max_chunk_size` bytes and overlap by `overlap`
//! bytes. A window prefers to end on a paragraph break, then a line break,
//! then a sentence end, then whitespace, as long as that keeps it at least
//! half full. Boundaries always fall on UTF-8 character boundaries.
//!
//! # Example
//!
//! ```rust
//! use sage_search::chunking::{ChunkerConfig, TextChunker};
//!
//! let chunker = TextChunker::new(ChunkerConfig {
//!     max_chunk_size: 200,
//!     min_chunk_size: 10,
//!     overlap: 20,
//! });
//! let pieces = chunker.chunk("Some long text.");
//! assert_eq!(pieces.len(), 1);
//! ```

use sage_core::defaults;

/// Configuration for chunking.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum size of a chunk in bytes.
    pub max_chunk_size: usize,
    /// Chunks shorter than this (after trimming) are dropped.
    pub min_chunk_size: usize,
    /// Bytes shared between consecutive chunks.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: defaults::CHUNK_SIZE,
            min_chunk_size: defaults::CHUNK_MIN_SIZE,
            overlap: defaults::CHUNK_OVERLAP,
        }
    }
}

/// A chunk positioned within a paginated document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageChunk {
    pub text: String,
    /// 1-based page the chunk starts on.
    pub page_number: u32,
    /// Position of the chunk within the whole document.
    pub chunk_index: usize,
}

/// Find UTF-8 safe boundary at or before the given position.
fn find_char_boundary_before(text: &str, mut pos: usize) -> usize {
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Find UTF-8 safe boundary at or after the given position.
fn find_char_boundary_after(text: &str, mut pos: usize) -> usize {
    while pos < text.len() && !text.is_char_boundary(pos) {
        pos += 1;
    }
    pos
}

const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

#[derive(Debug, Clone, Default)]
pub struct TextChunker {
    config: ChunkerConfig,
}

impl TextChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Pick the end of the window starting at `start`.
    fn window_end(&self, text: &str, start: usize) -> usize {
        let hard_end = find_char_boundary_before(text, (start + self.config.max_chunk_size).min(text.len()));
        if hard_end >= text.len() {
            return text.len();
        }
        let window = &text[start..hard_end];
        let floor = window.len() / 2;
        for sep in SEPARATORS {
            if let Some(pos) = window.rfind(sep) {
                let end = pos + sep.len();
                if end > floor {
                    return start + end;
                }
            }
        }
        hard_end
    }

    /// Split `text` into trimmed chunks.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }
        if text.len() <= self.config.max_chunk_size {
            return vec![text.trim().to_string()];
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < text.len() {
            let mut end = self.window_end(text, start);
            if end <= start {
                // Window smaller than one character.
                end = find_char_boundary_after(text, start + 1);
            }

            let piece = text[start..end].trim();
            if piece.len() >= self.config.min_chunk_size {
                chunks.push(piece.to_string());
            }

            if end >= text.len() {
                break;
            }

            let next = find_char_boundary_after(text, end.saturating_sub(self.config.overlap));
            start = if next > start { next } else { end };
        }

        chunks
    }

    /// Chunk each page and number chunks across the whole document.
    pub fn chunk_pages(&self, pages: &[String]) -> Vec<PageChunk> {
        let mut out = Vec::new();
        for (page_idx, page) in pages.iter().enumerate() {
            for text in self.chunk(page) {
                out.push(PageChunk {
                    text,
                    page_number: page_idx as u32 + 1,
                    chunk_index: out.len(),
                });
            }
        }
        out
    }
}
