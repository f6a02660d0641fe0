//! # sage-search
//!
//! Multi-collection retrieval for the sage answer engine.
//!
//! This crate provides:
//! - Acronym query expansion ([`expansion`])
//! - Fan-out vector search across category and global collections ([`Retriever`])
//! - Cross-collection deduplication, ranking, and thresholding ([`merge`])
//! - Query-time scoring of user-attached documents ([`user_docs`])
//! - Text extraction and chunking shared with ingestion ([`extraction`], [`chunking`])
//! - Document ingestion into collections ([`Ingestor`])

pub mod chunking;
pub mod config;
pub mod expansion;
pub mod extraction;
pub mod ingest;
pub mod merge;
pub mod retriever;
pub mod user_docs;

pub use chunking::{ChunkerConfig, PageChunk, TextChunker};
pub use config::RetrievalSettings;
pub use expansion::QueryExpander;
pub use extraction::{ExtractorRegistry, PdfTextExtractor, PlainTextExtractor, TextExtractor};
pub use ingest::{IngestReport, Ingestor};
pub use merge::{chunks_from_query, deduplicate_chunks, merge_chunks};
pub use retriever::Retriever;
pub use user_docs::UserDocumentScorer;
