//! Document ingestion into vector collections.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, instrument};

use sage_core::{Chunk, DeleteSelector, Result, VectorRecord, VectorStore};
use sage_inference::EmbeddingGateway;

use crate::chunking::TextChunker;
use crate::extraction::ExtractorRegistry;

/// Outcome of ingesting one document.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub collection: String,
    pub document_name: String,
    pub pages: usize,
    pub chunks: usize,
    /// Records removed from an earlier ingestion of the same document.
    pub replaced: u64,
}

/// Chunks, embeds, and upserts documents.
///
/// Re-ingesting a document replaces its earlier chunks.
pub struct Ingestor {
    embeddings: EmbeddingGateway,
    vectors: Arc<dyn VectorStore>,
    extractors: ExtractorRegistry,
    chunker: TextChunker,
}

impl Ingestor {
    pub fn new(embeddings: EmbeddingGateway, vectors: Arc<dyn VectorStore>) -> Self {
        Self {
            embeddings,
            vectors,
            extractors: ExtractorRegistry::default(),
            chunker: TextChunker::default(),
        }
    }

    pub fn with_chunker(mut self, chunker: TextChunker) -> Self {
        self.chunker = chunker;
        self
    }

    /// Extract and ingest a file.
    pub async fn ingest_file(
        &self,
        collection: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<IngestReport> {
        let pages = self.extractors.extract_pages(data, filename).await?;
        self.ingest_pages(collection, filename, &pages).await
    }

    /// Ingest already-extracted page texts.
    #[instrument(skip(self, pages), fields(subsystem = "search", component = "ingest", op = "ingest_pages", page_count = pages.len()))]
    pub async fn ingest_pages(
        &self,
        collection: &str,
        document_name: &str,
        pages: &[String],
    ) -> Result<IngestReport> {
        let pieces = self.chunker.chunk_pages(pages);

        let mut filter = serde_json::Map::new();
        filter.insert("documentName".to_string(), json!(document_name));
        let replaced = self
            .vectors
            .delete(collection, DeleteSelector::Filter(filter))
            .await?;

        if !pieces.is_empty() {
            let texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();
            let vectors = self.embeddings.embed(&texts).await?;

            let records = pieces
                .iter()
                .zip(vectors)
                .map(|(piece, embedding)| VectorRecord {
                    id: Chunk::chunk_id(document_name, piece.chunk_index),
                    embedding,
                    document: piece.text.clone(),
                    metadata: json!({
                        "documentName": document_name,
                        "pageNumber": piece.page_number,
                        "chunkIndex": piece.chunk_index,
                    }),
                })
                .collect();
            self.vectors.upsert(collection, records).await?;
        }

        let report = IngestReport {
            collection: collection.to_string(),
            document_name: document_name.to_string(),
            pages: pages.len(),
            chunks: pieces.len(),
            replaced,
        };
        info!(
            collection,
            document = document_name,
            chunk_count = report.chunks,
            replaced,
            "Ingested document"
        );
        Ok(report)
    }
}
