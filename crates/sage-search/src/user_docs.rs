//! Query-time scoring of documents attached to a conversation.
//!
//! User documents are never indexed. Each request reads them from the blob
//! store, extracts and chunks them, embeds a bounded number of chunks, and
//! ranks them by cosine similarity against the primary query vector.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use sage_core::{cosine_similarity, BlobStore, Chunk, Result, SourceKind};
use sage_inference::EmbeddingGateway;

use crate::chunking::TextChunker;
use crate::config::RetrievalSettings;
use crate::extraction::ExtractorRegistry;
use crate::merge::merge_chunks;

/// Display name for a stored upload path.
pub fn document_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string()
}

pub struct UserDocumentScorer {
    blobs: Arc<dyn BlobStore>,
    embeddings: EmbeddingGateway,
    extractors: ExtractorRegistry,
    chunker: TextChunker,
}

impl UserDocumentScorer {
    pub fn new(blobs: Arc<dyn BlobStore>, embeddings: EmbeddingGateway) -> Self {
        Self {
            blobs,
            embeddings,
            extractors: ExtractorRegistry::default(),
            chunker: TextChunker::default(),
        }
    }

    pub fn with_chunker(mut self, chunker: TextChunker) -> Self {
        self.chunker = chunker;
        self
    }

    /// Best chunks across all `paths`; documents that fail are skipped.
    #[instrument(skip(self, paths, primary, settings), fields(subsystem = "search", component = "user_docs", op = "score", input_count = paths.len()))]
    pub async fn score(
        &self,
        paths: &[String],
        primary: &[f32],
        settings: &RetrievalSettings,
    ) -> Vec<Chunk> {
        let mut scored = Vec::new();
        for path in paths {
            match self.score_document(path, primary, settings).await {
                Ok(chunks) => scored.extend(chunks),
                Err(e) => warn!(path = %path, error = %e, "Skipping user document"),
            }
        }

        let merged = merge_chunks(scored, settings.similarity_threshold, settings.user_doc_top_k);
        debug!(result_count = merged.len(), "Scored user documents");
        merged
    }

    async fn score_document(
        &self,
        path: &str,
        primary: &[f32],
        settings: &RetrievalSettings,
    ) -> Result<Vec<Chunk>> {
        let name = document_name(path);
        let data = self.blobs.read_file_buffer(path).await?;
        let pages = self.extractors.extract_pages(&data, &name).await?;

        let mut pieces = self.chunker.chunk_pages(&pages);
        pieces.truncate(settings.user_doc_max_embed_chunks);
        if pieces.is_empty() {
            return Ok(vec![]);
        }

        let texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();
        let vectors = self.embeddings.embed(&texts).await?;

        Ok(pieces
            .into_iter()
            .zip(vectors)
            .map(|(piece, vector)| {
                // Keyed by upload path so same-named files stay distinct.
                Chunk {
                    id: Chunk::chunk_id(path, piece.chunk_index),
                    ..Chunk::new(
                        piece.text,
                        name.clone(),
                        piece.page_number,
                        piece.chunk_index,
                        SourceKind::User,
                        cosine_similarity(primary, &vector),
                    )
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sage_core::Error;
    use sage_inference::mock::{MockEmbeddingBackend, MockEmbeddingGenerator};
    use std::collections::HashMap;

    struct MapBlobs(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl BlobStore for MapBlobs {
        async fn read_file_buffer(&self, path: &str) -> Result<Vec<u8>> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| Error::NotFound(path.to_string()))
        }
    }

    fn scorer(files: &[(&str, &str)], backend: MockEmbeddingBackend) -> UserDocumentScorer {
        let blobs = MapBlobs(
            files
                .iter()
                .map(|(p, c)| (p.to_string(), c.as_bytes().to_vec()))
                .collect(),
        );
        UserDocumentScorer::new(Arc::new(blobs), EmbeddingGateway::new(Arc::new(backend)))
    }

    #[test]
    fn test_document_name_from_path() {
        assert_eq!(document_name("threads/42/report.pdf"), "report.pdf");
        assert_eq!(document_name("plain.txt"), "plain.txt");
    }

    #[tokio::test]
    async fn test_scores_against_primary_vector() {
        let dim = 8;
        let backend = MockEmbeddingBackend::new()
            .with_dimension(dim)
            .with_vector("relevant text", MockEmbeddingGenerator::axis(0, dim))
            .with_vector("other text", MockEmbeddingGenerator::axis(1, dim));
        let scorer = scorer(
            &[("u/a.txt", "relevant text"), ("u/b.txt", "other text")],
            backend,
        );

        let primary = MockEmbeddingGenerator::axis(0, dim);
        let chunks = scorer
            .score(
                &["u/a.txt".into(), "u/b.txt".into()],
                &primary,
                &RetrievalSettings::default(),
            )
            .await;

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].document_name, "a.txt");
        assert_eq!(chunks[0].id, "u/a.txt-chunk-0");
        assert_eq!(chunks[0].source_kind, SourceKind::User);
        assert!((chunks[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_same_file_name_in_different_folders_kept_apart() {
        let dim = 8;
        let primary = MockEmbeddingGenerator::axis(0, dim);
        let backend = MockEmbeddingBackend::new()
            .with_dimension(dim)
            .with_vector("q1 revenue grew", primary.clone())
            .with_vector("q2 revenue fell", primary.clone());
        let scorer = scorer(
            &[("t1/report.txt", "q1 revenue grew"), ("t2/report.txt", "q2 revenue fell")],
            backend,
        );

        let chunks = scorer
            .score(
                &["t1/report.txt".into(), "t2/report.txt".into()],
                &primary,
                &RetrievalSettings::default(),
            )
            .await;

        assert_eq!(chunks.len(), 2);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert!(texts.contains(&"q1 revenue grew"));
        assert!(texts.contains(&"q2 revenue fell"));
        assert!(chunks.iter().all(|c| c.document_name == "report.txt"));
    }

    #[tokio::test]
    async fn test_missing_and_unsupported_documents_are_skipped() {
        let dim = 8;
        let backend = MockEmbeddingBackend::new()
            .with_dimension(dim)
            .with_vector("good", MockEmbeddingGenerator::axis(2, dim));
        let scorer = scorer(&[("good.txt", "good"), ("pic.png", "xx")], backend);

        let chunks = scorer
            .score(
                &["missing.txt".into(), "pic.png".into(), "good.txt".into()],
                &MockEmbeddingGenerator::axis(2, dim),
                &RetrievalSettings::default(),
            )
            .await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].document_name, "good.txt");
    }

    #[tokio::test]
    async fn test_caps_to_user_doc_top_k() {
        let dim = 4;
        let primary = MockEmbeddingGenerator::axis(0, dim);
        let mut backend = MockEmbeddingBackend::new().with_dimension(dim);
        let mut files = Vec::new();
        for i in 0..8 {
            let text = format!("doc body {}", i);
            backend = backend.with_vector(text.clone(), primary.clone());
            files.push((format!("d{}.txt", i), text));
        }
        let refs: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
        let scorer = scorer(&refs, backend);
        let paths: Vec<String> = files.iter().map(|(p, _)| p.clone()).collect();

        let settings = RetrievalSettings::default();
        let chunks = scorer.score(&paths, &primary, &settings).await;
        assert_eq!(chunks.len(), settings.user_doc_top_k);
    }

    #[tokio::test]
    async fn test_embed_failure_skips_document() {
        let backend = MockEmbeddingBackend::new().with_failure();
        let scorer = scorer(&[("a.txt", "text")], backend);
        let chunks = scorer
            .score(&["a.txt".into()], &[1.0; 16], &RetrievalSettings::default())
            .await;
        assert!(chunks.is_empty());
    }
}
