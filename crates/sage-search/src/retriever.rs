//! Multi-collection retrieval.
//!
//! One retrieval pass:
//! 1. expands the query into acronym variants,
//! 2. embeds every variant in a single batch (variant 0 is the primary vector),
//! 3. queries every variant against every target collection concurrently,
//! 4. merges the results into a ranked, thresholded, capped list,
//! 5. scores any attached user documents against the primary vector.

use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use sage_core::{CollectionRef, Error, QueryResult, Result, RetrievalResult, SourceKind, VectorStore};
use sage_inference::EmbeddingGateway;

use crate::config::RetrievalSettings;
use crate::expansion::QueryExpander;
use crate::merge::{chunks_from_query, merge_chunks};
use crate::user_docs::UserDocumentScorer;

pub struct Retriever {
    embeddings: EmbeddingGateway,
    vectors: Arc<dyn VectorStore>,
    user_docs: Option<UserDocumentScorer>,
}

impl Retriever {
    pub fn new(embeddings: EmbeddingGateway, vectors: Arc<dyn VectorStore>) -> Self {
        Self {
            embeddings,
            vectors,
            user_docs: None,
        }
    }

    /// Enable scoring of conversation attachments.
    pub fn with_user_documents(mut self, scorer: UserDocumentScorer) -> Self {
        self.user_docs = Some(scorer);
        self
    }

    /// Retrieve knowledge-base and user-document chunks for `query`.
    ///
    /// `category_slugs` of `None` (or empty) queries the legacy collection
    /// only; otherwise each category collection plus the global collection.
    #[instrument(
        skip(self, query, user_doc_paths, category_slugs, settings),
        fields(subsystem = "search", component = "retriever", op = "retrieve", result_count)
    )]
    pub async fn retrieve(
        &self,
        query: &str,
        user_doc_paths: &[String],
        category_slugs: Option<&[String]>,
        settings: &RetrievalSettings,
    ) -> Result<RetrievalResult> {
        let start = Instant::now();
        if query.trim().is_empty() {
            return Err(Error::InvalidInput("Query must not be empty".into()));
        }

        let variants =
            QueryExpander::new(&settings.acronyms).expand(query, settings.max_query_expansions);
        let probes = self.embeddings.embed(&variants).await?;
        let Some(primary) = probes.first() else {
            return Err(Error::Embedding("No vector for primary query".into()));
        };

        let collections = CollectionRef::for_categories(category_slugs);
        debug!(
            variant_count = variants.len(),
            collections = ?collections.iter().map(|c| c.collection_name()).collect::<Vec<_>>(),
            "Fanning out retrieval"
        );

        let queries = probes.iter().flat_map(|probe| {
            collections
                .iter()
                .map(move |collection| self.query_collection(collection, probe, settings))
        });
        let results = join_all(queries).await;

        let candidates = results
            .iter()
            .flat_map(|r| chunks_from_query(r, SourceKind::Global));
        let global_chunks =
            merge_chunks(candidates, settings.similarity_threshold, settings.max_context_chunks);

        let user_chunks = match (&self.user_docs, user_doc_paths.is_empty()) {
            (Some(scorer), false) => scorer.score(user_doc_paths, primary, settings).await,
            (None, false) => {
                warn!(
                    input_count = user_doc_paths.len(),
                    "User documents supplied but no scorer configured"
                );
                Vec::new()
            }
            (_, true) => Vec::new(),
        };

        let result = RetrievalResult {
            global_chunks,
            user_chunks,
        };
        tracing::Span::current().record(
            "result_count",
            result.global_chunks.len() + result.user_chunks.len(),
        );
        info!(
            global = result.global_chunks.len(),
            user = result.user_chunks.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Retrieval complete"
        );
        Ok(result)
    }

    /// Query one collection, retrying on failure. A collection that keeps
    /// failing contributes nothing.
    async fn query_collection(
        &self,
        collection: &CollectionRef,
        vector: &[f32],
        settings: &RetrievalSettings,
    ) -> QueryResult {
        let name = collection.collection_name();
        let attempts = settings.collection_retries + 1;
        for attempt in 1..=attempts {
            match self.vectors.query(&name, vector, settings.top_k, None).await {
                Ok(result) => return result,
                Err(e) => warn!(
                    collection = %name,
                    attempt,
                    error = %e,
                    "Collection query failed"
                ),
            }
        }
        QueryResult::default()
    }
}
