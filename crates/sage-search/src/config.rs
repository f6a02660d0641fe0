//! Retrieval tuning knobs.

use sage_core::defaults;

/// Settings that shape one retrieval pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalSettings {
    /// Minimum score (`1 - distance`) a chunk needs to be kept.
    pub similarity_threshold: f32,
    /// Cap on merged knowledge-base chunks.
    pub max_context_chunks: usize,
    /// Maximum number of query variants, including the original.
    pub max_query_expansions: usize,
    /// Neighbors requested from each collection per probe.
    pub top_k: usize,
    /// Cap on user-document chunks.
    pub user_doc_top_k: usize,
    /// Chunks embedded per user document.
    pub user_doc_max_embed_chunks: usize,
    /// Retries for a failed collection query.
    pub collection_retries: u32,
    /// Acronym to expansion pairs, applied in both directions.
    pub acronyms: Vec<(String, String)>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: defaults::SIMILARITY_THRESHOLD,
            max_context_chunks: defaults::MAX_CONTEXT_CHUNKS,
            max_query_expansions: defaults::MAX_QUERY_EXPANSIONS,
            top_k: defaults::TOP_K,
            user_doc_top_k: defaults::USER_DOC_TOP_K,
            user_doc_max_embed_chunks: defaults::USER_DOC_MAX_EMBED_CHUNKS,
            collection_retries: defaults::COLLECTION_QUERY_RETRIES,
            acronyms: default_acronyms(),
        }
    }
}

fn default_acronyms() -> Vec<(String, String)> {
    [
        ("ea", "enterprise architecture"),
        ("sla", "service level agreement"),
        ("kpi", "key performance indicator"),
        ("pto", "paid time off"),
    ]
    .into_iter()
    .map(|(a, e)| (a.to_string(), e.to_string()))
    .collect()
}

/// Parse `"EA=Enterprise Architecture;SLA=Service Level Agreement"`.
///
/// Malformed entries are ignored.
pub fn parse_acronyms(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|entry| {
            let (acronym, expansion) = entry.split_once('=')?;
            let acronym = acronym.trim();
            let expansion = expansion.trim();
            if acronym.is_empty() || expansion.is_empty() {
                None
            } else {
                Some((acronym.to_lowercase(), expansion.to_lowercase()))
            }
        })
        .collect()
}

impl RetrievalSettings {
    /// Read settings from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `RAG_SIMILARITY_THRESHOLD` | `0.3` |
    /// | `RAG_MAX_CONTEXT_CHUNKS` | `8` |
    /// | `RAG_MAX_QUERY_EXPANSIONS` | `3` |
    /// | `RAG_TOP_K` | `10` |
    /// | `RAG_USER_DOC_TOP_K` | `5` |
    /// | `RAG_USER_DOC_MAX_CHUNKS` | `64` |
    /// | `RAG_ACRONYMS` | built-in list |
    pub fn from_env() -> Self {
        let base = Self::default();
        fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
        }

        Self {
            similarity_threshold: parsed("RAG_SIMILARITY_THRESHOLD")
                .unwrap_or(base.similarity_threshold),
            max_context_chunks: parsed("RAG_MAX_CONTEXT_CHUNKS")
                .unwrap_or(base.max_context_chunks),
            max_query_expansions: parsed::<usize>("RAG_MAX_QUERY_EXPANSIONS")
                .unwrap_or(base.max_query_expansions)
                .max(1),
            top_k: parsed("RAG_TOP_K").unwrap_or(base.top_k),
            user_doc_top_k: parsed("RAG_USER_DOC_TOP_K").unwrap_or(base.user_doc_top_k),
            user_doc_max_embed_chunks: parsed("RAG_USER_DOC_MAX_CHUNKS")
                .unwrap_or(base.user_doc_max_embed_chunks),
            collection_retries: base.collection_retries,
            acronyms: std::env::var("RAG_ACRONYMS")
                .map(|raw| parse_acronyms(&raw))
                .unwrap_or(base.acronyms),
        }
    }

    pub fn with_acronyms(mut self, acronyms: Vec<(String, String)>) -> Self {
        self.acronyms = acronyms;
        self
    }
}
