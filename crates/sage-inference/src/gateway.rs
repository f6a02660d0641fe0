//! Batched access to an embedding backend.

use std::sync::Arc;

use tracing::{debug, instrument};

use sage_core::defaults;
use sage_core::{EmbeddingBackend, Error, Result};

/// Splits large inputs into backend-sized batches and checks that every
/// input comes back with exactly one vector.
#[derive(Clone)]
pub struct EmbeddingGateway {
    backend: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
}

impl EmbeddingGateway {
    pub fn new(backend: Arc<dyn EmbeddingBackend>) -> Self {
        Self {
            backend,
            batch_size: defaults::EMBED_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn backend(&self) -> &Arc<dyn EmbeddingBackend> {
        &self.backend
    }

    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    /// Embed `texts`, one vector per input, in input order.
    #[instrument(skip(self, texts), fields(subsystem = "inference", component = "gateway", op = "embed", input_count = texts.len()))]
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let out = self.backend.embed_texts(batch).await?;
            if out.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "Backend returned {} vectors for {} inputs",
                    out.len(),
                    batch.len()
                )));
            }
            vectors.extend(out);
        }
        debug!(result_count = vectors.len(), "Embedded texts");
        Ok(vectors)
    }

    /// Embed a single text.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::Embedding("Backend returned no vector".into()))
    }
}
