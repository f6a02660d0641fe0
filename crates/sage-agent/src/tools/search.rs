use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use sage_core::Result;
use sage_search::{RetrievalSettings, Retriever};

use super::{Tool, ToolContext, ToolOutput};

/// Lets the model run a follow-up retrieval with its own query.
pub struct SearchKnowledgeBaseTool {
    retriever: Arc<Retriever>,
    settings: RetrievalSettings,
}

impl SearchKnowledgeBaseTool {
    pub fn new(retriever: Arc<Retriever>, settings: RetrievalSettings) -> Self {
        Self {
            retriever,
            settings,
        }
    }
}

#[async_trait]
impl Tool for SearchKnowledgeBaseTool {
    fn name(&self) -> &str {
        "search_knowledge_base"
    }

    fn display_name(&self) -> &str {
        "Searching knowledge base"
    }

    fn description(&self) -> &str {
        "Search the organization's knowledge base for passages relevant to a query. \
         Use this when the provided context does not answer the question."
    }

    fn parameters(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What to search for"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: JsonValue, ctx: &ToolContext) -> Result<ToolOutput> {
        let query = args["query"].as_str().unwrap_or_default();
        let categories = (!ctx.category_ids.is_empty()).then_some(ctx.category_ids.as_slice());
        let retrieval = self
            .retriever
            .retrieve(query, &[], categories, &self.settings)
            .await?;

        let results: Vec<JsonValue> = retrieval
            .global_chunks
            .iter()
            .map(|c| {
                json!({
                    "documentName": c.document_name,
                    "pageNumber": c.page_number,
                    "score": c.score,
                    "text": c.text,
                })
            })
            .collect();
        Ok(ToolOutput::new(json!({
            "query": query,
            "resultCount": results.len(),
            "results": results,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sage_core::{Chunk, VectorRecord, VectorStore};
    use sage_inference::mock::{MockEmbeddingBackend, MockEmbeddingGenerator};
    use sage_inference::EmbeddingGateway;
    use sage_store::MemoryVectorStore;

    #[tokio::test]
    async fn test_search_uses_request_categories() {
        let dim = 8;
        let store = Arc::new(MemoryVectorStore::new());
        store
            .upsert(
                "category_hr",
                vec![VectorRecord {
                    id: Chunk::chunk_id("handbook.pdf", 0),
                    embedding: MockEmbeddingGenerator::axis(0, dim),
                    document: "Leave accrues monthly.".into(),
                    metadata: json!({"documentName": "handbook.pdf", "pageNumber": 4, "chunkIndex": 0}),
                }],
            )
            .await
            .unwrap();
        let backend = MockEmbeddingBackend::new()
            .with_dimension(dim)
            .with_vector("leave", MockEmbeddingGenerator::axis(0, dim));
        let retriever = Retriever::new(EmbeddingGateway::new(Arc::new(backend)), store);
        let tool = SearchKnowledgeBaseTool::new(Arc::new(retriever), RetrievalSettings::default());

        let ctx = ToolContext {
            category_ids: vec!["hr".into()],
        };
        let out = tool.execute(json!({"query": "leave"}), &ctx).await.unwrap();
        assert_eq!(out.content["resultCount"], 1);
        assert_eq!(out.content["results"][0]["documentName"], "handbook.pdf");
        assert_eq!(out.content["results"][0]["pageNumber"], 4);
        assert!(out.artifact.is_none());

        let legacy = tool
            .execute(json!({"query": "leave"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(legacy.content["resultCount"], 0);
    }
}
