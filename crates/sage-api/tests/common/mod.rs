#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use sage_agent::{
    AgentConfig, AgentExecutor, CreateChartTool, GenerateDocumentTool, SkillRegistry,
    SkillResolver, ToolLoop, ToolRegistry,
};
use sage_api::{AppState, ResponseCache, StreamConfig, StreamFrame, StreamOrchestrator};
use sage_core::{AuthPrincipal, StreamEvent};
use sage_inference::mock::{MockCompletionBackend, MockEmbeddingBackend};
use sage_inference::EmbeddingGateway;
use sage_search::{Ingestor, RetrievalSettings, Retriever};
use sage_store::{MemoryConversationStore, MemoryVectorStore};

pub struct Harness {
    pub state: AppState,
    pub orchestrator: Arc<StreamOrchestrator>,
    pub conversations: Arc<MemoryConversationStore>,
    pub vectors: Arc<MemoryVectorStore>,
    pub backend: Arc<MockCompletionBackend>,
    pub embeddings: Arc<MockEmbeddingBackend>,
    pub cache: ResponseCache,
}

pub fn harness(backend: MockCompletionBackend) -> Harness {
    let backend = Arc::new(backend);
    let embeddings = Arc::new(MockEmbeddingBackend::new());
    let gateway = EmbeddingGateway::new(embeddings.clone());
    let vectors = Arc::new(MemoryVectorStore::new());
    let conversations = Arc::new(MemoryConversationStore::new());

    let retriever = Arc::new(Retriever::new(gateway.clone(), vectors.clone()));
    let skills = Arc::new(SkillRegistry::from_yaml("version: 1\nskills: []\n").unwrap());
    let tools = Arc::new(
        ToolRegistry::new()
            .with_tool(Arc::new(GenerateDocumentTool::new()))
            .with_tool(Arc::new(CreateChartTool::new())),
    );
    let cache = ResponseCache::local(16, Duration::from_secs(60));

    let orchestrator = Arc::new(
        StreamOrchestrator::new(
            conversations.clone(),
            retriever,
            RetrievalSettings::default(),
            SkillResolver::new(skills.clone()),
            backend.clone(),
            ToolLoop::new(backend.clone(), tools.clone()),
            AgentExecutor::new(backend.clone(), AgentConfig::default()).with_tools(tools),
            cache.clone(),
        )
        .with_config(
            StreamConfig::default()
                .with_heartbeat(Duration::from_secs(30))
                .with_slicing(8, Duration::ZERO),
        ),
    );

    let state = AppState {
        orchestrator: orchestrator.clone(),
        ingestor: Arc::new(Ingestor::new(gateway, vectors.clone())),
        skills,
        cache: cache.clone(),
    };

    Harness {
        state,
        orchestrator,
        conversations,
        vectors,
        backend,
        embeddings,
        cache,
    }
}

pub fn principal() -> AuthPrincipal {
    AuthPrincipal {
        id: "user-1".into(),
        email: "user-1@example.com".into(),
    }
}

/// Drain a stream to its end, dropping heartbeats.
pub async fn collect_events(mut frames: mpsc::Receiver<StreamFrame>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(frame) = frames.recv().await {
        if let StreamFrame::Event(event) = frame {
            events.push(event);
        }
    }
    events
}

pub fn text_of(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk { text_delta } => Some(text_delta.as_str()),
            _ => None,
        })
        .collect()
}
