//! sage-api server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sage_agent::{
    AgentConfig, AgentExecutor, ContextAssembler, CreateChartTool, DataSourceRegistry,
    GenerateDocumentTool, QueryDataSourceTool, SearchKnowledgeBaseTool, SkillRegistry,
    SkillResolver, ToolLoop, ToolRegistry,
};
use sage_api::handlers::{MemoryExtractionHandler, SummarizationHandler};
use sage_api::{AppState, ResponseCache, StreamConfig, StreamOrchestrator};
use sage_core::{
    defaults, BlobStore, CompletionBackend, ConversationStore, EstimatingTokenizer,
    TiktokenTokenizer, Tokenizer, VectorStore,
};
use sage_inference::{EmbeddingGateway, OpenAIBackend};
use sage_jobs::{JobWorker, WorkerConfig, WorkerEvent};
use sage_search::{Ingestor, RetrievalSettings, Retriever, UserDocumentScorer};
use sage_store::{
    log_pool_metrics, Database, FilesystemBlobStore, MemoryConversationStore, MemoryVectorStore,
    PoolConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "sage_api=debug,tower_http=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sage_api=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("sage-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(defaults::SERVER_PORT);

    // Model backend
    let openai = Arc::new(OpenAIBackend::from_env()?);
    let backend: Arc<dyn CompletionBackend> = openai.clone();
    let gateway = EmbeddingGateway::new(openai.clone());
    info!(model = backend.model_name(), "Completion backend ready");

    let tokenizer: Arc<dyn Tokenizer> = match TiktokenTokenizer::new(backend.model_name())
        .or_else(|_| TiktokenTokenizer::cl100k())
    {
        Ok(t) => Arc::new(t),
        Err(e) => {
            warn!("Tokenizer unavailable, using estimates: {}", e);
            Arc::new(EstimatingTokenizer)
        }
    };

    // Storage
    let (vectors, conversations): (Arc<dyn VectorStore>, Arc<dyn ConversationStore>) =
        match std::env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => {
                let db = Database::connect_with_config(&url, PoolConfig::from_env()).await?;
                db.migrate().await?;
                log_pool_metrics(&db.pool);
                info!("Connected to database, migrations applied");
                let Database {
                    vectors,
                    conversations,
                    ..
                } = db;
                (Arc::new(vectors), Arc::new(conversations))
            }
            _ => {
                warn!("DATABASE_URL not set, using in-memory stores (data is lost on restart)");
                (
                    Arc::new(MemoryVectorStore::new()),
                    Arc::new(MemoryConversationStore::new()),
                )
            }
        };
    let blobs: Arc<dyn BlobStore> = Arc::new(FilesystemBlobStore::from_env());

    // Retrieval and ingestion
    let settings = RetrievalSettings::from_env();
    let retriever = Arc::new(
        Retriever::new(gateway.clone(), vectors.clone())
            .with_user_documents(UserDocumentScorer::new(blobs, gateway.clone())),
    );
    let ingestor = Arc::new(Ingestor::new(gateway, vectors));

    // Skills, data sources, tools
    let skills = Arc::new(SkillRegistry::from_env().await?);
    let data_sources = Arc::new(DataSourceRegistry::from_env().await?);
    let mut tools = ToolRegistry::new()
        .with_tool(Arc::new(SearchKnowledgeBaseTool::new(
            retriever.clone(),
            settings.clone(),
        )))
        .with_tool(Arc::new(GenerateDocumentTool::new()))
        .with_tool(Arc::new(CreateChartTool::new()));
    if !data_sources.is_empty() {
        tools = tools.with_tool(Arc::new(QueryDataSourceTool::new(data_sources.clone())));
    }
    let tools = Arc::new(tools);

    let cache = ResponseCache::from_env().await;

    // Background jobs
    let worker = JobWorker::new(WorkerConfig::from_env());
    worker
        .register_handler(SummarizationHandler::new(
            conversations.clone(),
            backend.clone(),
        ))
        .await;
    worker
        .register_handler(MemoryExtractionHandler::new(
            conversations.clone(),
            backend.clone(),
        ))
        .await;
    let jobs = worker.queue();
    let mut worker_events = worker.events();
    let worker_handle = worker.start();
    tokio::spawn(async move {
        loop {
            match worker_events.recv().await {
                Ok(WorkerEvent::JobFailed { job_id, job_type, error }) => {
                    error!(%job_id, job_type = job_type.as_str(), error = %error, "Background job failed");
                }
                Ok(WorkerEvent::JobRetrying {
                    job_id,
                    attempt,
                    error,
                    ..
                }) => {
                    warn!(%job_id, attempt, error = %error, "Background job will retry");
                }
                Ok(WorkerEvent::WorkerStopped) => break,
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Worker event listener lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Orchestrator
    let orchestrator = StreamOrchestrator::new(
        conversations,
        retriever,
        settings,
        SkillResolver::new(skills.clone()).with_tokenizer(tokenizer.clone()),
        backend.clone(),
        ToolLoop::new(backend.clone(), tools.clone()),
        AgentExecutor::new(backend, AgentConfig::from_env())
            .with_tools(tools)
            .with_tokenizer(tokenizer.clone()),
        cache.clone(),
    )
    .with_assembler(ContextAssembler::new().with_data_sources(data_sources))
    .with_jobs(jobs)
    .with_config(StreamConfig::from_env())
    .with_tokenizer(tokenizer);

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        ingestor,
        skills,
        cache,
    };
    let app = sage_api::router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await?;

    if let Err(e) = worker_handle.shutdown().await {
        warn!("Job worker did not stop cleanly: {}", e);
    }
    info!("Server stopped");
    Ok(())
}
