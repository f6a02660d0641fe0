//! Stream orchestrator.
//!
//! Drives one chat turn through `init → rag_retrieval → tool_execution →
//! generating → complete`, emitting [`StreamEvent`]s as it goes. The turn
//! runs on its own task; the caller receives [`StreamFrame`]s, which also
//! carry heartbeats. Dropping the receiver cancels the turn: nothing is
//! persisted for a turn that never reached `done`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use sage_agent::{
    AgentExecutor, AgentRequest, ContextAssembler, SkillResolver, ToolLoop,
    ToolLoopRequest,
};
use sage_core::{
    defaults, AuthPrincipal, CachedAnswer, ChatMessage, CompletionBackend, ConversationStore,
    Error, EstimatingTokenizer, MessageContent, MessageMetadata, MessageRole, NewMessage,
    Result, SkillSummary, StoredMessage, StreamEvent, StreamPhase, Thread, TokenUsage, Tokenizer,
};
use sage_jobs::{JobQueue, JobType};
use sage_search::{RetrievalSettings, Retriever};

use crate::cache::ResponseCache;

/// Body of a chat request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatRequest {
    pub message: String,
    pub thread_id: Option<Uuid>,
    pub category_ids: Vec<String>,
    pub enable_tools: bool,
    pub autonomous: bool,
    /// Base64 images or `data:` URIs attached to this turn.
    pub images: Vec<String>,
}

fn category_pattern() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9][a-z0-9_-]{0,63}$").expect("static regex"))
}

impl ChatRequest {
    /// Reject malformed requests before any work starts.
    pub fn validate(&self) -> Result<()> {
        let message = self.message.trim();
        if message.is_empty() {
            return Err(Error::InvalidInput("message must not be empty".into()));
        }
        if message.chars().count() > defaults::MAX_MESSAGE_CHARS {
            return Err(Error::InvalidInput(format!(
                "message exceeds {} characters",
                defaults::MAX_MESSAGE_CHARS
            )));
        }
        if let Some(bad) = self
            .category_ids
            .iter()
            .find(|c| !category_pattern().is_match(c))
        {
            return Err(Error::InvalidInput(format!("invalid category id '{}'", bad)));
        }
        if self.images.len() > defaults::MAX_IMAGES {
            return Err(Error::InvalidInput(format!(
                "at most {} images per message",
                defaults::MAX_IMAGES
            )));
        }
        if self.images.iter().any(|i| i.trim().is_empty()) {
            return Err(Error::InvalidInput("images must not be empty".into()));
        }
        Ok(())
    }
}

/// A validated request bound to its caller and thread.
#[derive(Debug, Clone)]
pub struct PreparedTurn {
    pub principal: AuthPrincipal,
    pub thread: Thread,
    pub request: ChatRequest,
}

/// What the transport writes for one step of the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Event(StreamEvent),
    /// Keep-alive with no payload.
    Heartbeat,
}

/// Timing and limits for streamed turns.
///
/// # Environment Variables
///
/// - `STREAM_HEARTBEAT_SECS`: Keep-alive interval (default: 15)
/// - `STREAM_SLICE_CHARS`: Characters per sliced chunk (default: 24)
/// - `STREAM_SLICE_DELAY_MS`: Pause between sliced chunks (default: 15)
/// - `SAGE_SYSTEM_PROMPT`: Base system prompt
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub heartbeat: Duration,
    pub slice_chars: usize,
    pub slice_delay: Duration,
    pub channel_capacity: usize,
    pub history_limit: i64,
    pub base_prompt: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(defaults::STREAM_HEARTBEAT_SECS),
            slice_chars: defaults::STREAM_SLICE_CHARS,
            slice_delay: Duration::from_millis(defaults::STREAM_SLICE_DELAY_MS),
            channel_capacity: defaults::STREAM_CHANNEL_CAPACITY,
            history_limit: defaults::HISTORY_LIMIT,
            base_prompt: defaults::SYSTEM_PROMPT.to_string(),
        }
    }
}

impl StreamConfig {
    pub fn from_env() -> Self {
        fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
        }

        let base = Self::default();
        Self {
            heartbeat: parsed("STREAM_HEARTBEAT_SECS")
                .filter(|s: &u64| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(base.heartbeat),
            slice_chars: parsed::<usize>("STREAM_SLICE_CHARS")
                .unwrap_or(base.slice_chars)
                .max(1),
            slice_delay: parsed("STREAM_SLICE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(base.slice_delay),
            base_prompt: std::env::var("SAGE_SYSTEM_PROMPT")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(base.base_prompt),
            ..base
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_slicing(mut self, chars: usize, delay: Duration) -> Self {
        self.slice_chars = chars.max(1);
        self.slice_delay = delay;
        self
    }
}

/// Split `text` into pieces of at most `size` characters.
pub fn slice_text(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

/// Send one event; a closed channel means the client went away.
async fn emit(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<()> {
    tx.send(event).await.map_err(|_| Error::Aborted)
}

/// Move events to the transport, interleaving heartbeats, until a terminal
/// event passes or either side closes.
async fn forward_frames(
    mut events: mpsc::Receiver<StreamEvent>,
    frames: mpsc::Sender<StreamFrame>,
    heartbeat: Duration,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    let terminal = event.is_terminal();
                    if frames.send(StreamFrame::Event(event)).await.is_err() || terminal {
                        break;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if frames.send(StreamFrame::Heartbeat).await.is_err() {
                    break;
                }
            }
            _ = frames.closed() => break,
        }
    }
}

/// Generated answer before persistence.
#[derive(Debug, Default)]
struct Generated {
    content: String,
    usage: TokenUsage,
    tools_used: Vec<String>,
}

/// Runs chat turns.
pub struct StreamOrchestrator {
    conversations: Arc<dyn ConversationStore>,
    retriever: Arc<Retriever>,
    settings: RetrievalSettings,
    resolver: SkillResolver,
    assembler: ContextAssembler,
    backend: Arc<dyn CompletionBackend>,
    tool_loop: ToolLoop,
    agent: AgentExecutor,
    cache: ResponseCache,
    jobs: Option<JobQueue>,
    tokenizer: Arc<dyn Tokenizer>,
    config: StreamConfig,
}

impl StreamOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        retriever: Arc<Retriever>,
        settings: RetrievalSettings,
        resolver: SkillResolver,
        backend: Arc<dyn CompletionBackend>,
        tool_loop: ToolLoop,
        agent: AgentExecutor,
        cache: ResponseCache,
    ) -> Self {
        Self {
            conversations,
            retriever,
            settings,
            resolver,
            assembler: ContextAssembler::new(),
            backend,
            tool_loop,
            agent,
            cache,
            jobs: None,
            tokenizer: Arc::new(EstimatingTokenizer),
            config: StreamConfig::default(),
        }
    }

    pub fn with_assembler(mut self, assembler: ContextAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_jobs(mut self, jobs: JobQueue) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Validate the request and bind it to a thread owned by the caller.
    ///
    /// Fails before any stream is opened.
    pub async fn prepare(
        &self,
        principal: AuthPrincipal,
        request: ChatRequest,
    ) -> Result<PreparedTurn> {
        request.validate()?;

        let thread = match request.thread_id {
            Some(thread_id) => self
                .conversations
                .get_thread(thread_id)
                .await?
                .filter(|t| t.user_id == principal.id)
                .ok_or_else(|| Error::NotFound(format!("thread {}", thread_id)))?,
            None => {
                let title: String = request
                    .message
                    .trim()
                    .chars()
                    .take(defaults::THREAD_TITLE_CHARS)
                    .collect();
                self.conversations
                    .create_thread(&principal.id, Some(&title))
                    .await?
            }
        };

        Ok(PreparedTurn {
            principal,
            thread,
            request,
        })
    }

    /// Start a prepared turn. Frames arrive on the returned receiver.
    pub fn start(self: &Arc<Self>, turn: PreparedTurn) -> mpsc::Receiver<StreamFrame> {
        let capacity = self.config.channel_capacity.max(1);
        let (frame_tx, frame_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::channel(capacity);

        tokio::spawn(forward_frames(event_rx, frame_tx, self.config.heartbeat));

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(turn, event_tx).await;
        });

        frame_rx
    }

    #[instrument(
        skip(self, turn, tx),
        fields(subsystem = "api", component = "orchestrator", op = "run", thread_id = %turn.thread.id)
    )]
    async fn run(&self, turn: PreparedTurn, tx: mpsc::Sender<StreamEvent>) {
        let start = Instant::now();
        match self.execute(&turn, &tx).await {
            Ok(message_id) => info!(
                %message_id,
                duration_ms = start.elapsed().as_millis() as u64,
                "Turn complete"
            ),
            Err(Error::Aborted) => info!(
                duration_ms = start.elapsed().as_millis() as u64,
                "Client disconnected, turn abandoned"
            ),
            Err(e) => {
                warn!(error = %e, code = %e.code(), "Turn failed");
                let _ = tx.send(StreamEvent::from_error(&e)).await;
            }
        }
    }

    async fn execute(&self, turn: &PreparedTurn, tx: &mpsc::Sender<StreamEvent>) -> Result<Uuid> {
        let request = &turn.request;
        let thread_id = turn.thread.id;
        emit(tx, StreamEvent::status(StreamPhase::Init)).await?;

        let stored = self
            .conversations
            .get_messages(thread_id, self.config.history_limit)
            .await?;
        let history = to_history(&stored);
        let upload_paths = self.conversations.get_upload_paths(thread_id).await?;

        let cacheable = upload_paths.is_empty()
            && request.images.is_empty()
            && !request.enable_tools
            && !request.autonomous;
        let cache_key = cacheable.then(|| {
            self.cache
                .cache_key(&request.message, &request.category_ids)
        });

        if let Some(key) = &cache_key {
            if let Some(hit) = self.cache.get::<CachedAnswer>(key).await {
                debug!(cache_hit = true, "Serving cached answer");
                return self.finish_cached(turn, hit, tx).await;
            }
        }

        emit(tx, StreamEvent::status(StreamPhase::RagRetrieval)).await?;
        let categories = (!request.category_ids.is_empty()).then_some(&request.category_ids[..]);
        let retrieval = self
            .retriever
            .retrieve(&request.message, &upload_paths, categories, &self.settings)
            .await?;
        let skills = self
            .resolver
            .resolve(&request.category_ids, &request.message)
            .await;

        let memories = self.conversations.get_memories(&turn.principal.id).await?;
        let memory_text = (!memories.is_empty()).then(|| {
            memories
                .iter()
                .map(|m| format!("- {}", m))
                .collect::<Vec<_>>()
                .join("\n")
        });
        let summary = self.conversations.get_summary(thread_id).await?;

        let assembled = self.assembler.assemble(
            &retrieval,
            &skills,
            memory_text.as_deref(),
            summary.as_deref(),
            &self.config.base_prompt,
            &request.category_ids,
        );

        let loop_request = ToolLoopRequest {
            system_prompt: assembled.system_prompt.clone(),
            history,
            context: assembled.context_block.clone(),
            message: request.message.clone(),
            enable_tools: request.enable_tools,
            category_ids: request.category_ids.clone(),
            images: request.images.clone(),
        };
        // Autonomous turns always run their tasks against the tool registry.
        let tools_available = if request.autonomous {
            self.tool_loop.tools().names(&request.category_ids)
        } else {
            self.tool_loop.tools_available(&loop_request)
        };

        emit(
            tx,
            StreamEvent::ContextLoaded {
                skills: skills
                    .skills
                    .iter()
                    .map(|s| SkillSummary {
                        name: s.name.clone(),
                        trigger_reason: s.trigger_reason,
                    })
                    .collect(),
                tools_available: tools_available.clone(),
            },
        )
        .await?;

        let generated = if request.autonomous {
            emit(tx, StreamEvent::status(StreamPhase::ToolExecution)).await?;
            let outcome = self
                .agent
                .run(
                    &AgentRequest {
                        message: request.message.clone(),
                        system_prompt: assembled.system_prompt.clone(),
                        context_block: assembled.context_block.clone(),
                        enable_tools: true,
                        category_ids: request.category_ids.clone(),
                    },
                    tx,
                )
                .await?;
            emit(tx, StreamEvent::status(StreamPhase::Generating)).await?;
            self.slice_out(&outcome.summary, tx).await?;
            Generated {
                content: outcome.summary,
                usage: outcome.usage,
                tools_used: outcome.tools_used,
            }
        } else if !tools_available.is_empty() {
            emit(tx, StreamEvent::status(StreamPhase::ToolExecution)).await?;
            let generated = self.run_tool_loop(loop_request, tx).await?;
            emit(tx, StreamEvent::status(StreamPhase::Generating)).await?;
            self.slice_out(&generated.content, tx).await?;
            generated
        } else {
            emit(tx, StreamEvent::status(StreamPhase::Generating)).await?;
            if self.backend.supports_streaming() {
                self.stream_completion(&loop_request, tx).await?
            } else {
                let generated = self.run_tool_loop(loop_request, tx).await?;
                self.slice_out(&generated.content, tx).await?;
                generated
            }
        };

        let sources = retrieval.sources();
        emit(
            tx,
            StreamEvent::Sources {
                sources: sources.clone(),
            },
        )
        .await?;

        if let Some(key) = &cache_key {
            let answer = CachedAnswer {
                content: generated.content.clone(),
                sources: sources.clone(),
                skills: skills.names(),
                created_at: Utc::now(),
            };
            self.cache.set(key, &answer).await;
        }

        let metadata = MessageMetadata {
            prompt_tokens: generated.usage.prompt_tokens,
            completion_tokens: generated.usage.completion_tokens,
            total_tokens: generated.usage.total_tokens,
            sources,
            skills: skills.names(),
            tools_used: generated.tools_used,
            cached: false,
            autonomous: request.autonomous,
        };
        self.complete(turn, generated.content, metadata, tx).await
    }

    async fn finish_cached(
        &self,
        turn: &PreparedTurn,
        hit: CachedAnswer,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<Uuid> {
        emit(tx, StreamEvent::status(StreamPhase::Generating)).await?;
        self.slice_out(&hit.content, tx).await?;
        emit(
            tx,
            StreamEvent::Sources {
                sources: hit.sources.clone(),
            },
        )
        .await?;

        let metadata = MessageMetadata {
            sources: hit.sources,
            skills: hit.skills,
            cached: true,
            ..Default::default()
        };
        self.complete(turn, hit.content, metadata, tx).await
    }

    /// Tool loop with tool progress bridged onto the event stream.
    async fn run_tool_loop(
        &self,
        request: ToolLoopRequest,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<Generated> {
        let outcome = self
            .tool_loop
            .complete_bridged(request, tx, self.config.channel_capacity)
            .await?;
        Ok(Generated {
            content: outcome.content,
            usage: outcome.usage,
            tools_used: outcome.tools_used,
        })
    }

    /// Forward model deltas as they arrive.
    async fn stream_completion(
        &self,
        request: &ToolLoopRequest,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<Generated> {
        let messages = request.initial_messages();
        let mut stream = self
            .backend
            .complete_stream(&request.system_prompt, &messages)
            .await?;

        let mut content = String::new();
        while let Some(delta) = stream.next().await {
            let delta = delta?;
            if delta.is_empty() {
                continue;
            }
            content.push_str(&delta);
            emit(tx, StreamEvent::chunk(delta)).await?;
        }

        let prompt_tokens = self.tokenizer.count_tokens(&request.system_prompt)
            + messages
                .iter()
                .map(|m| self.tokenizer.count_tokens(&m.content.as_text()))
                .sum::<usize>();
        let completion_tokens = self.tokenizer.count_tokens(&content);
        Ok(Generated {
            content,
            usage: TokenUsage {
                prompt_tokens: prompt_tokens as u32,
                completion_tokens: completion_tokens as u32,
                total_tokens: (prompt_tokens + completion_tokens) as u32,
            },
            tools_used: Vec::new(),
        })
    }

    /// Emit finished text as fixed-size chunks.
    async fn slice_out(&self, text: &str, tx: &mpsc::Sender<StreamEvent>) -> Result<()> {
        for (i, piece) in slice_text(text, self.config.slice_chars)
            .into_iter()
            .enumerate()
        {
            if i > 0 && !self.config.slice_delay.is_zero() {
                tokio::time::sleep(self.config.slice_delay).await;
            }
            emit(tx, StreamEvent::chunk(piece)).await?;
        }
        Ok(())
    }

    /// Persist the exchange, queue follow-up jobs, and emit `done`.
    async fn complete(
        &self,
        turn: &PreparedTurn,
        content: String,
        metadata: MessageMetadata,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<Uuid> {
        emit(tx, StreamEvent::status(StreamPhase::Complete)).await?;
        if tx.is_closed() {
            return Err(Error::Aborted);
        }

        let thread_id = turn.thread.id;
        self.conversations
            .add_message(NewMessage::user(thread_id, turn.request.message.trim()))
            .await?;
        let message = self
            .conversations
            .add_message(NewMessage::assistant(thread_id, content, metadata))
            .await?;

        self.submit_jobs(turn);
        emit(
            tx,
            StreamEvent::Done {
                message_id: message.id,
            },
        )
        .await?;
        Ok(message.id)
    }

    fn submit_jobs(&self, turn: &PreparedTurn) {
        let Some(queue) = &self.jobs else {
            return;
        };
        let thread_id = turn.thread.id.to_string();
        let submissions = [
            (JobType::Summarization, json!({ "threadId": thread_id })),
            (
                JobType::MemoryExtraction,
                json!({ "threadId": thread_id, "userId": turn.principal.id }),
            ),
        ];
        for (job_type, payload) in submissions {
            if let Err(e) = queue.submit(job_type, payload) {
                warn!(?job_type, error = %e, "Failed to queue background job");
            }
        }
    }
}

/// Prior turns as model history; only user and assistant text is replayed.
fn to_history(messages: &[StoredMessage]) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter_map(|m| match m.role {
            MessageRole::User => Some(ChatMessage::user(MessageContent::Text(m.content.clone()))),
            MessageRole::Assistant => Some(ChatMessage::assistant(m.content.clone())),
            _ => None,
        })
        .collect()
}
