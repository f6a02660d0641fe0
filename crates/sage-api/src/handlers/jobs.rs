//! Background job handlers run after an answer is persisted.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use sage_core::{defaults, CompletionBackend, ConversationStore, MessageRole, StoredMessage};
use sage_jobs::{JobContext, JobHandler, JobResult, JobType};

const SUMMARY_PROMPT: &str = "You maintain a running summary of a conversation between a user \
and an assistant. Merge the existing summary with the new messages into one concise paragraph. \
Keep names, decisions, numbers, and open questions. Reply with the summary only.";

const MEMORY_PROMPT: &str = "Extract durable facts about the user from the exchange below: \
role, team, location, preferences, ongoing projects. Ignore anything transient or about the \
assistant. Reply with a JSON array of short strings, or [] if there is nothing worth keeping.";

fn transcript(messages: &[StoredMessage]) -> String {
    messages
        .iter()
        .filter(|m| matches!(m.role, MessageRole::User | MessageRole::Assistant))
        .map(|m| format!("{}: {}", m.role.as_str(), m.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Handler for rolling thread summaries.
pub struct SummarizationHandler {
    conversations: Arc<dyn ConversationStore>,
    backend: Arc<dyn CompletionBackend>,
    trigger: usize,
    keep_recent: usize,
}

impl SummarizationHandler {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        backend: Arc<dyn CompletionBackend>,
    ) -> Self {
        Self {
            conversations,
            backend,
            trigger: defaults::SUMMARY_TRIGGER_MESSAGES,
            keep_recent: defaults::SUMMARY_KEEP_RECENT,
        }
    }

    pub fn with_window(mut self, trigger: usize, keep_recent: usize) -> Self {
        self.trigger = trigger;
        self.keep_recent = keep_recent.min(trigger);
        self
    }
}

#[async_trait]
impl JobHandler for SummarizationHandler {
    fn job_type(&self) -> JobType {
        JobType::Summarization
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "summarization", op = "execute")
    )]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        let start = Instant::now();
        let thread_id = match ctx.payload_uuid("threadId") {
            Some(id) => id,
            None => return JobResult::Failed("No threadId provided".into()),
        };

        let count = match self.conversations.count_messages(thread_id).await {
            Ok(n) => n.max(0) as usize,
            Err(e) => return JobResult::Failed(format!("Failed to count messages: {}", e)),
        };
        if count < self.trigger {
            debug!(%thread_id, count, trigger = self.trigger, "Thread below summary threshold");
            return JobResult::Success(Some(serde_json::json!({
                "skipped": true,
                "messages": count,
            })));
        }

        ctx.report_progress(20, Some("Loading thread..."));
        let messages = match self.conversations.get_messages(thread_id, count as i64).await {
            Ok(m) => m,
            Err(e) => return JobResult::Failed(format!("Failed to load messages: {}", e)),
        };
        let older = &messages[..messages.len().saturating_sub(self.keep_recent)];
        if older.is_empty() {
            return JobResult::Success(Some(serde_json::json!({ "skipped": true })));
        }

        let existing = match self.conversations.get_summary(thread_id).await {
            Ok(s) => s.unwrap_or_default(),
            Err(e) => return JobResult::Failed(format!("Failed to load summary: {}", e)),
        };

        let mut input = String::new();
        if !existing.trim().is_empty() {
            input.push_str("Existing summary:\n");
            input.push_str(existing.trim());
            input.push_str("\n\n");
        }
        input.push_str("New messages:\n");
        input.push_str(&transcript(older));

        ctx.report_progress(50, Some("Summarizing..."));
        let summary = match self.backend.complete(SUMMARY_PROMPT, &[], &input).await {
            Ok(s) => s.trim().to_string(),
            Err(e) if e.is_recoverable() => {
                return JobResult::Retry(format!("Summary generation failed: {}", e))
            }
            Err(e) => return JobResult::Failed(format!("Summary generation failed: {}", e)),
        };
        if summary.is_empty() {
            return JobResult::Failed("Model returned an empty summary".into());
        }

        if let Err(e) = self.conversations.set_summary(thread_id, &summary).await {
            return JobResult::Failed(format!("Failed to store summary: {}", e));
        }
        ctx.report_progress(100, Some("Summary stored"));

        info!(
            %thread_id,
            summarized = older.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Thread summary updated"
        );
        JobResult::Success(Some(serde_json::json!({
            "summarized": older.len(),
            "chars": summary.chars().count(),
        })))
    }
}

/// Parse the model's fact list. Accepts a bare array or one wrapped in prose
/// or a code fence.
fn parse_facts(raw: &str) -> Option<Vec<String>> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end < start {
        return None;
    }
    let facts: Vec<String> = serde_json::from_str(&raw[start..=end]).ok()?;
    Some(
        facts
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect(),
    )
}

/// Handler for per-user memory extraction.
pub struct MemoryExtractionHandler {
    conversations: Arc<dyn ConversationStore>,
    backend: Arc<dyn CompletionBackend>,
    max_facts: usize,
}

impl MemoryExtractionHandler {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        backend: Arc<dyn CompletionBackend>,
    ) -> Self {
        Self {
            conversations,
            backend,
            max_facts: defaults::MEMORY_MAX_FACTS,
        }
    }
}

#[async_trait]
impl JobHandler for MemoryExtractionHandler {
    fn job_type(&self) -> JobType {
        JobType::MemoryExtraction
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "jobs", component = "memory_extraction", op = "execute")
    )]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        let start = Instant::now();
        let thread_id = match ctx.payload_uuid("threadId") {
            Some(id) => id,
            None => return JobResult::Failed("No threadId provided".into()),
        };
        let user_id = match ctx.payload_str("userId") {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => return JobResult::Failed("No userId provided".into()),
        };

        let exchange = match self.conversations.get_messages(thread_id, 2).await {
            Ok(m) => m,
            Err(e) => return JobResult::Failed(format!("Failed to load messages: {}", e)),
        };
        let text = transcript(&exchange);
        if text.is_empty() {
            return JobResult::Success(Some(serde_json::json!({ "stored": 0 })));
        }

        ctx.report_progress(30, Some("Extracting facts..."));
        let raw = match self.backend.complete(MEMORY_PROMPT, &[], &text).await {
            Ok(r) => r,
            Err(e) if e.is_recoverable() => {
                return JobResult::Retry(format!("Memory extraction failed: {}", e))
            }
            Err(e) => return JobResult::Failed(format!("Memory extraction failed: {}", e)),
        };
        let Some(candidates) = parse_facts(&raw) else {
            warn!(%thread_id, "Memory extraction output was not a JSON list");
            return JobResult::Success(Some(serde_json::json!({ "stored": 0 })));
        };

        let existing = match self.conversations.get_memories(&user_id).await {
            Ok(m) => m,
            Err(e) => return JobResult::Failed(format!("Failed to load memories: {}", e)),
        };
        let mut known: Vec<String> = existing.iter().map(|m| m.to_lowercase()).collect();
        let mut fresh = Vec::new();
        for fact in candidates {
            if fresh.len() >= self.max_facts {
                break;
            }
            let key = fact.to_lowercase();
            if !known.contains(&key) {
                known.push(key);
                fresh.push(fact);
            }
        }

        if !fresh.is_empty() {
            if let Err(e) = self.conversations.add_memories(&user_id, &fresh).await {
                return JobResult::Failed(format!("Failed to store memories: {}", e));
            }
        }
        ctx.report_progress(100, None);

        info!(
            %thread_id,
            user_id = %user_id,
            stored = fresh.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Memory extraction complete"
        );
        JobResult::Success(Some(serde_json::json!({ "stored": fresh.len() })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sage_core::NewMessage;
    use sage_inference::mock::MockCompletionBackend;
    use sage_jobs::Job;
    use sage_store::MemoryConversationStore;
    use serde_json::json;
    use uuid::Uuid;

    async fn thread_with(store: &MemoryConversationStore, turns: usize) -> Uuid {
        let thread = store.create_thread("u1", Some("t")).await.unwrap();
        for i in 0..turns {
            store
                .add_message(NewMessage::user(thread.id, format!("question {}", i)))
                .await
                .unwrap();
            store
                .add_message(NewMessage::assistant(
                    thread.id,
                    format!("answer {}", i),
                    Default::default(),
                ))
                .await
                .unwrap();
        }
        thread.id
    }

    fn ctx(job_type: JobType, payload: serde_json::Value) -> JobContext {
        JobContext::new(Job::new(job_type, payload))
    }

    #[test]
    fn test_parse_facts() {
        assert_eq!(
            parse_facts("```json\n[\"Works in finance\", \" \"]\n```"),
            Some(vec!["Works in finance".to_string()])
        );
        assert_eq!(parse_facts("nothing here"), None);
        assert_eq!(parse_facts("[]"), Some(vec![]));
    }

    #[tokio::test]
    async fn test_summary_skipped_below_trigger() {
        let store = Arc::new(MemoryConversationStore::new());
        let thread_id = thread_with(&store, 2).await;
        let backend = Arc::new(MockCompletionBackend::new());
        let handler = SummarizationHandler::new(store.clone(), backend.clone());

        let result = handler
            .execute(ctx(JobType::Summarization, json!({ "threadId": thread_id.to_string() })))
            .await;
        assert!(matches!(result, JobResult::Success(Some(ref v)) if v["skipped"] == true));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_summary_covers_older_messages_only() {
        let store = Arc::new(MemoryConversationStore::new());
        let thread_id = thread_with(&store, 4).await;
        store.set_summary(thread_id, "Earlier: PTO questions.").await.unwrap();
        let backend =
            Arc::new(MockCompletionBackend::new().with_default_response("User asked about PTO."));
        let handler =
            SummarizationHandler::new(store.clone(), backend.clone()).with_window(6, 2);

        let result = handler
            .execute(ctx(JobType::Summarization, json!({ "threadId": thread_id.to_string() })))
            .await;
        assert!(matches!(result, JobResult::Success(_)));

        let calls = backend.get_calls();
        assert_eq!(calls.len(), 1);
        let input = calls[0].last_message_text();
        assert!(input.contains("Earlier: PTO questions."));
        assert!(input.contains("question 0"));
        assert!(input.contains("answer 2"));
        assert!(!input.contains("question 3"));
        assert_eq!(
            store.get_summary(thread_id).await.unwrap().as_deref(),
            Some("User asked about PTO.")
        );
    }

    #[tokio::test]
    async fn test_summary_requires_thread_id() {
        let store = Arc::new(MemoryConversationStore::new());
        let handler =
            SummarizationHandler::new(store, Arc::new(MockCompletionBackend::new()));
        let result = handler.execute(ctx(JobType::Summarization, json!({}))).await;
        assert!(matches!(result, JobResult::Failed(_)));
    }

    #[tokio::test]
    async fn test_memories_deduplicated_and_capped() {
        let store = Arc::new(MemoryConversationStore::new());
        let thread_id = thread_with(&store, 1).await;
        store
            .add_memories("u1", &["Works in Finance".to_string()])
            .await
            .unwrap();
        let backend = Arc::new(MockCompletionBackend::new().with_default_response(
            r#"["works in finance", "Based in Lisbon", "Prefers short answers", "Owns the Q3 budget"]"#,
        ));
        let mut handler = MemoryExtractionHandler::new(store.clone(), backend);
        handler.max_facts = 2;

        let result = handler
            .execute(ctx(
                JobType::MemoryExtraction,
                json!({ "threadId": thread_id.to_string(), "userId": "u1" }),
            ))
            .await;
        assert!(matches!(result, JobResult::Success(Some(ref v)) if v["stored"] == 2));
        assert_eq!(
            store.get_memories("u1").await.unwrap(),
            vec![
                "Works in Finance".to_string(),
                "Based in Lisbon".to_string(),
                "Prefers short answers".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_memory_backend_failure_is_retried() {
        let store = Arc::new(MemoryConversationStore::new());
        let thread_id = thread_with(&store, 1).await;
        let handler = MemoryExtractionHandler::new(
            store,
            Arc::new(MockCompletionBackend::new().with_failure()),
        );
        let result = handler
            .execute(ctx(
                JobType::MemoryExtraction,
                json!({ "threadId": thread_id.to_string(), "userId": "u1" }),
            ))
            .await;
        assert!(matches!(result, JobResult::Retry(_)));
    }
}
