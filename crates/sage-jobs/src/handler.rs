//! Job types and the handler contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Kinds of background work submitted after an answer is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Rewrite the thread's rolling summary.
    Summarization,
    /// Extract durable facts about the user.
    MemoryExtraction,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Summarization => "summarization",
            JobType::MemoryExtraction => "memory_extraction",
        }
    }
}

/// A queued unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub payload: JsonValue,
    /// Executions so far, including the current one.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_type: JobType, payload: JsonValue) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_type,
            payload,
            attempt: 0,
            created_at: Utc::now(),
        }
    }
}

/// Progress callback type for job handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to job handlers.
pub struct JobContext {
    pub job: Job,
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            progress_callback: None,
        }
    }

    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    pub fn payload(&self) -> &JsonValue {
        &self.job.payload
    }

    /// Parse a UUID field from the payload.
    pub fn payload_uuid(&self, key: &str) -> Option<Uuid> {
        self.job
            .payload
            .get(key)
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.job.payload.get(key).and_then(|v| v.as_str())
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// Job failed with an error message.
    Failed(String),
    /// Job should run again, up to the worker's retry limit.
    Retry(String),
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn execute(&self, ctx: JobContext) -> JobResult;

    fn can_handle(&self, job_type: JobType) -> bool {
        self.job_type() == job_type
    }
}

/// No-op handler for testing.
pub struct NoOpHandler {
    job_type: JobType,
}

impl NoOpHandler {
    pub fn new(job_type: JobType) -> Self {
        Self { job_type }
    }
}

#[async_trait]
impl JobHandler for NoOpHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        ctx.report_progress(50, Some("Processing..."));
        ctx.report_progress(100, Some("Done"));
        JobResult::Success(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_payload_accessors() {
        let thread_id = Uuid::now_v7();
        let ctx = JobContext::new(Job::new(
            JobType::MemoryExtraction,
            json!({"threadId": thread_id.to_string(), "userId": "u1", "bad": "nope"}),
        ));
        assert_eq!(ctx.payload_uuid("threadId"), Some(thread_id));
        assert_eq!(ctx.payload_str("userId"), Some("u1"));
        assert_eq!(ctx.payload_uuid("bad"), None);
        assert_eq!(ctx.payload_uuid("missing"), None);
    }

    #[test]
    fn test_job_type_names() {
        assert_eq!(JobType::Summarization.as_str(), "summarization");
        assert_eq!(
            serde_json::to_value(JobType::MemoryExtraction).unwrap(),
            json!("memory_extraction")
        );
    }

    #[tokio::test]
    async fn test_noop_handler_reports_progress() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let ctx = JobContext::new(Job::new(JobType::Summarization, json!({})))
            .with_progress_callback(move |p, _| seen_clone.lock().unwrap().push(p));

        let handler = NoOpHandler::new(JobType::Summarization);
        assert!(handler.can_handle(JobType::Summarization));
        assert!(!handler.can_handle(JobType::MemoryExtraction));
        assert!(matches!(handler.execute(ctx).await, JobResult::Success(None)));
        assert_eq!(*seen.lock().unwrap(), vec![50, 100]);
    }
}
