//! Job worker and queue for processing background jobs in-process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, mpsc, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use sage_core::{defaults, Error, Result};

use crate::handler::{Job, JobContext, JobHandler, JobResult, JobType};

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Maximum number of concurrent jobs.
    pub max_concurrent_jobs: usize,
    /// Jobs that may wait in the queue before submissions are rejected.
    pub queue_capacity: usize,
    /// Per-job execution ceiling.
    pub job_timeout_secs: u64,
    /// Attempts after the first for jobs that return [`JobResult::Retry`].
    pub max_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            queue_capacity: defaults::JOB_QUEUE_CAPACITY,
            job_timeout_secs: defaults::JOB_TIMEOUT_SECS,
            max_retries: defaults::JOB_MAX_RETRIES,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `2` | Max concurrent jobs |
    /// | `JOB_QUEUE_CAPACITY` | `256` | Queued jobs before submit fails |
    /// | `JOB_TIMEOUT_SECS` | `120` | Per-job timeout |
    /// | `JOB_MAX_RETRIES` | `2` | Retries for jobs that ask for one |
    pub fn from_env() -> Self {
        fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
        }

        let base = Self::default();
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        Self {
            enabled,
            max_concurrent_jobs: parsed::<usize>("JOB_MAX_CONCURRENT")
                .unwrap_or(base.max_concurrent_jobs)
                .max(1),
            queue_capacity: parsed::<usize>("JOB_QUEUE_CAPACITY")
                .unwrap_or(base.queue_capacity)
                .max(1),
            job_timeout_secs: parsed("JOB_TIMEOUT_SECS").unwrap_or(base.job_timeout_secs),
            max_retries: parsed("JOB_MAX_RETRIES").unwrap_or(base.max_retries),
        }
    }

    /// Set maximum concurrent jobs.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A job was started.
    JobStarted { job_id: Uuid, job_type: JobType },
    /// Job progress was updated.
    JobProgress {
        job_id: Uuid,
        percent: i32,
        message: Option<String>,
    },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, job_type: JobType },
    /// A job asked for a retry and was put back on the queue.
    JobRetrying {
        job_id: Uuid,
        job_type: JobType,
        attempt: u32,
        error: String,
    },
    /// A job failed.
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Cloneable submission side of the job queue.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    /// Queue a job without waiting. Fails when the queue is full or the
    /// worker has stopped.
    pub fn submit(&self, job_type: JobType, payload: JsonValue) -> Result<Uuid> {
        let job = Job::new(job_type, payload);
        let job_id = job.id;
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::Job("Job queue is full".into()),
            mpsc::error::TrySendError::Closed(_) => Error::Job("Job worker is not running".into()),
        })?;
        debug!(?job_id, ?job_type, "Job queued");
        Ok(job_id)
    }
}

/// Handle for controlling a running worker. Dropping it stops the worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down after in-flight jobs finish.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Job worker that processes jobs from the in-process queue.
pub struct JobWorker {
    config: WorkerConfig,
    handlers: Arc<RwLock<HashMap<JobType, Arc<dyn JobHandler>>>>,
    event_tx: broadcast::Sender<WorkerEvent>,
    queue_tx: mpsc::Sender<Job>,
    queue_rx: mpsc::Receiver<Job>,
}

impl JobWorker {
    /// Create a new job worker.
    pub fn new(config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::JOB_EVENT_CAPACITY);
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            queue_tx,
            queue_rx,
        }
    }

    /// Register a handler for a job type.
    pub async fn register_handler<H: JobHandler + 'static>(&self, handler: H) {
        let job_type = handler.job_type();
        let mut handlers = self.handlers.write().await;
        handlers.insert(job_type, Arc::new(handler));
        debug!(?job_type, "Registered job handler");
    }

    /// Submission handle for this worker's queue.
    pub fn queue(&self) -> JobQueue {
        JobQueue {
            tx: self.queue_tx.clone(),
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(self.run(shutdown_rx));

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Receive jobs and run up to `max_concurrent_jobs` of them at once.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker"))]
    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) {
        let JobWorker {
            config,
            handlers,
            event_tx,
            queue_tx,
            mut queue_rx,
        } = self;

        if !config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        info!(
            max_concurrent = config.max_concurrent_jobs,
            queue_capacity = config.queue_capacity,
            "Job worker started"
        );
        let _ = event_tx.send(WorkerEvent::WorkerStarted);

        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        let runner = JobRunner {
            handlers,
            event_tx: event_tx.clone(),
            retry_tx: queue_tx,
            timeout: Duration::from_secs(config.job_timeout_secs),
            max_retries: config.max_retries,
        };
        let mut tasks = JoinSet::new();

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let job = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                job = queue_rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let runner = runner.clone();
            tasks.spawn(async move {
                let _permit = permit;
                runner.execute_job(job).await;
            });

            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    error!(error = ?e, "Job task panicked");
                }
            }
        }

        info!(in_flight = tasks.len(), "Job worker received shutdown signal");
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = ?e, "Job task panicked");
            }
        }

        let _ = event_tx.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }
}

/// Lightweight reference bundle for executing a single job in a spawned task.
#[derive(Clone)]
struct JobRunner {
    handlers: Arc<RwLock<HashMap<JobType, Arc<dyn JobHandler>>>>,
    event_tx: broadcast::Sender<WorkerEvent>,
    retry_tx: mpsc::Sender<Job>,
    timeout: Duration,
    max_retries: u32,
}

impl JobRunner {
    async fn execute_job(self, mut job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let job_type = job.job_type;
        job.attempt += 1;

        info!(?job_id, ?job_type, attempt = job.attempt, "Processing job");
        let _ = self
            .event_tx
            .send(WorkerEvent::JobStarted { job_id, job_type });

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&job_type).cloned()
        };

        let retry_copy = job.clone();
        let result = match handler {
            Some(handler) => {
                let event_tx = self.event_tx.clone();
                let ctx = JobContext::new(job).with_progress_callback(move |percent, message| {
                    let _ = event_tx.send(WorkerEvent::JobProgress {
                        job_id,
                        percent,
                        message: message.map(String::from),
                    });
                });

                match tokio::time::timeout(self.timeout, handler.execute(ctx)).await {
                    Ok(result) => result,
                    Err(_) => {
                        let secs = self.timeout.as_secs();
                        warn!(?job_id, ?job_type, "Job exceeded timeout of {}s", secs);
                        JobResult::Failed(format!("Job exceeded timeout of {}s", secs))
                    }
                }
            }
            None => {
                warn!(?job_type, "No handler registered for job type");
                JobResult::Failed(format!("No handler for job type: {:?}", job_type))
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            JobResult::Success(_) => {
                info!(?job_id, ?job_type, duration_ms, "Job completed successfully");
                let _ = self
                    .event_tx
                    .send(WorkerEvent::JobCompleted { job_id, job_type });
            }
            JobResult::Retry(error) if retry_copy.attempt <= self.max_retries => {
                let attempt = retry_copy.attempt;
                match self.retry_tx.try_send(retry_copy) {
                    Ok(()) => {
                        warn!(?job_id, ?job_type, %error, attempt, "Job will be retried");
                        let _ = self.event_tx.send(WorkerEvent::JobRetrying {
                            job_id,
                            job_type,
                            attempt,
                            error,
                        });
                    }
                    Err(_) => {
                        let error = format!("{} (retry could not be queued)", error);
                        self.report_failure(job_id, job_type, error, duration_ms);
                    }
                }
            }
            JobResult::Failed(error) | JobResult::Retry(error) => {
                self.report_failure(job_id, job_type, error, duration_ms);
            }
        }
    }

    fn report_failure(&self, job_id: Uuid, job_type: JobType, error: String, duration_ms: u64) {
        warn!(?job_id, ?job_type, %error, duration_ms, "Job failed");
        let _ = self.event_tx.send(WorkerEvent::JobFailed {
            job_id,
            job_type,
            error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::NoOpHandler;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    /// Wait for the next completed/failed event, skipping lifecycle noise.
    async fn next_outcome(events: &mut broadcast::Receiver<WorkerEvent>) -> WorkerEvent {
        loop {
            match events.recv().await.unwrap() {
                ev @ (WorkerEvent::JobCompleted { .. } | WorkerEvent::JobFailed { .. }) => {
                    return ev
                }
                _ => continue,
            }
        }
    }

    struct SleepyHandler(Duration);

    #[async_trait]
    impl JobHandler for SleepyHandler {
        fn job_type(&self) -> JobType {
            JobType::Summarization
        }

        async fn execute(&self, _ctx: JobContext) -> JobResult {
            tokio::time::sleep(self.0).await;
            JobResult::Success(None)
        }
    }

    struct FlakyHandler {
        failures_before_success: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        fn job_type(&self) -> JobType {
            JobType::MemoryExtraction
        }

        async fn execute(&self, _ctx: JobContext) -> JobResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures_before_success {
                JobResult::Retry(format!("transient {}", n))
            } else {
                JobResult::Success(Some(json!({"calls": n})))
            }
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl JobHandler for FailingHandler {
        fn job_type(&self) -> JobType {
            JobType::Summarization
        }

        async fn execute(&self, _ctx: JobContext) -> JobResult {
            JobResult::Failed("thread not found".into())
        }
    }

    struct CountingHandler {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        fn job_type(&self) -> JobType {
            JobType::Summarization
        }

        async fn execute(&self, _ctx: JobContext) -> JobResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            JobResult::Success(None)
        }
    }

    #[test]
    fn test_config_builders() {
        let config = WorkerConfig::default()
            .with_max_concurrent(0)
            .with_queue_capacity(0)
            .with_timeout_secs(5)
            .with_max_retries(1)
            .with_enabled(false);
        assert_eq!(config.max_concurrent_jobs, 1);
        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.job_timeout_secs, 5);
        assert_eq!(config.max_retries, 1);
        assert!(!config.enabled);
    }

    #[tokio::test]
    async fn test_job_completes_and_reports_progress() {
        let worker = JobWorker::new(WorkerConfig::default());
        worker
            .register_handler(NoOpHandler::new(JobType::Summarization))
            .await;
        let queue = worker.queue();
        let handle = worker.start();
        let mut events = handle.events();

        let job_id = queue
            .submit(JobType::Summarization, json!({"threadId": "t"}))
            .unwrap();

        let mut progress = Vec::new();
        loop {
            match events.recv().await.unwrap() {
                WorkerEvent::JobProgress { percent, .. } => progress.push(percent),
                WorkerEvent::JobCompleted { job_id: done, .. } => {
                    assert_eq!(done, job_id);
                    break;
                }
                WorkerEvent::JobFailed { error, .. } => panic!("unexpected failure: {error}"),
                _ => {}
            }
        }
        assert_eq!(progress, vec![50, 100]);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_job_emits_failure() {
        let worker = JobWorker::new(WorkerConfig::default());
        worker.register_handler(FailingHandler).await;
        let queue = worker.queue();
        let handle = worker.start();
        let mut events = handle.events();

        queue.submit(JobType::Summarization, json!({})).unwrap();
        match next_outcome(&mut events).await {
            WorkerEvent::JobFailed { error, .. } => assert_eq!(error, "thread not found"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_handler_fails_job() {
        let worker = JobWorker::new(WorkerConfig::default());
        let queue = worker.queue();
        let handle = worker.start();
        let mut events = handle.events();

        queue.submit(JobType::MemoryExtraction, json!({})).unwrap();
        match next_outcome(&mut events).await {
            WorkerEvent::JobFailed { error, job_type, .. } => {
                assert_eq!(job_type, JobType::MemoryExtraction);
                assert!(error.contains("No handler"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_timeout() {
        let worker = JobWorker::new(WorkerConfig::default().with_timeout_secs(1));
        worker
            .register_handler(SleepyHandler(Duration::from_secs(600)))
            .await;
        let queue = worker.queue();
        let handle = worker.start();
        let mut events = handle.events();

        queue.submit(JobType::Summarization, json!({})).unwrap();
        match next_outcome(&mut events).await {
            WorkerEvent::JobFailed { error, .. } => {
                assert_eq!(error, "Job exceeded timeout of 1s")
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let worker = JobWorker::new(WorkerConfig::default().with_max_retries(2));
        worker
            .register_handler(FlakyHandler {
                failures_before_success: 2,
                calls: calls.clone(),
            })
            .await;
        let queue = worker.queue();
        let handle = worker.start();
        let mut events = handle.events();

        queue.submit(JobType::MemoryExtraction, json!({})).unwrap();
        let mut retries = 0;
        loop {
            match events.recv().await.unwrap() {
                WorkerEvent::JobRetrying { .. } => retries += 1,
                WorkerEvent::JobCompleted { .. } => break,
                WorkerEvent::JobFailed { error, .. } => panic!("unexpected failure: {error}"),
                _ => {}
            }
        }
        assert_eq!(retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_fails() {
        let calls = Arc::new(AtomicU32::new(0));
        let worker = JobWorker::new(WorkerConfig::default().with_max_retries(1));
        worker
            .register_handler(FlakyHandler {
                failures_before_success: 10,
                calls: calls.clone(),
            })
            .await;
        let queue = worker.queue();
        let handle = worker.start();
        let mut events = handle.events();

        queue.submit(JobType::MemoryExtraction, json!({})).unwrap();
        match next_outcome(&mut events).await {
            WorkerEvent::JobFailed { error, .. } => assert_eq!(error, "transient 2"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let worker = JobWorker::new(WorkerConfig::default().with_max_concurrent(2));
        worker
            .register_handler(CountingHandler {
                in_flight: in_flight.clone(),
                peak: peak.clone(),
            })
            .await;
        let queue = worker.queue();
        let handle = worker.start();
        let mut events = handle.events();

        for _ in 0..6 {
            queue.submit(JobType::Summarization, json!({})).unwrap();
        }
        for _ in 0..6 {
            assert!(matches!(
                next_outcome(&mut events).await,
                WorkerEvent::JobCompleted { .. }
            ));
        }
        let peak = peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak concurrency was {peak}");
    }

    #[tokio::test]
    async fn test_full_queue_rejects_submission() {
        // Not started, so nothing drains the queue.
        let worker = JobWorker::new(WorkerConfig::default().with_queue_capacity(1));
        let queue = worker.queue();

        queue.submit(JobType::Summarization, json!({})).unwrap();
        let err = queue.submit(JobType::Summarization, json!({})).unwrap_err();
        assert!(matches!(err, Error::Job(_)));
        assert!(err.to_string().contains("full"));
    }

    #[tokio::test]
    async fn test_shutdown_emits_worker_stopped() {
        let worker = JobWorker::new(WorkerConfig::default());
        let handle = worker.start();
        let mut events = handle.events();

        handle.shutdown().await.unwrap();
        loop {
            if let WorkerEvent::WorkerStopped = events.recv().await.unwrap() {
                break;
            }
        }
    }
}
