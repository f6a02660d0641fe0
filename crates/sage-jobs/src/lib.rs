//! # sage-jobs
//!
//! In-process background job queue for the sage answer engine.
//!
//! This crate provides:
//! - Fire-and-forget job submission through a cloneable [`JobQueue`]
//! - A worker that runs jobs concurrently with a per-job timeout
//! - Retry for handlers that ask for it
//! - Lifecycle notifications via a broadcast channel ([`WorkerEvent`])
//!
//! ## Example
//!
//! ```ignore
//! use sage_jobs::{JobType, JobWorker, NoOpHandler, WorkerConfig};
//!
//! let worker = JobWorker::new(WorkerConfig::from_env());
//! worker.register_handler(NoOpHandler::new(JobType::Summarization)).await;
//!
//! let queue = worker.queue();
//! let handle = worker.start();
//!
//! let mut events = handle.events();
//! queue.submit(JobType::Summarization, serde_json::json!({"threadId": id}))?;
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await?;
//! ```

pub mod handler;
pub mod worker;

pub use handler::{Job, JobContext, JobHandler, JobResult, JobType, NoOpHandler};
pub use worker::{JobQueue, JobWorker, WorkerConfig, WorkerEvent, WorkerHandle};
