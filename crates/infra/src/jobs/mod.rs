//! Background job queue with retry and backoff.
//!
//! ## Design
//!
//! - Every job is either pending or in-flight, never both
//! - Draining moves jobs to in-flight in one store step, so no job lands in
//!   two batches
//! - Failed jobs are rescheduled with linear backoff until `max_attempts`,
//!   then discarded
//! - `process_at` is recorded but advisory: drains do not filter on it
//!
//! ## Components
//!
//! - `JobStore`: two-collection persistence contract
//! - `FileJobStore`: JSON documents on local disk (single worker process)
//! - `RemoteListStore`: server-side lists (multiple workers); Redis client
//!   behind the `redis` feature
//! - `QueueService`: submit, batch processing, stats
//! - `BatchWorker`: runs batches on an interval
//! - `AnalysisQueue`: `analyze_bookmark` jobs with an immediate fallback
//! - `select_backend`: picks the store once per process

pub mod analysis;
pub mod file_store;
pub mod list_store;
#[cfg(feature = "redis")]
pub mod redis_client;
pub mod selector;
pub mod service;
pub mod store;
pub mod types;
pub mod worker;

pub use analysis::{ANALYSIS_MAX_ATTEMPTS, AnalysisHandler, AnalysisQueue, BookmarkAnalyzer};
pub use file_store::FileJobStore;
pub use list_store::{InMemoryListClient, ListClient, RemoteListStore};
#[cfg(feature = "redis")]
pub use redis_client::RedisListClient;
pub use selector::{QueueBackend, select_backend};
pub use service::{BatchReport, JobHandler, QueueError, QueueService, QueueStats};
pub use store::{BackendKind, JobStore, JobStoreError};
pub use types::{
    BOOKMARK_ID_FIELD, BackoffStrategy, Job, JobKind, JobPayload, NewJob, RetryDecision,
    RetryPolicy, Submission,
};
pub use worker::{BatchWorker, BatchWorkerConfig, WorkerHandle, WorkerStats};
