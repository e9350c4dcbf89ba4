//! Job store contract shared by every storage backend.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use marksync_core::JobId;

use super::types::{Job, NewJob};

/// Durable two-collection job queue.
///
/// Every job lives in exactly one of two collections: **pending** (waiting to
/// be drained) or **in-flight** (claimed by a processing pass). All state
/// transitions go through these operations.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Which backend this is (reported by queue stats).
    fn backend(&self) -> BackendKind;

    /// Create a job (fresh id, `attempts = 0`, `process_at = created_at = now`)
    /// and append it to pending.
    async fn enqueue(&self, new_job: NewJob) -> Result<JobId, JobStoreError>;

    /// Move up to `max` jobs from the front of pending to in-flight in one step
    /// and return them. An empty pending collection yields an empty vec.
    async fn drain(&self, max: usize) -> Result<Vec<Job>, JobStoreError>;

    /// Remove the in-flight job with `job.id`. Missing jobs are a no-op.
    async fn complete(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Move the in-flight job back to pending, carrying `job.attempts` and the
    /// given `process_at`. Missing jobs are a no-op.
    async fn reschedule(&self, job: &Job, process_at: DateTime<Utc>) -> Result<(), JobStoreError>;

    /// Drop the in-flight job permanently. Missing jobs are a no-op.
    async fn discard(&self, job: &Job) -> Result<(), JobStoreError>;

    async fn pending_count(&self) -> Result<usize, JobStoreError>;

    async fn in_flight_count(&self) -> Result<usize, JobStoreError>;

    /// Empty both collections.
    async fn clear(&self) -> Result<(), JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    /// Backend I/O failed: unreadable/unwritable file, corrupt document,
    /// unreachable or timed-out remote.
    #[error("job store unavailable: {0}")]
    Unavailable(String),
}

impl JobStoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// Storage backend identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Two JSON documents on the local filesystem.
    File,
    /// Two server-side lists in a shared key-value store.
    RemoteList,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::File => "file",
            BackendKind::RemoteList => "remote_list",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    fn backend(&self) -> BackendKind {
        (**self).backend()
    }

    async fn enqueue(&self, new_job: NewJob) -> Result<JobId, JobStoreError> {
        (**self).enqueue(new_job).await
    }

    async fn drain(&self, max: usize) -> Result<Vec<Job>, JobStoreError> {
        (**self).drain(max).await
    }

    async fn complete(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).complete(job).await
    }

    async fn reschedule(&self, job: &Job, process_at: DateTime<Utc>) -> Result<(), JobStoreError> {
        (**self).reschedule(job, process_at).await
    }

    async fn discard(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).discard(job).await
    }

    async fn pending_count(&self) -> Result<usize, JobStoreError> {
        (**self).pending_count().await
    }

    async fn in_flight_count(&self) -> Result<usize, JobStoreError> {
        (**self).in_flight_count().await
    }

    async fn clear(&self) -> Result<(), JobStoreError> {
        (**self).clear().await
    }
}
