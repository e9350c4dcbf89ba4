//! File-backed job store.
//!
//! Pending and in-flight are each one JSON array on disk:
//!
//! ```text
//! {queue_dir}/
//! ├── {queue_name}.json              # pending, front = next to drain
//! └── {queue_name}_processing.json   # in-flight
//! ```
//!
//! Every mutation is a read-modify-write of the whole document. Mutations are
//! serialized inside one process, but there is **no cross-process locking**:
//! run a single worker per queue directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use marksync_core::JobId;

use super::store::{BackendKind, JobStore, JobStoreError};
use super::types::{Job, NewJob};

pub struct FileJobStore {
    pending_path: PathBuf,
    in_flight_path: PathBuf,
    lock: Mutex<()>,
}

impl FileJobStore {
    /// Open (or create) the queue documents for `queue_name` under `queue_dir`.
    pub async fn open(
        queue_dir: impl Into<PathBuf>,
        queue_name: &str,
    ) -> Result<Self, JobStoreError> {
        let queue_dir = queue_dir.into();

        fs::create_dir_all(&queue_dir).await.map_err(|e| {
            JobStoreError::unavailable(format!(
                "failed to create queue directory {}: {}",
                queue_dir.display(),
                e
            ))
        })?;

        debug!(queue = queue_name, dir = %queue_dir.display(), "file job store opened");

        Ok(Self {
            pending_path: queue_dir.join(format!("{}.json", queue_name)),
            in_flight_path: queue_dir.join(format!("{}_processing.json", queue_name)),
            lock: Mutex::new(()),
        })
    }

    pub fn pending_path(&self) -> &Path {
        &self.pending_path
    }

    pub fn in_flight_path(&self) -> &Path {
        &self.in_flight_path
    }

    async fn read(path: &Path) -> Result<Vec<Job>, JobStoreError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(JobStoreError::unavailable(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            JobStoreError::unavailable(format!("corrupt queue document {}: {}", path.display(), e))
        })
    }

    /// Replace the document via a sibling temp file, so readers never see a
    /// half-written array.
    async fn write(path: &Path, jobs: &[Job]) -> Result<(), JobStoreError> {
        let content = serde_json::to_string_pretty(jobs)
            .map_err(|e| JobStoreError::unavailable(format!("failed to encode jobs: {}", e)))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).await.map_err(|e| {
            JobStoreError::unavailable(format!("failed to write {}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, path).await.map_err(|e| {
            JobStoreError::unavailable(format!("failed to replace {}: {}", path.display(), e))
        })
    }

    fn take(jobs: &mut Vec<Job>, id: JobId) -> Option<Job> {
        let index = jobs.iter().position(|j| j.id == id)?;
        Some(jobs.remove(index))
    }

    /// Remove `job` from in-flight; returns whether it was there.
    async fn remove_in_flight(&self, job: &Job) -> Result<bool, JobStoreError> {
        let _guard = self.lock.lock().await;

        let mut in_flight = Self::read(&self.in_flight_path).await?;
        if Self::take(&mut in_flight, job.id).is_none() {
            return Ok(false);
        }
        Self::write(&self.in_flight_path, &in_flight).await?;
        Ok(true)
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    fn backend(&self) -> BackendKind {
        BackendKind::File
    }

    async fn enqueue(&self, new_job: NewJob) -> Result<JobId, JobStoreError> {
        let job = Job::create(new_job, Utc::now());
        let id = job.id;

        let _guard = self.lock.lock().await;
        let mut pending = Self::read(&self.pending_path).await?;
        pending.push(job);
        Self::write(&self.pending_path, &pending).await?;

        debug!(job_id = %id, "job enqueued");
        Ok(id)
    }

    async fn drain(&self, max: usize) -> Result<Vec<Job>, JobStoreError> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let _guard = self.lock.lock().await;
        let mut pending = Self::read(&self.pending_path).await?;
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let take = max.min(pending.len());
        let drained: Vec<Job> = pending.drain(..take).collect();

        let mut in_flight = Self::read(&self.in_flight_path).await?;
        in_flight.extend(drained.iter().cloned());

        // In-flight first: a crash in between duplicates work instead of losing it.
        Self::write(&self.in_flight_path, &in_flight).await?;
        Self::write(&self.pending_path, &pending).await?;

        Ok(drained)
    }

    async fn complete(&self, job: &Job) -> Result<(), JobStoreError> {
        if !self.remove_in_flight(job).await? {
            debug!(job_id = %job.id, "complete: job not in flight");
        }
        Ok(())
    }

    async fn reschedule(&self, job: &Job, process_at: DateTime<Utc>) -> Result<(), JobStoreError> {
        let _guard = self.lock.lock().await;

        let mut in_flight = Self::read(&self.in_flight_path).await?;
        if Self::take(&mut in_flight, job.id).is_none() {
            debug!(job_id = %job.id, "reschedule: job not in flight");
            return Ok(());
        }

        let mut retry = job.clone();
        retry.process_at = process_at;

        let mut pending = Self::read(&self.pending_path).await?;
        pending.push(retry);

        Self::write(&self.pending_path, &pending).await?;
        Self::write(&self.in_flight_path, &in_flight).await
    }

    async fn discard(&self, job: &Job) -> Result<(), JobStoreError> {
        if !self.remove_in_flight(job).await? {
            debug!(job_id = %job.id, "discard: job not in flight");
        }
        Ok(())
    }

    async fn pending_count(&self) -> Result<usize, JobStoreError> {
        Ok(Self::read(&self.pending_path).await?.len())
    }

    async fn in_flight_count(&self) -> Result<usize, JobStoreError> {
        Ok(Self::read(&self.in_flight_path).await?.len())
    }

    async fn clear(&self) -> Result<(), JobStoreError> {
        let _guard = self.lock.lock().await;
        Self::write(&self.pending_path, &[]).await?;
        Self::write(&self.in_flight_path, &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::{JobKind, JobPayload};
    use marksync_core::BookmarkId;
    use tempfile::TempDir;

    fn bookmark_job(id: &str) -> NewJob {
        NewJob::analyze_bookmark(&BookmarkId::new(id).unwrap(), 3)
    }

    async fn open(dir: &TempDir) -> FileJobStore {
        FileJobStore::open(dir.path(), "bookmark_analysis").await.unwrap()
    }

    #[tokio::test]
    async fn open_creates_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join(".queue");

        let store = FileJobStore::open(&nested, "q").await.unwrap();

        assert!(nested.is_dir());
        assert_eq!(store.pending_path(), nested.join("q.json"));
        assert_eq!(store.in_flight_path(), nested.join("q_processing.json"));
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn enqueue_persists_jobs_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;

        let first = store.enqueue(bookmark_job("a")).await.unwrap();
        let second = store.enqueue(bookmark_job("b")).await.unwrap();
        assert_ne!(first, second);

        // A second handle sees the same state: it is on disk.
        let reopened = open(&temp_dir).await;
        assert_eq!(reopened.pending_count().await.unwrap(), 2);

        let drained = reopened.drain(10).await.unwrap();
        let ids: Vec<_> = drained.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[tokio::test]
    async fn drain_moves_jobs_to_in_flight() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;
        for id in ["a", "b", "c"] {
            store.enqueue(bookmark_job(id)).await.unwrap();
        }

        let drained = store.drain(2).await.unwrap();

        assert_eq!(drained.len(), 2);
        assert_eq!(store.pending_count().await.unwrap(), 1);
        assert_eq!(store.in_flight_count().await.unwrap(), 2);
        assert!(drained.iter().all(|j| j.attempts == 0));
    }

    #[tokio::test]
    async fn drain_zero_or_empty_is_not_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;

        assert!(store.drain(5).await.unwrap().is_empty());

        store.enqueue(bookmark_job("a")).await.unwrap();
        assert!(store.drain(0).await.unwrap().is_empty());
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn complete_removes_only_the_matching_job() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;
        store.enqueue(bookmark_job("a")).await.unwrap();
        store.enqueue(bookmark_job("b")).await.unwrap();

        let drained = store.drain(2).await.unwrap();
        store.complete(&drained[0]).await.unwrap();

        assert_eq!(store.in_flight_count().await.unwrap(), 1);
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reschedule_appends_to_pending_with_new_state() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;
        store.enqueue(bookmark_job("a")).await.unwrap();
        store.enqueue(bookmark_job("b")).await.unwrap();

        let mut job = store.drain(1).await.unwrap().remove(0);
        job.attempts = 1;
        let later = job.process_at + chrono::Duration::seconds(60);
        store.reschedule(&job, later).await.unwrap();

        assert_eq!(store.in_flight_count().await.unwrap(), 0);
        let pending = store.drain(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        // Retried job goes to the back of the line.
        assert_eq!(pending[1].id, job.id);
        assert_eq!(pending[1].attempts, 1);
        assert_eq!(pending[1].process_at, later);
    }

    #[tokio::test]
    async fn missing_jobs_are_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;
        store.enqueue(bookmark_job("a")).await.unwrap();
        let in_flight = store.drain(1).await.unwrap().remove(0);

        let stranger = Job::create(
            NewJob::new(JobKind::custom("other"), JobPayload::new(), 1),
            Utc::now(),
        );
        store.complete(&stranger).await.unwrap();
        store.discard(&stranger).await.unwrap();
        store.reschedule(&stranger, Utc::now()).await.unwrap();

        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert_eq!(store.in_flight_count().await.unwrap(), 1);

        store.discard(&in_flight).await.unwrap();
        store.discard(&in_flight).await.unwrap();
        assert_eq!(store.in_flight_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_empties_both_documents() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;
        for id in ["a", "b", "c"] {
            store.enqueue(bookmark_job(id)).await.unwrap();
        }
        store.drain(1).await.unwrap();

        store.clear().await.unwrap();

        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert_eq!(store.in_flight_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn corrupt_document_is_reported_as_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;
        std::fs::write(store.pending_path(), "{not json").unwrap();

        let err = store.pending_count().await.unwrap_err();
        assert!(matches!(err, JobStoreError::Unavailable(_)));

        let err = store.enqueue(bookmark_job("a")).await.unwrap_err();
        assert!(matches!(err, JobStoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn documents_use_the_persisted_job_layout() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;
        store.enqueue(bookmark_job("bm-42")).await.unwrap();

        let raw = std::fs::read_to_string(store.pending_path()).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(doc[0]["type"], "analyze_bookmark");
        assert_eq!(doc[0]["data"]["bookmarkId"], "bm-42");
        assert_eq!(doc[0]["attempts"], 0);
        assert_eq!(doc[0]["maxAttempts"], 3);
    }
}
