//! Remote-list job store.
//!
//! Pending and in-flight are two server-side lists:
//!
//! - **Pending**: `queue:{name}`. Producers LPUSH, drains take from the right,
//!   so the oldest job goes first.
//! - **In-flight**: `processing:{name}`. Filled by RPOPLPUSH, which moves a
//!   job between the lists in one server-side step.
//!
//! Any number of workers may drain the same queue. Finishing a job (complete,
//! reschedule, discard) takes two commands, so a crash can duplicate a job
//! (at-least-once), but never drains it twice concurrently.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use marksync_core::JobId;

use super::store::{BackendKind, JobStore, JobStoreError};
use super::types::{Job, NewJob};

/// The list primitives the store needs from a shared key-value service.
///
/// Index 0 is the left (head) end, as in Redis.
#[async_trait]
pub trait ListClient: Send + Sync {
    /// Push `value` onto the left end.
    async fn lpush(&self, key: &str, value: String) -> Result<(), JobStoreError>;

    /// Atomically pop the right end of `source` and push it onto the left end of
    /// `destination`.
    async fn rpoplpush(
        &self,
        source: &str,
        destination: &str,
    ) -> Result<Option<String>, JobStoreError>;

    /// The whole list, left to right.
    async fn lrange_all(&self, key: &str) -> Result<Vec<String>, JobStoreError>;

    /// Remove the first occurrence of `value`; returns whether one was removed.
    async fn lrem_one(&self, key: &str, value: &str) -> Result<bool, JobStoreError>;

    async fn llen(&self, key: &str) -> Result<usize, JobStoreError>;

    async fn del(&self, keys: &[&str]) -> Result<(), JobStoreError>;
}

/// In-process list client for tests/dev.
///
/// Can be switched offline to exercise unavailability paths.
#[derive(Debug, Default)]
pub struct InMemoryListClient {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    offline: AtomicBool,
}

impl InMemoryListClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline, every command fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn with_lists<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, VecDeque<String>>) -> T,
    ) -> Result<T, JobStoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(JobStoreError::unavailable("list service offline"));
        }
        let mut lists = self
            .lists
            .lock()
            .map_err(|_| JobStoreError::unavailable("list state poisoned"))?;
        Ok(f(&mut lists))
    }
}

#[async_trait]
impl ListClient for InMemoryListClient {
    async fn lpush(&self, key: &str, value: String) -> Result<(), JobStoreError> {
        self.with_lists(|lists| lists.entry(key.to_string()).or_default().push_front(value))
    }

    async fn rpoplpush(
        &self,
        source: &str,
        destination: &str,
    ) -> Result<Option<String>, JobStoreError> {
        self.with_lists(|lists| {
            let value = lists.get_mut(source)?.pop_back()?;
            lists
                .entry(destination.to_string())
                .or_default()
                .push_front(value.clone());
            Some(value)
        })
    }

    async fn lrange_all(&self, key: &str) -> Result<Vec<String>, JobStoreError> {
        self.with_lists(|lists| {
            lists
                .get(key)
                .map(|list| list.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    async fn lrem_one(&self, key: &str, value: &str) -> Result<bool, JobStoreError> {
        self.with_lists(|lists| {
            let Some(list) = lists.get_mut(key) else {
                return false;
            };
            match list.iter().position(|v| v == value) {
                Some(index) => list.remove(index).is_some(),
                None => false,
            }
        })
    }

    async fn llen(&self, key: &str) -> Result<usize, JobStoreError> {
        self.with_lists(|lists| lists.get(key).map_or(0, VecDeque::len))
    }

    async fn del(&self, keys: &[&str]) -> Result<(), JobStoreError> {
        self.with_lists(|lists| {
            for key in keys {
                lists.remove(*key);
            }
        })
    }
}

/// Job store over two lists of a [`ListClient`].
pub struct RemoteListStore<C> {
    client: C,
    pending_key: String,
    in_flight_key: String,
}

impl<C: ListClient> RemoteListStore<C> {
    pub fn new(client: C, queue_name: &str) -> Self {
        Self {
            client,
            pending_key: format!("queue:{}", queue_name),
            in_flight_key: format!("processing:{}", queue_name),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn pending_key(&self) -> &str {
        &self.pending_key
    }

    pub fn in_flight_key(&self) -> &str {
        &self.in_flight_key
    }

    fn encode(job: &Job) -> Result<String, JobStoreError> {
        serde_json::to_string(job)
            .map_err(|e| JobStoreError::unavailable(format!("failed to encode job {}: {}", job.id, e)))
    }

    /// The raw in-flight entry for `id`, as stored (needed for LREM).
    async fn find_in_flight(&self, id: JobId) -> Result<Option<String>, JobStoreError> {
        let needle = id.to_string();
        let entries = self.client.lrange_all(&self.in_flight_key).await?;

        Ok(entries.into_iter().find(|raw| {
            raw.contains(&needle)
                && serde_json::from_str::<Job>(raw).is_ok_and(|job| job.id == id)
        }))
    }

    async fn remove_in_flight(&self, job: &Job, op: &str) -> Result<(), JobStoreError> {
        match self.find_in_flight(job.id).await? {
            Some(raw) => {
                self.client.lrem_one(&self.in_flight_key, &raw).await?;
            }
            None => debug!(job_id = %job.id, op, "job not in flight"),
        }
        Ok(())
    }
}

#[async_trait]
impl<C: ListClient> JobStore for RemoteListStore<C> {
    fn backend(&self) -> BackendKind {
        BackendKind::RemoteList
    }

    async fn enqueue(&self, new_job: NewJob) -> Result<JobId, JobStoreError> {
        let job = Job::create(new_job, Utc::now());
        self.client
            .lpush(&self.pending_key, Self::encode(&job)?)
            .await?;

        debug!(job_id = %job.id, key = %self.pending_key, "job enqueued");
        Ok(job.id)
    }

    async fn drain(&self, max: usize) -> Result<Vec<Job>, JobStoreError> {
        let mut jobs = Vec::with_capacity(max);

        while jobs.len() < max {
            let Some(raw) = self
                .client
                .rpoplpush(&self.pending_key, &self.in_flight_key)
                .await?
            else {
                break;
            };

            match serde_json::from_str::<Job>(&raw) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    // Unparseable entries can never complete; drop them.
                    warn!(key = %self.in_flight_key, error = %e, "dropping malformed queue entry");
                    self.client.lrem_one(&self.in_flight_key, &raw).await?;
                }
            }
        }

        Ok(jobs)
    }

    async fn complete(&self, job: &Job) -> Result<(), JobStoreError> {
        self.remove_in_flight(job, "complete").await
    }

    async fn reschedule(&self, job: &Job, process_at: DateTime<Utc>) -> Result<(), JobStoreError> {
        let Some(raw) = self.find_in_flight(job.id).await? else {
            debug!(job_id = %job.id, op = "reschedule", "job not in flight");
            return Ok(());
        };

        let mut retry = job.clone();
        retry.process_at = process_at;

        // Push before removing: a crash in between duplicates instead of losing.
        self.client
            .lpush(&self.pending_key, Self::encode(&retry)?)
            .await?;
        self.client.lrem_one(&self.in_flight_key, &raw).await?;
        Ok(())
    }

    async fn discard(&self, job: &Job) -> Result<(), JobStoreError> {
        self.remove_in_flight(job, "discard").await
    }

    async fn pending_count(&self) -> Result<usize, JobStoreError> {
        self.client.llen(&self.pending_key).await
    }

    async fn in_flight_count(&self) -> Result<usize, JobStoreError> {
        self.client.llen(&self.in_flight_key).await
    }

    async fn clear(&self) -> Result<(), JobStoreError> {
        self.client
            .del(&[self.pending_key.as_str(), self.in_flight_key.as_str()])
            .await
    }
}
