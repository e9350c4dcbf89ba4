//! Process-wide backend selection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use marksync_core::JobId;

use super::file_store::FileJobStore;
#[cfg(feature = "redis")]
use super::list_store::RemoteListStore;
#[cfg(feature = "redis")]
use super::redis_client::RedisListClient;
use super::store::{BackendKind, JobStore, JobStoreError};
use super::types::{Job, NewJob};
use crate::config::QueueConfig;

/// The store chosen at startup.
pub enum QueueBackend {
    File(FileJobStore),
    #[cfg(feature = "redis")]
    Remote(RemoteListStore<RedisListClient>),
}

macro_rules! dispatch {
    ($self:ident, $store:ident => $body:expr) => {
        match $self {
            QueueBackend::File($store) => $body,
            #[cfg(feature = "redis")]
            QueueBackend::Remote($store) => $body,
        }
    };
}

#[async_trait]
impl JobStore for QueueBackend {
    fn backend(&self) -> BackendKind {
        dispatch!(self, store => store.backend())
    }

    async fn enqueue(&self, new_job: NewJob) -> Result<JobId, JobStoreError> {
        dispatch!(self, store => store.enqueue(new_job).await)
    }

    async fn drain(&self, max: usize) -> Result<Vec<Job>, JobStoreError> {
        dispatch!(self, store => store.drain(max).await)
    }

    async fn complete(&self, job: &Job) -> Result<(), JobStoreError> {
        dispatch!(self, store => store.complete(job).await)
    }

    async fn reschedule(&self, job: &Job, process_at: DateTime<Utc>) -> Result<(), JobStoreError> {
        dispatch!(self, store => store.reschedule(job, process_at).await)
    }

    async fn discard(&self, job: &Job) -> Result<(), JobStoreError> {
        dispatch!(self, store => store.discard(job).await)
    }

    async fn pending_count(&self) -> Result<usize, JobStoreError> {
        dispatch!(self, store => store.pending_count().await)
    }

    async fn in_flight_count(&self) -> Result<usize, JobStoreError> {
        dispatch!(self, store => store.in_flight_count().await)
    }

    async fn clear(&self) -> Result<(), JobStoreError> {
        dispatch!(self, store => store.clear().await)
    }
}

/// Pick the store for this process.
///
/// Remote when URL and token are configured and the URL parses; otherwise the
/// file store under `config.queue_dir`. Call once at startup and share the
/// result.
pub async fn select_backend(config: &QueueConfig) -> Result<QueueBackend, JobStoreError> {
    if let Some(remote) = &config.remote {
        #[cfg(feature = "redis")]
        {
            match RedisListClient::new(&remote.url, Some(&remote.token), config.remote_timeout) {
                Ok(client) => {
                    info!(queue = %config.queue_name, backend = "remote_list", "queue backend selected");
                    return Ok(QueueBackend::Remote(RemoteListStore::new(
                        client,
                        &config.queue_name,
                    )));
                }
                Err(e) => {
                    warn!(error = %e, "invalid remote queue configuration, falling back to file store");
                }
            }
        }
        #[cfg(not(feature = "redis"))]
        {
            let _ = remote;
            warn!("remote queue configured but redis feature not enabled, falling back to file store");
        }
    }

    let store = FileJobStore::open(&config.queue_dir, &config.queue_name).await?;
    info!(
        queue = %config.queue_name,
        dir = %config.queue_dir.display(),
        backend = "file",
        "queue backend selected"
    );
    Ok(QueueBackend::File(store))
}
