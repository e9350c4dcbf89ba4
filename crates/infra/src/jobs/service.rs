//! Queue orchestration: submit, batch processing with retry, stats.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use marksync_core::JobId;

use super::store::{BackendKind, JobStore, JobStoreError};
use super::types::{Job, JobKind, JobPayload, NewJob, RetryDecision, RetryPolicy};
use crate::config::QueueConfig;

/// Performs the work for one job.
///
/// An `Err` counts as a failed attempt. Plain async closures taking a `Job`
/// implement this.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        (self)(job.clone()).await
    }
}

/// Queue service error.
///
/// Only `StoreUnavailable` is ever returned by a batch. Inside a batch the
/// other two are per-job log events; `HandlerFailure` is also returned by
/// callers that run a job synchronously.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    StoreUnavailable(#[from] JobStoreError),

    /// Job id is a string so synchronous runs can report their synthetic id.
    #[error("handler failed for job {job_id}: {reason}")]
    HandlerFailure { job_id: String, reason: String },

    #[error("job {job_id} exhausted after {attempts} attempts")]
    TerminalExhaustion { job_id: JobId, attempts: u32 },
}

impl QueueError {
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, QueueError::StoreUnavailable(_))
    }
}

/// Outcome of one processing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BatchReport {
    /// Jobs moved to in-flight by this pass.
    pub drained: usize,
    pub completed: usize,
    /// Failed but retried later.
    pub rescheduled: usize,
    /// Failed with attempts exhausted.
    pub discarded: usize,
    /// Ids of the discarded jobs.
    pub exhausted: Vec<JobId>,
}

/// Queue depth snapshot. Never an error: an unreachable store reports zeros
/// with `available = false`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub in_flight: usize,
    pub total: usize,
    pub backend: BackendKind,
    pub available: bool,
}

impl QueueStats {
    pub fn using_remote(&self) -> bool {
        self.backend == BackendKind::RemoteList
    }
}

enum Outcome {
    Completed,
    Rescheduled,
    Discarded(JobId),
}

/// Backend-agnostic queue orchestrator.
pub struct QueueService<S: JobStore> {
    store: S,
    retry_policy: RetryPolicy,
    handler_timeout: Option<Duration>,
}

impl<S: JobStore> QueueService<S> {
    /// Linear 60s backoff, no handler timeout.
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry_policy: RetryPolicy::default(),
            handler_timeout: None,
        }
    }

    /// Retry policy and handler timeout from `config`.
    pub fn from_config(store: S, config: &QueueConfig) -> Self {
        Self {
            store,
            retry_policy: config.retry_policy(),
            handler_timeout: config.handler_timeout,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_handler_timeout(mut self, limit: Duration) -> Self {
        self.handler_timeout = Some(limit);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Queue a job for deferred processing.
    ///
    /// `StoreUnavailable` is returned as-is; choosing a synchronous fallback is
    /// up to the caller.
    pub async fn submit(
        &self,
        kind: JobKind,
        payload: JobPayload,
        max_attempts: u32,
    ) -> Result<JobId, QueueError> {
        let job_id = self
            .store
            .enqueue(NewJob::new(kind.clone(), payload, max_attempts))
            .await?;

        debug!(job_id = %job_id, kind = %kind, max_attempts, "job submitted");
        Ok(job_id)
    }

    /// Process one batch; returns the number of jobs completed.
    pub async fn run_batch<H>(&self, handler: &H, concurrency: usize) -> Result<usize, QueueError>
    where
        H: JobHandler + ?Sized,
    {
        Ok(self.run_batch_report(handler, concurrency).await?.completed)
    }

    /// Drain up to `concurrency` jobs and run them in parallel.
    ///
    /// Handler failures are retried or discarded per job and never fail the
    /// batch. A store failure aborts it: jobs already drained stay in-flight.
    pub async fn run_batch_report<H>(
        &self,
        handler: &H,
        concurrency: usize,
    ) -> Result<BatchReport, QueueError>
    where
        H: JobHandler + ?Sized,
    {
        let jobs = self.store.drain(concurrency).await?;
        let mut report = BatchReport {
            drained: jobs.len(),
            ..BatchReport::default()
        };
        if jobs.is_empty() {
            return Ok(report);
        }

        let outcomes = join_all(jobs.into_iter().map(|job| self.process_one(handler, job))).await;

        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(Outcome::Completed) => report.completed += 1,
                Ok(Outcome::Rescheduled) => report.rescheduled += 1,
                Ok(Outcome::Discarded(job_id)) => {
                    report.discarded += 1;
                    report.exhausted.push(job_id);
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            error!(error = %e, backend = %self.store.backend(), "batch aborted: store unavailable");
            return Err(e.into());
        }

        info!(
            backend = %self.store.backend(),
            drained = report.drained,
            completed = report.completed,
            rescheduled = report.rescheduled,
            discarded = report.discarded,
            "batch processed"
        );
        Ok(report)
    }

    async fn process_one<H>(&self, handler: &H, mut job: Job) -> Result<Outcome, JobStoreError>
    where
        H: JobHandler + ?Sized,
    {
        let result = match self.handler_timeout {
            Some(limit) => tokio::time::timeout(limit, handler.handle(&job))
                .await
                .unwrap_or_else(|_| Err(anyhow::anyhow!("handler timed out after {:?}", limit))),
            None => handler.handle(&job).await,
        };

        let reason = match result {
            Ok(()) => {
                self.store.complete(&job).await?;
                debug!(job_id = %job.id, kind = %job.kind, "job completed");
                return Ok(Outcome::Completed);
            }
            Err(e) => format!("{:#}", e),
        };

        match job.record_failure(&self.retry_policy, Utc::now()) {
            RetryDecision::Retry { process_at } => {
                warn!(
                    job_id = %job.id,
                    kind = %job.kind,
                    attempts = job.attempts,
                    max_attempts = job.max_attempts,
                    process_at = %process_at,
                    reason = %reason,
                    "job failed, rescheduling"
                );
                self.store.reschedule(&job, process_at).await?;
                Ok(Outcome::Rescheduled)
            }
            RetryDecision::Exhausted => {
                self.store.discard(&job).await?;
                let exhausted = QueueError::TerminalExhaustion {
                    job_id: job.id,
                    attempts: job.attempts,
                };
                error!(
                    job_id = %job.id,
                    kind = %job.kind,
                    attempts = job.attempts,
                    reason = %reason,
                    error = %exhausted,
                    "job discarded"
                );
                Ok(Outcome::Discarded(job.id))
            }
        }
    }

    /// Queue depth; zeros with `available = false` if the store is unreachable.
    pub async fn stats(&self) -> QueueStats {
        let backend = self.store.backend();
        let counts = async {
            let pending = self.store.pending_count().await?;
            let in_flight = self.store.in_flight_count().await?;
            Ok::<_, JobStoreError>((pending, in_flight))
        };

        match counts.await {
            Ok((pending, in_flight)) => QueueStats {
                pending,
                in_flight,
                total: pending + in_flight,
                backend,
                available: true,
            },
            Err(e) => {
                warn!(error = %e, backend = %backend, "queue stats unavailable");
                QueueStats {
                    pending: 0,
                    in_flight: 0,
                    total: 0,
                    backend,
                    available: false,
                }
            }
        }
    }

    /// Empty both collections.
    pub async fn clear(&self) -> Result<(), QueueError> {
        self.store.clear().await?;
        info!(backend = %self.store.backend(), "queue cleared");
        Ok(())
    }
}
