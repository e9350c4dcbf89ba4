//! Scheduled batch worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use super::service::{JobHandler, QueueService};
use super::store::JobStore;
use crate::config::QueueConfig;

/// Shortest accepted period between batches.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Batch worker configuration.
#[derive(Debug, Clone)]
pub struct BatchWorkerConfig {
    /// Name for logging
    pub name: String,
    /// Time between batches
    pub poll_interval: Duration,
    /// Max jobs per batch
    pub concurrency: usize,
}

impl Default for BatchWorkerConfig {
    fn default() -> Self {
        Self {
            name: "batch-worker".to_string(),
            poll_interval: Duration::from_secs(60),
            concurrency: 5,
        }
    }
}

impl BatchWorkerConfig {
    /// Interval and batch size from `QUEUE_POLL_INTERVAL_SECS` and
    /// `QUEUE_CONCURRENCY`, named after the queue.
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            name: format!("{}-worker", config.queue_name),
            poll_interval: config.poll_interval,
            concurrency: config.concurrency,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub batches_run: u64,
    pub jobs_completed: u64,
    pub jobs_rescheduled: u64,
    pub jobs_discarded: u64,
    /// Batches aborted because the store was unavailable.
    pub store_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    batches_run: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_rescheduled: AtomicU64,
    jobs_discarded: AtomicU64,
    store_errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            batches_run: self.batches_run.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_rescheduled: self.jobs_rescheduled.load(Ordering::Relaxed),
            jobs_discarded: self.jobs_discarded.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl WorkerHandle {
    /// Stop after the batch in progress (if any) and wait for the task to end.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "batch worker task failed");
            }
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }
}

/// Runs `run_batch` on a fixed interval; the first batch starts immediately.
pub struct BatchWorker;

impl BatchWorker {
    pub fn spawn<S, H>(
        service: Arc<QueueService<S>>,
        handler: Arc<H>,
        config: BatchWorkerConfig,
    ) -> WorkerHandle
    where
        S: JobStore + 'static,
        H: JobHandler + ?Sized + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let counters = Arc::new(Counters::default());
        let task_counters = counters.clone();

        let join = tokio::spawn(async move {
            info!(worker = %config.name, interval = ?config.poll_interval, "batch worker started");

            let period = if config.poll_interval < MIN_POLL_INTERVAL {
                warn!(worker = %config.name, interval = ?config.poll_interval, "poll interval too short, using minimum");
                MIN_POLL_INTERVAL
            } else {
                config.poll_interval
            };
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {}
                }

                match service
                    .run_batch_report(handler.as_ref(), config.concurrency)
                    .await
                {
                    Ok(report) => {
                        task_counters
                            .jobs_completed
                            .fetch_add(report.completed as u64, Ordering::Relaxed);
                        task_counters
                            .jobs_rescheduled
                            .fetch_add(report.rescheduled as u64, Ordering::Relaxed);
                        task_counters
                            .jobs_discarded
                            .fetch_add(report.discarded as u64, Ordering::Relaxed);
                        debug!(worker = %config.name, drained = report.drained, "tick");
                    }
                    Err(e) => {
                        task_counters.store_errors.fetch_add(1, Ordering::Relaxed);
                        error!(worker = %config.name, error = %e, "batch failed");
                    }
                }
                task_counters.batches_run.fetch_add(1, Ordering::Relaxed);
            }

            info!(worker = %config.name, "batch worker stopped");
        });

        WorkerHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
            counters,
        }
    }
}
