//! Bookmark analysis queue.
//!
//! The one concrete job kind (`analyze_bookmark`) wired to an external
//! analyzer. Favors availability: when the store is down, submissions run the
//! analysis synchronously and processing/stats degrade instead of failing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use marksync_core::BookmarkId;

use super::service::{BatchReport, JobHandler, QueueError, QueueService, QueueStats};
use super::store::JobStore;
use super::types::{Job, JobKind, NewJob, Submission};

/// Attempts allowed per bookmark analysis.
pub const ANALYSIS_MAX_ATTEMPTS: u32 = 3;

/// Runs the analysis for one bookmark (lookup, model call, persistence).
#[async_trait]
pub trait BookmarkAnalyzer: Send + Sync {
    async fn analyze(&self, bookmark_id: &BookmarkId) -> anyhow::Result<()>;
}

/// Job handler dispatching `analyze_bookmark` jobs to an analyzer.
///
/// Any other kind, or a job without a valid `bookmarkId`, fails.
pub struct AnalysisHandler<A: ?Sized>(pub Arc<A>);

#[async_trait]
impl<A: BookmarkAnalyzer + ?Sized> JobHandler for AnalysisHandler<A> {
    async fn handle(&self, job: &Job) -> anyhow::Result<()> {
        match &job.kind {
            JobKind::AnalyzeBookmark => {
                let bookmark_id = job
                    .bookmark_id()
                    .ok_or_else(|| anyhow::anyhow!("job {} has no bookmarkId", job.id))?;
                self.0.analyze(&bookmark_id).await
            }
            other => anyhow::bail!("unknown job kind: {}", other),
        }
    }
}

/// Producer/consumer facade for bookmark analysis.
pub struct AnalysisQueue<S: JobStore, A: ?Sized> {
    service: Arc<QueueService<S>>,
    handler: AnalysisHandler<A>,
}

impl<S: JobStore, A: BookmarkAnalyzer + ?Sized> AnalysisQueue<S, A> {
    pub fn new(service: Arc<QueueService<S>>, analyzer: Arc<A>) -> Self {
        Self {
            service,
            handler: AnalysisHandler(analyzer),
        }
    }

    pub fn service(&self) -> &Arc<QueueService<S>> {
        &self.service
    }

    /// The handler, for use with a [`BatchWorker`](super::worker::BatchWorker).
    pub fn handler(&self) -> AnalysisHandler<A> {
        AnalysisHandler(self.handler.0.clone())
    }

    /// Queue an analysis; if the queue is unavailable, analyze right away.
    ///
    /// Only a failure of that synchronous analysis is returned as an error.
    pub async fn queue_bookmark_analysis(
        &self,
        bookmark_id: &BookmarkId,
    ) -> Result<Submission, QueueError> {
        let new_job = NewJob::analyze_bookmark(bookmark_id, ANALYSIS_MAX_ATTEMPTS);

        match self
            .service
            .submit(new_job.kind, new_job.payload, new_job.max_attempts)
            .await
        {
            Ok(job_id) => Ok(Submission::Queued(job_id)),
            Err(QueueError::StoreUnavailable(e)) => {
                warn!(bookmark_id = %bookmark_id, error = %e, "queue unavailable, analyzing immediately");
                let submission = Submission::Immediate(bookmark_id.clone());
                self.handler
                    .0
                    .analyze(bookmark_id)
                    .await
                    .map_err(|e| QueueError::HandlerFailure {
                        job_id: submission.to_string(),
                        reason: format!("{:#}", e),
                    })?;
                Ok(submission)
            }
            Err(e) => Err(e),
        }
    }

    /// Run one batch; returns the number of analyses completed, `0` if the
    /// queue is unavailable.
    pub async fn process_analysis_jobs(&self, concurrency: usize) -> usize {
        self.process_analysis_report(concurrency).await.completed
    }

    /// Like [`process_analysis_jobs`](Self::process_analysis_jobs) with the
    /// full batch report.
    pub async fn process_analysis_report(&self, concurrency: usize) -> BatchReport {
        match self.service.run_batch_report(&self.handler, concurrency).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "analysis batch skipped");
                BatchReport::default()
            }
        }
    }

    pub async fn stats(&self) -> QueueStats {
        self.service.stats().await
    }

    /// Flush the queue. Failures are logged only.
    pub async fn clear(&self) {
        match self.service.clear().await {
            Ok(()) => info!("analysis queue cleared"),
            Err(e) => warn!(error = %e, "failed to clear analysis queue"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::list_store::{InMemoryListClient, RemoteListStore};
    use crate::jobs::types::JobPayload;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records analyzed ids; fails for ids listed in `failing`.
    #[derive(Default)]
    struct RecordingAnalyzer {
        seen: Mutex<Vec<String>>,
        failing: HashSet<String>,
    }

    impl RecordingAnalyzer {
        fn failing(ids: &[&str]) -> Self {
            Self {
                failing: ids.iter().map(|s| s.to_string()).collect(),
                ..Self::default()
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BookmarkAnalyzer for RecordingAnalyzer {
        async fn analyze(&self, bookmark_id: &BookmarkId) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(bookmark_id.to_string());
            if self.failing.contains(bookmark_id.as_str()) {
                anyhow::bail!("model refused {}", bookmark_id);
            }
            Ok(())
        }
    }

    type Queue = AnalysisQueue<RemoteListStore<InMemoryListClient>, RecordingAnalyzer>;

    fn queue(analyzer: RecordingAnalyzer) -> (Queue, Arc<RecordingAnalyzer>) {
        let analyzer = Arc::new(analyzer);
        let service = Arc::new(QueueService::new(RemoteListStore::new(
            InMemoryListClient::new(),
            "bookmark_analysis",
        )));
        (AnalysisQueue::new(service, analyzer.clone()), analyzer)
    }

    fn bookmark(id: &str) -> BookmarkId {
        BookmarkId::new(id).unwrap()
    }

    #[tokio::test]
    async fn queued_analysis_runs_on_processing() {
        let (queue, analyzer) = queue(RecordingAnalyzer::default());

        let submission = queue.queue_bookmark_analysis(&bookmark("bm-1")).await.unwrap();
        assert!(!submission.is_immediate());
        assert!(analyzer.seen().is_empty());
        assert_eq!(queue.stats().await.pending, 1);

        assert_eq!(queue.process_analysis_jobs(5).await, 1);
        assert_eq!(analyzer.seen(), vec!["bm-1".to_string()]);
        assert_eq!(queue.stats().await.total, 0);
    }

    #[tokio::test]
    async fn analysis_jobs_carry_three_attempts() {
        let (queue, _) = queue(RecordingAnalyzer::default());
        queue.queue_bookmark_analysis(&bookmark("bm-1")).await.unwrap();

        let job = queue.service().store().drain(1).await.unwrap().remove(0);
        assert_eq!(job.kind, JobKind::AnalyzeBookmark);
        assert_eq!(job.max_attempts, ANALYSIS_MAX_ATTEMPTS);
        assert_eq!(job.bookmark_id(), Some(bookmark("bm-1")));
    }

    #[tokio::test]
    async fn unavailable_queue_falls_back_to_immediate_analysis() {
        let (queue, analyzer) = queue(RecordingAnalyzer::default());
        queue.service().store().client().set_offline(true);

        let submission = queue.queue_bookmark_analysis(&bookmark("bm-7")).await.unwrap();

        assert_eq!(submission, Submission::Immediate(bookmark("bm-7")));
        assert_eq!(submission.to_string(), "immediate_bm-7");
        assert_eq!(analyzer.seen(), vec!["bm-7".to_string()]);
    }

    #[tokio::test]
    async fn failed_immediate_analysis_is_a_handler_failure() {
        let (queue, _) = queue(RecordingAnalyzer::failing(&["bm-7"]));
        queue.service().store().client().set_offline(true);

        let err = queue
            .queue_bookmark_analysis(&bookmark("bm-7"))
            .await
            .unwrap_err();

        match err {
            QueueError::HandlerFailure { job_id, .. } => assert_eq!(job_id, "immediate_bm-7"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_analysis_is_retried() {
        let (queue, analyzer) = queue(RecordingAnalyzer::failing(&["bad"]));
        queue.queue_bookmark_analysis(&bookmark("bad")).await.unwrap();
        queue.queue_bookmark_analysis(&bookmark("good")).await.unwrap();

        let report = queue.process_analysis_report(5).await;

        assert_eq!(report.completed, 1);
        assert_eq!(report.rescheduled, 1);
        assert_eq!(analyzer.seen().len(), 2);
        assert_eq!(queue.stats().await.pending, 1);
    }

    #[tokio::test]
    async fn unknown_kinds_and_missing_ids_fail() {
        let (queue, analyzer) = queue(RecordingAnalyzer::default());
        let service = queue.service();
        service
            .submit(JobKind::custom("sync_sheet"), JobPayload::new(), 1)
            .await
            .unwrap();
        service
            .submit(JobKind::AnalyzeBookmark, JobPayload::new(), 1)
            .await
            .unwrap();

        let report = queue.process_analysis_report(5).await;

        assert_eq!(report.completed, 0);
        assert_eq!(report.discarded, 2);
        assert!(analyzer.seen().is_empty());
    }

    #[tokio::test]
    async fn outages_degrade_processing_stats_and_clear() {
        let (queue, _) = queue(RecordingAnalyzer::default());
        queue.queue_bookmark_analysis(&bookmark("bm-1")).await.unwrap();
        queue.service().store().client().set_offline(true);

        assert_eq!(queue.process_analysis_jobs(5).await, 0);
        let stats = queue.stats().await;
        assert!(!stats.available);
        assert!(stats.using_remote());
        queue.clear().await;

        queue.service().store().client().set_offline(false);
        assert_eq!(queue.stats().await.pending, 1);
        queue.clear().await;
        assert_eq!(queue.stats().await.total, 0);
    }
}
