//! Core job types and retry policy.

use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use marksync_core::{BookmarkId, JobId};

/// Payload field carrying the bookmark id of an `analyze_bookmark` job.
pub const BOOKMARK_ID_FIELD: &str = "bookmarkId";

/// Kind-specific job data (field name -> value).
pub type JobPayload = serde_json::Map<String, serde_json::Value>;

/// Job kind/type for routing to the appropriate handler.
///
/// Serialized as a plain string tag (`"analyze_bookmark"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobKind {
    /// Run the LLM analysis for one bookmarked post.
    AnalyzeBookmark,
    /// Any other tag; kept verbatim.
    Custom(String),
}

impl JobKind {
    pub fn custom(kind: impl Into<String>) -> Self {
        Self::from(kind.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            JobKind::AnalyzeBookmark => "analyze_bookmark",
            JobKind::Custom(kind) => kind,
        }
    }
}

impl From<String> for JobKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "analyze_bookmark" => JobKind::AnalyzeBookmark,
            _ => JobKind::Custom(value),
        }
    }
}

impl From<JobKind> for String {
    fn from(value: JobKind) -> Self {
        match value {
            JobKind::AnalyzeBookmark => "analyze_bookmark".to_string(),
            JobKind::Custom(kind) => kind,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed,
    /// `base * attempts`.
    #[default]
    Linear,
    /// `base * 2^(attempts - 1)`.
    Exponential,
}

/// Retry delay policy applied by the queue service.
///
/// The attempt ceiling is not part of the policy: every job carries its own
/// `max_attempts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Backoff unit.
    pub base_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(Duration::from_secs(60))
    }
}

impl RetryPolicy {
    /// `process_at = now + attempts * unit`, uncapped.
    pub fn linear(unit: Duration) -> Self {
        Self {
            base_delay: unit,
            max_delay: Duration::MAX,
            strategy: BackoffStrategy::Linear,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay before the next attempt, given the number of attempts made so far.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempts),
            BackoffStrategy::Exponential => {
                let factor = 2_u32.checked_pow(attempts - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };

        delay.min(self.max_delay)
    }
}

/// What to do with a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put it back into pending, eligible from `process_at`.
    Retry { process_at: DateTime<Utc> },
    /// Attempts exhausted; drop the job.
    Exhausted,
}

/// Caller-supplied part of a job; the store fills in the rest on enqueue.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub kind: JobKind,
    pub payload: JobPayload,
    pub max_attempts: u32,
}

impl NewJob {
    pub fn new(kind: JobKind, payload: JobPayload, max_attempts: u32) -> Self {
        Self {
            kind,
            payload,
            max_attempts,
        }
    }

    /// `analyze_bookmark` job for one bookmark.
    pub fn analyze_bookmark(bookmark_id: &BookmarkId, max_attempts: u32) -> Self {
        let mut payload = JobPayload::new();
        payload.insert(
            BOOKMARK_ID_FIELD.to_string(),
            serde_json::Value::String(bookmark_id.to_string()),
        );
        Self::new(JobKind::AnalyzeBookmark, payload, max_attempts)
    }
}

/// A queued unit of work.
///
/// Persisted layout (both backends):
/// `{"id", "type", "data", "attempts", "maxAttempts", "createdAt", "processAt"}`
/// with timestamps in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub kind: JobKind,
    #[serde(rename = "data")]
    pub payload: JobPayload,
    /// Processing attempts made so far.
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Earliest eligibility. Advisory: `drain` does not filter on it.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub process_at: DateTime<Utc>,
}

impl Job {
    /// Materialize a new job with a fresh id.
    ///
    /// Timestamps are truncated to milliseconds, the persisted precision.
    pub fn create(new_job: NewJob, now: DateTime<Utc>) -> Self {
        let now = now.trunc_subsecs(3);
        Self {
            id: JobId::new(),
            kind: new_job.kind,
            payload: new_job.payload,
            attempts: 0,
            max_attempts: new_job.max_attempts,
            created_at: now,
            process_at: now,
        }
    }

    /// Whether another failure would still be retried.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Bookmark id from the payload, if present and valid.
    pub fn bookmark_id(&self) -> Option<BookmarkId> {
        self.payload
            .get(BOOKMARK_ID_FIELD)
            .and_then(|v| v.as_str())
            .and_then(|s| BookmarkId::new(s).ok())
    }

    /// Count a failed attempt and decide between retry and exhaustion.
    ///
    /// The returned `process_at` never moves backwards.
    pub fn record_failure(&mut self, policy: &RetryPolicy, now: DateTime<Utc>) -> RetryDecision {
        self.attempts = self.attempts.saturating_add(1);

        if !self.can_retry() {
            return RetryDecision::Exhausted;
        }

        let delay = chrono::Duration::from_std(policy.delay_for_attempt(self.attempts))
            .unwrap_or(chrono::Duration::MAX);
        let candidate = now
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .trunc_subsecs(3);

        RetryDecision::Retry {
            process_at: candidate.max(self.process_at),
        }
    }
}

/// Identifier handed back to a producer.
///
/// `Immediate` marks work that ran synchronously because the queue was
/// unavailable; it never names a queued job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Queued(JobId),
    Immediate(BookmarkId),
}

impl Submission {
    pub fn is_immediate(&self) -> bool {
        matches!(self, Submission::Immediate(_))
    }

    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Submission::Queued(id) => Some(*id),
            Submission::Immediate(_) => None,
        }
    }
}

impl std::fmt::Display for Submission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Submission::Queued(id) => write!(f, "{}", id),
            Submission::Immediate(bookmark_id) => write!(f, "immediate_{}", bookmark_id),
        }
    }
}
