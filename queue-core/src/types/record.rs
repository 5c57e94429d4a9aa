use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobId, JobMessage, WorkerId};
use crate::error::truncate_diagnostic;

/// Job lifecycle status - a closed set of six states. Kept as plain
/// unit variants rather than data-carrying ones so the row invariants
/// are checkable as field equations on `JobRecord` instead of pattern
/// matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retry,
    Cancelled,
}

impl JobStatus {
    /// Open statuses: eligible to be re-dequeued or still in flight.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing | Self::Retry)
    }

    /// Terminal statuses: done, and never revisited by the reaper.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retry => "retry",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Mutable runtime state of a job row. Every lifecycle invariant is a
/// plain field relationship here:
/// `status = processing ⇒ worker_id ≠ null ∧ started_at ≠ null`,
/// `status ∈ {completed, failed, cancelled} ⇒ completed_at ≠ null ∧ worker_id = null`,
/// `attempts ≤ max_attempts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub priority: super::Priority,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub worker_id: Option<WorkerId>,
    pub dedup_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(id: JobId, message: JobMessage) -> Self {
        let now = Utc::now();
        Self {
            id,
            job_type: message.job_type,
            payload: message.payload,
            priority: message.priority,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: message.max_attempts,
            scheduled_at: message.scheduled_at,
            started_at: None,
            completed_at: None,
            error_message: None,
            worker_id: None,
            dedup_key: message.dedup_key,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::Retry) && self.scheduled_at <= now
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Atomically-intended transition to `processing`; the backend is
    /// responsible for making this visible-or-nothing under its own
    /// locking (row lock for SQL backends, `RwLock` for the in-memory
    /// one).
    pub fn start_processing(&mut self, worker_id: WorkerId) {
        let now = Utc::now();
        self.status = JobStatus::Processing;
        self.worker_id = Some(worker_id);
        self.started_at = Some(now);
        self.attempts += 1;
        self.updated_at = now;
    }

    pub fn complete(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.worker_id = None;
        self.updated_at = now;
    }

    pub fn fail_permanently(&mut self, error: impl Into<String>) {
        let now = Utc::now();
        let message = truncate_diagnostic(&error.into());
        self.status = JobStatus::Failed;
        self.completed_at = Some(now);
        self.error_message = Some(message);
        self.worker_id = None;
        self.updated_at = now;
    }

    pub fn schedule_retry(&mut self, scheduled_at: DateTime<Utc>, error: impl Into<String>) {
        let now = Utc::now();
        self.status = JobStatus::Retry;
        self.scheduled_at = scheduled_at;
        self.error_message = Some(truncate_diagnostic(&error.into()));
        self.worker_id = None;
        self.started_at = None;
        self.updated_at = now;
    }

    /// Retry while attempts remain, else permanently fail. `backoff`
    /// computes the next `scheduled_at` from the current attempt count.
    pub fn fail(&mut self, error: impl Into<String>, backoff: impl FnOnce(u32) -> DateTime<Utc>) {
        let error = error.into();
        if self.attempts < self.max_attempts {
            let scheduled_at = backoff(self.attempts);
            self.schedule_retry(scheduled_at, error);
        } else {
            self.fail_permanently(error);
        }
    }

    pub fn cancel(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(now);
        self.worker_id = None;
        self.updated_at = now;
    }

    /// Management-only: move a non-terminal row back to `pending`.
    pub fn reset(&mut self) {
        let now = Utc::now();
        self.status = JobStatus::Pending;
        self.attempts = 0;
        self.scheduled_at = now;
        self.worker_id = None;
        self.started_at = None;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    fn sample() -> JobRecord {
        JobRecord::new(
            JobId::new(),
            JobMessage::new("cleanup", serde_json::json!({})).with_priority(Priority::default()),
        )
    }

    #[test]
    fn processing_requires_worker_and_started_at() {
        let mut job = sample();
        job.start_processing(WorkerId::from_string("w-1".into()));
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.worker_id.is_some());
        assert!(job.started_at.is_some());
    }

    #[test]
    fn terminal_states_clear_worker_and_set_completed_at() {
        let mut job = sample();
        job.start_processing(WorkerId::from_string("w-1".into()));
        job.complete();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.worker_id.is_none());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn fail_becomes_failed_once_max_attempts_reached() {
        let mut job = sample();
        job.max_attempts = 1;
        job.start_processing(WorkerId::from_string("w-1".into()));
        job.fail("ETIMEDOUT", |_| Utc::now());
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.attempts <= job.max_attempts);
    }

    #[test]
    fn fail_schedules_retry_when_attempts_remain() {
        let mut job = sample();
        job.max_attempts = 3;
        job.start_processing(WorkerId::from_string("w-1".into()));
        job.fail("ETIMEDOUT", |_| Utc::now() + chrono::Duration::seconds(30));
        assert_eq!(job.status, JobStatus::Retry);
        assert_eq!(job.error_message.as_deref(), Some("ETIMEDOUT"));
    }
}
