//! Queue engine: the only component permitted to mutate job rows.
//! Exposes the primitive operations plus the management surface
//! (`reset`, `cancel`, `stats`, `list_jobs`) over any `QueueBackend`.
//! Folds what used to be a separate engine/adapter split into one
//! type, since this redesign has no multi-tenant codec layer to keep
//! apart from the storage-facing adapter.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{info, instrument};

use crate::backend::{BoxStream, QueueBackend, QueueStats};
use crate::error::{QueueError, QueueResult};
use crate::types::{JobEvent, JobId, JobMessage, JobRecord, Priority, WorkerId, MAX_PAYLOAD_BYTES};

/// Exponential backoff with jitter for `fail`'s retry scheduling:
/// `min(base * 2^(attempts-1), cap) + U(0, base)`. `attempts` is the
/// post-increment attempt count at the time of failure.
pub fn calculate_retry_time(attempts: u32, base: Duration, cap: Duration) -> DateTime<Utc> {
    let exponent = attempts.saturating_sub(1).min(32);
    let backoff = base.saturating_mul(1u32.checked_shl(exponent).unwrap_or(u32::MAX));
    let bounded = backoff.min(cap);
    let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis().max(1) as u64);
    Utc::now() + chrono::Duration::milliseconds(bounded.as_millis() as i64 + jitter_ms as i64)
}

/// Backoff policy knobs: `base=30s`, `cap=1h` by default.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { base: Duration::from_secs(30), cap: Duration::from_secs(3600) }
    }
}

/// Durable, database-backed job queue. Thin validating wrapper around
/// a `QueueBackend`: priority range and payload size are checked here,
/// before the row ever reaches storage, and the retry backoff policy
/// lives here rather than in any particular backend.
pub struct QueueEngine<B: QueueBackend> {
    backend: Arc<B>,
    backoff: BackoffConfig,
}

impl<B: QueueBackend> Clone for QueueEngine<B> {
    fn clone(&self) -> Self {
        Self { backend: Arc::clone(&self.backend), backoff: self.backoff }
    }
}

impl<B: QueueBackend> QueueEngine<B> {
    pub fn new(backend: B) -> Self {
        Self { backend: Arc::new(backend), backoff: BackoffConfig::default() }
    }

    pub fn from_arc(backend: Arc<B>) -> Self {
        Self { backend, backoff: BackoffConfig::default() }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Enqueue a job. Returns the id of a pre-existing open row when
    /// `message.dedup_key` collides with one (at-most-one-open-per-key).
    #[instrument(skip(self, message), fields(job_type = %message.job_type))]
    pub async fn enqueue(&self, message: JobMessage) -> QueueResult<JobId> {
        if message.payload_size() > MAX_PAYLOAD_BYTES {
            return Err(QueueError::PayloadTooLarge { size: message.payload_size(), max: MAX_PAYLOAD_BYTES });
        }
        self.backend.enqueue(message).await
    }

    /// Convenience wrapper building a `JobMessage` from parts.
    pub async fn enqueue_job(
        &self,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        priority: Priority,
        delay: chrono::Duration,
        dedup_key: Option<String>,
        max_attempts: Option<u32>,
    ) -> QueueResult<JobId> {
        let mut message = JobMessage::new(job_type, payload).with_priority(priority).with_delay(delay);
        if let Some(key) = dedup_key {
            message = message.with_dedup_key(key);
        }
        if let Some(max_attempts) = max_attempts {
            message = message.with_max_attempts(max_attempts);
        }
        self.enqueue(message).await
    }

    /// Atomically lease the highest-priority eligible row for `worker_id`,
    /// optionally restricted to `eligible_types`.
    #[instrument(skip(self))]
    pub async fn dequeue(
        &self,
        worker_id: WorkerId,
        eligible_types: Option<&[&str]>,
    ) -> QueueResult<Option<JobRecord>> {
        self.backend.dequeue(worker_id, eligible_types).await
    }

    /// Mark a leased job complete. Requires the caller to still hold
    /// the row (`worker_id` must match).
    pub async fn complete(&self, job_id: &JobId, worker_id: &WorkerId) -> QueueResult<()> {
        self.backend.complete(job_id, worker_id).await
    }

    /// Fail a leased job: retries with exponential backoff while
    /// attempts remain, else permanently fails.
    pub async fn fail(&self, job_id: &JobId, worker_id: &WorkerId, error: String) -> QueueResult<()> {
        let base = self.backoff.base;
        let cap = self.backoff.cap;
        let backoff = move |attempts: u32| calculate_retry_time(attempts, base, cap);
        self.backend.fail(job_id, worker_id, error, &backoff).await
    }

    /// Management-only: move any non-terminal row back to `pending`.
    pub async fn reset(&self, job_id: &JobId) -> QueueResult<()> {
        self.backend.reset(job_id).await
    }

    /// Hand a leased job back to its queue without spending an
    /// attempt: the per-type concurrency semaphore was full, not a
    /// handler failure.
    pub async fn requeue(&self, job_id: &JobId, worker_id: &WorkerId, delay: Duration) -> QueueResult<()> {
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        self.backend.requeue(job_id, worker_id, delay).await
    }

    /// Fail a leased job immediately, bypassing retries: a permanent
    /// data error, not a transient one.
    pub async fn fail_permanent(&self, job_id: &JobId, worker_id: &WorkerId, error: String) -> QueueResult<()> {
        self.backend.fail_permanent(job_id, worker_id, error).await
    }

    /// Management-only: cancel a job. Returns `false` if the row was
    /// already terminal (cancel is then a no-op, not an error).
    pub async fn cancel(&self, job_id: &JobId) -> QueueResult<bool> {
        self.backend.cancel(job_id).await
    }

    /// Counts by status, and by `(job_type, status)`.
    pub async fn stats(&self) -> QueueResult<QueueStats> {
        self.backend.stats().await
    }

    pub async fn get_record(&self, job_id: &JobId) -> QueueResult<JobRecord> {
        self.backend.get_record(job_id).await
    }

    pub async fn list_jobs(
        &self,
        status: Option<&str>,
        job_type: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> QueueResult<Vec<JobRecord>> {
        self.backend.list_jobs(status, job_type, limit, offset).await
    }

    /// Management-only: delete every terminal row in `status`. Rejects
    /// a non-terminal status rather than silently doing nothing.
    pub async fn clear(&self, status: crate::types::JobStatus) -> QueueResult<usize> {
        if !status.is_terminal() {
            return Err(QueueError::BackendUnsupported(format!("cannot clear non-terminal status {status}")));
        }
        self.backend.delete_terminal_by_status(status).await
    }

    pub async fn heartbeat(&self, worker_id: &WorkerId) -> QueueResult<()> {
        self.backend.heartbeat(worker_id).await
    }

    pub async fn dead_workers(&self, stale_after: Duration) -> QueueResult<Vec<WorkerId>> {
        self.backend.dead_workers(stale_after).await
    }

    pub fn event_stream(&self) -> BoxStream<JobEvent> {
        self.backend.event_stream()
    }
}

/// Logged once at startup so operators can see which backend a
/// process came up with (`memory` is the crate default feature).
pub fn log_backend_selected(name: &str) {
    info!(backend = name, "queue engine backend selected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_saturates_at_cap() {
        let base = Duration::from_secs(30);
        let cap = Duration::from_secs(3600);
        let now = Utc::now();

        let first = calculate_retry_time(1, base, cap);
        assert!(first >= now + chrono::Duration::seconds(30));
        assert!(first <= now + chrono::Duration::seconds(60));

        let late = calculate_retry_time(20, base, cap);
        assert!(late <= now + chrono::Duration::seconds(3600 + 31));
    }
}
