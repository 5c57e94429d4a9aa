pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use std::pin::Pin;
use std::time::Duration;

use crate::{JobEvent, JobId, JobMessage, JobRecord, JobStatus, QueueResult, WorkerId};

/// Type alias for boxed streams (stable Rust compatible).
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// A backoff function: attempt number (post-increment) -> next
/// `scheduled_at`. The retry backoff policy lives above the backend,
/// in the engine, and is passed down so the backend can apply it
/// atomically alongside the row transition.
pub type BackoffFn<'a> = &'a (dyn Fn(u32) -> DateTime<Utc> + Send + Sync);

/// Aggregate counts for `stats()`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct QueueStats {
    pub by_status: std::collections::HashMap<String, u64>,
    pub by_job_type: std::collections::HashMap<String, std::collections::HashMap<String, u64>>,
}

/// Storage primitive for the queue engine. The only
/// component permitted to mutate job rows; every mutation must be
/// linearizable with respect to other mutations on the same row.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Insert a new row, or return an existing open row's id if
    /// `message.dedup_key` collides with one already open for the
    /// same `job_type`.
    async fn enqueue(&self, message: JobMessage) -> QueueResult<JobId>;

    /// Atomically select and lease the highest-priority eligible job,
    /// restricted to `eligible_types` when given: lowest priority
    /// value, then earliest `scheduled_at`, then earliest `created_at`.
    /// Must use a locking read that skips rows already held by
    /// concurrent selectors.
    async fn dequeue(
        &self,
        worker_id: WorkerId,
        eligible_types: Option<&[&str]>,
    ) -> QueueResult<Option<JobRecord>>;

    /// Complete a job. Requires `worker_id` to match the row's current
    /// holder; errors if the row is not `processing`.
    async fn complete(&self, job_id: &JobId, worker_id: &WorkerId) -> QueueResult<()>;

    /// Fail a job. Retries with `backoff(attempts)` while attempts
    /// remain, else permanently fails.
    async fn fail(
        &self,
        job_id: &JobId,
        worker_id: &WorkerId,
        error: String,
        backoff: BackoffFn<'_>,
    ) -> QueueResult<()>;

    /// Management-only: move any non-terminal row back to `pending`.
    async fn reset(&self, job_id: &JobId) -> QueueResult<()>;

    /// Give a leased job back to its queue without counting it as a
    /// failure: used when a dequeuing fiber finds its type's
    /// concurrency semaphore full. Requires `worker_id` to match the
    /// row's current holder; restores the pre-dequeue attempt count
    /// and reschedules `delay` from now, since a semaphore bounce is
    /// not an execution attempt.
    async fn requeue(&self, job_id: &JobId, worker_id: &WorkerId, delay: chrono::Duration) -> QueueResult<()>;

    /// Fail a job permanently regardless of remaining attempts: used
    /// for permanent-data errors, where no amount of retrying would
    /// help. Requires `worker_id` to match the row's current holder.
    async fn fail_permanent(&self, job_id: &JobId, worker_id: &WorkerId, error: String) -> QueueResult<()>;

    /// Management-only: cancel a job (cancel-wins semantics - a
    /// concurrent `complete`/`fail` on an already-cancelled row is
    /// rejected).
    async fn cancel(&self, job_id: &JobId) -> QueueResult<bool>;

    async fn stats(&self) -> QueueResult<QueueStats>;

    async fn get_record(&self, job_id: &JobId) -> QueueResult<JobRecord>;

    /// List jobs for the management API, newest first.
    async fn list_jobs(
        &self,
        status: Option<&str>,
        job_type: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> QueueResult<Vec<JobRecord>>;

    /// Record that `worker_id` is alive.
    async fn heartbeat(&self, worker_id: &WorkerId) -> QueueResult<()>;

    /// Worker ids whose last heartbeat is older than `stale_after`.
    async fn dead_workers(&self, stale_after: Duration) -> QueueResult<Vec<WorkerId>>;

    /// Reap rows stuck in `processing`: `started_at` older than
    /// `elapsed_bound` AND held by a worker in `dead_workers`. Returns
    /// the number of rows reaped.
    async fn reap_stuck(
        &self,
        elapsed_bound: Duration,
        dead_workers: &[WorkerId],
        backoff: BackoffFn<'_>,
    ) -> QueueResult<usize>;

    /// Delete terminal rows older than `retention`.
    async fn delete_terminal_older_than(&self, retention: Duration) -> QueueResult<usize>;

    /// Delete every terminal row currently in `status`, regardless of
    /// age. Used by the management API's `clear` operation; `status`
    /// must be a terminal one (`completed`, `failed`, or `cancelled`).
    async fn delete_terminal_by_status(&self, status: JobStatus) -> QueueResult<usize>;

    fn event_stream(&self) -> BoxStream<JobEvent>;
}
