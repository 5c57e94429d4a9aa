use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, instrument};

use crate::backend::{BackoffFn, BoxStream, QueueBackend, QueueStats};
use crate::{JobEvent, JobId, JobMessage, JobRecord, JobStatus, QueueError, QueueResult, WorkerId};

type QueuesByType = HashMap<String, VecDeque<JobId>>;
/// `(job_type, dedup_key) -> job_id`, populated only while that job is
/// open - the partial-uniqueness constraint enforced in application
/// code here, since the in-memory backend has no database constraint
/// to lean on.
type DedupMap = HashMap<(String, String), JobId>;

/// In-memory `QueueBackend` for tests, local development, and the
/// `memory` feature's standalone mode: `parking_lot::RwLock`-guarded
/// maps plus a broadcast event channel, over one flat, non-tenant-scoped
/// job table.
pub struct MemoryBackend {
    pub(crate) jobs: Arc<RwLock<HashMap<JobId, JobRecord>>>,
    pub(crate) queues: Arc<RwLock<QueuesByType>>,
    pub(crate) dedup: Arc<RwLock<DedupMap>>,
    pub(crate) heartbeats: Arc<RwLock<HashMap<WorkerId, chrono::DateTime<Utc>>>>,
    pub(crate) event_broadcaster: broadcast::Sender<JobEvent>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (event_broadcaster, _) = broadcast::channel(1024);
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            queues: Arc::new(RwLock::new(HashMap::new())),
            dedup: Arc::new(RwLock::new(HashMap::new())),
            heartbeats: Arc::new(RwLock::new(HashMap::new())),
            event_broadcaster,
        }
    }

    /// Test/reaper helper: force a job's `started_at` into the past so
    /// elapsed-time reaping can be exercised without waiting.
    pub fn force_started_at(&self, job_id: &JobId, started_at: chrono::DateTime<Utc>) {
        if let Some(record) = self.jobs.write().get_mut(job_id) {
            record.started_at = Some(started_at);
        }
    }

    /// Insert `job.id` into its type's queue at the priority/FIFO
    /// position dequeue ordering expects. Takes the already-locked
    /// maps rather than re-acquiring them, since
    /// `parking_lot::RwLock` read locks are not safely reentrant
    /// against a concurrent writer. Does not check whether `job.id` is
    /// already queued - callers that might re-insert an id still
    /// present in the deque (`reset`, which can target a row that is
    /// already `pending` or `retry`) must call `remove_from_queue_locked`
    /// first.
    fn insert_into_queue_locked(
        queues: &mut QueuesByType,
        jobs: &HashMap<JobId, JobRecord>,
        job: &JobRecord,
    ) {
        let queue = queues.entry(job.job_type.clone()).or_default();
        let insert_pos = queue
            .iter()
            .position(|existing_id| match jobs.get(existing_id) {
                Some(existing) => {
                    (job.priority.get(), job.scheduled_at, job.created_at)
                        < (existing.priority.get(), existing.scheduled_at, existing.created_at)
                }
                None => true,
            })
            .unwrap_or(queue.len());
        queue.insert(insert_pos, job.id.clone());
    }

    /// Remove `job_id` from its type's queue, if present. `reset` can
    /// target a row that is `pending` or `retry` and thus already
    /// queued; without this, re-inserting would leave a duplicate,
    /// dead entry that dequeue's position-based removal never visits
    /// again once the live entry is taken.
    fn remove_from_queue_locked(queues: &mut QueuesByType, job_type: &str, job_id: &JobId) {
        if let Some(queue) = queues.get_mut(job_type) {
            if let Some(position) = queue.iter().position(|id| id == job_id) {
                queue.remove(position);
            }
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    #[instrument(skip(self, message), fields(job_type = %message.job_type))]
    async fn enqueue(&self, message: JobMessage) -> QueueResult<JobId> {
        if message.payload_size() > crate::types::MAX_PAYLOAD_BYTES {
            return Err(QueueError::PayloadTooLarge {
                size: message.payload_size(),
                max: crate::types::MAX_PAYLOAD_BYTES,
            });
        }

        if let Some(ref key) = message.dedup_key {
            let scope = (message.job_type.clone(), key.clone());
            if let Some(existing_id) = self.dedup.read().get(&scope).cloned() {
                let jobs = self.jobs.read();
                if let Some(existing) = jobs.get(&existing_id) {
                    if existing.status.is_open() {
                        debug!(job_id = %existing_id, "dedup hit, returning existing open job");
                        return Ok(existing_id);
                    }
                }
            }
        }

        let job_id = JobId::new();
        let record = JobRecord::new(job_id.clone(), message.clone());
        {
            let mut jobs = self.jobs.write();
            jobs.insert(job_id.clone(), record.clone());
            Self::insert_into_queue_locked(&mut self.queues.write(), &jobs, &record);
        }

        if let Some(ref key) = message.dedup_key {
            let scope = (message.job_type.clone(), key.clone());
            self.dedup.write().insert(scope, job_id.clone());
        }

        let _ = self.event_broadcaster.send(JobEvent::Enqueued {
            job_id: job_id.clone(),
            job_type: message.job_type,
            at: record.created_at,
        });

        Ok(job_id)
    }

    #[instrument(skip(self))]
    async fn dequeue(
        &self,
        worker_id: WorkerId,
        eligible_types: Option<&[&str]>,
    ) -> QueueResult<Option<JobRecord>> {
        let now = Utc::now();
        // Lock order is always jobs-then-queues, matching enqueue/fail,
        // to avoid an AB-BA deadlock between concurrent callers.
        let mut jobs = self.jobs.write();
        let mut queues = self.queues.write();

        let type_names: Vec<String> = match eligible_types {
            Some(types) => types.iter().map(|s| s.to_string()).collect(),
            None => queues.keys().cloned().collect(),
        };

        for job_type in type_names {
            let Some(queue) = queues.get_mut(&job_type) else {
                continue;
            };
            let position = queue.iter().position(|id| {
                jobs.get(id)
                    .map(|record| record.is_eligible(now))
                    .unwrap_or(false)
            });
            let Some(position) = position else { continue };
            let job_id = queue.remove(position).expect("position is valid");
            let record = jobs.get_mut(&job_id).expect("job exists");
            record.start_processing(worker_id.clone());

            let _ = self.event_broadcaster.send(JobEvent::Processing {
                job_id: job_id.clone(),
                worker_id: worker_id.as_str().to_string(),
                at: now,
            });

            return Ok(Some(record.clone()));
        }

        Ok(None)
    }

    async fn complete(&self, job_id: &JobId, worker_id: &WorkerId) -> QueueResult<()> {
        let now = Utc::now();
        let mut jobs = self.jobs.write();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        if record.status == JobStatus::Cancelled {
            return Err(QueueError::JobCanceled);
        }
        if record.status != JobStatus::Processing {
            return Err(QueueError::JobNotProcessing);
        }
        if record.worker_id.as_ref() != Some(worker_id) {
            return Err(QueueError::WorkerMismatch);
        }

        record.complete();
        let _ = self.event_broadcaster.send(JobEvent::Completed {
            job_id: job_id.clone(),
            at: now,
        });
        Ok(())
    }

    async fn fail(
        &self,
        job_id: &JobId,
        worker_id: &WorkerId,
        error: String,
        backoff: BackoffFn<'_>,
    ) -> QueueResult<()> {
        let now = Utc::now();
        let mut jobs = self.jobs.write();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        if record.status == JobStatus::Cancelled {
            return Err(QueueError::JobCanceled);
        }
        if record.status != JobStatus::Processing {
            return Err(QueueError::JobNotProcessing);
        }
        if record.worker_id.as_ref() != Some(worker_id) {
            return Err(QueueError::WorkerMismatch);
        }

        record.fail(error.clone(), |attempt| backoff(attempt));
        let went_to_retry = record.status == JobStatus::Retry;
        let scheduled_at = record.scheduled_at;
        let job_type = record.job_type.clone();

        if went_to_retry {
            self.queues.write().entry(job_type).or_default().push_back(job_id.clone());
            drop(jobs);
            let _ = self.event_broadcaster.send(JobEvent::Retrying {
                job_id: job_id.clone(),
                scheduled_at,
                error,
                at: now,
            });
        } else {
            drop(jobs);
            let _ = self.event_broadcaster.send(JobEvent::Failed {
                job_id: job_id.clone(),
                error,
                at: now,
            });
        }
        Ok(())
    }

    async fn reset(&self, job_id: &JobId) -> QueueResult<()> {
        let mut jobs = self.jobs.write();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;
        record.reset();
        let reset_record = record.clone();
        let mut queues = self.queues.write();
        Self::remove_from_queue_locked(&mut queues, &reset_record.job_type, &reset_record.id);
        Self::insert_into_queue_locked(&mut queues, &jobs, &reset_record);
        Ok(())
    }

    async fn requeue(&self, job_id: &JobId, worker_id: &WorkerId, delay: chrono::Duration) -> QueueResult<()> {
        let mut jobs = self.jobs.write();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        if record.status != JobStatus::Processing {
            return Err(QueueError::JobNotProcessing);
        }
        if record.worker_id.as_ref() != Some(worker_id) {
            return Err(QueueError::WorkerMismatch);
        }

        record.status = JobStatus::Pending;
        record.attempts = record.attempts.saturating_sub(1);
        record.scheduled_at = Utc::now() + delay;
        record.worker_id = None;
        record.started_at = None;
        record.updated_at = Utc::now();
        let requeued = record.clone();

        let mut queues = self.queues.write();
        Self::insert_into_queue_locked(&mut queues, &jobs, &requeued);
        Ok(())
    }

    async fn fail_permanent(&self, job_id: &JobId, worker_id: &WorkerId, error: String) -> QueueResult<()> {
        let now = Utc::now();
        let mut jobs = self.jobs.write();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        if record.status == JobStatus::Cancelled {
            return Err(QueueError::JobCanceled);
        }
        if record.status != JobStatus::Processing {
            return Err(QueueError::JobNotProcessing);
        }
        if record.worker_id.as_ref() != Some(worker_id) {
            return Err(QueueError::WorkerMismatch);
        }

        record.fail_permanently(error.clone());
        drop(jobs);
        let _ = self.event_broadcaster.send(JobEvent::Failed { job_id: job_id.clone(), error, at: now });
        Ok(())
    }

    async fn cancel(&self, job_id: &JobId) -> QueueResult<bool> {
        let now = Utc::now();
        let mut jobs = self.jobs.write();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))?;

        if record.status.is_terminal() {
            return Ok(false);
        }
        record.cancel();
        let _ = self.event_broadcaster.send(JobEvent::Cancelled {
            job_id: job_id.clone(),
            at: now,
        });
        Ok(true)
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let jobs = self.jobs.read();
        let mut stats = QueueStats::default();
        for record in jobs.values() {
            *stats.by_status.entry(record.status.name().to_string()).or_default() += 1;
            *stats
                .by_job_type
                .entry(record.job_type.clone())
                .or_default()
                .entry(record.status.name().to_string())
                .or_default() += 1;
        }
        Ok(stats)
    }

    async fn get_record(&self, job_id: &JobId) -> QueueResult<JobRecord> {
        self.jobs
            .read()
            .get(job_id)
            .cloned()
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))
    }

    async fn list_jobs(
        &self,
        status: Option<&str>,
        job_type: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> QueueResult<Vec<JobRecord>> {
        let jobs = self.jobs.read();
        let mut matching: Vec<JobRecord> = jobs
            .values()
            .filter(|r| status.map(|s| r.status.name() == s).unwrap_or(true))
            .filter(|r| job_type.map(|t| r.job_type == t).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn heartbeat(&self, worker_id: &WorkerId) -> QueueResult<()> {
        self.heartbeats.write().insert(worker_id.clone(), Utc::now());
        Ok(())
    }

    async fn dead_workers(&self, stale_after: Duration) -> QueueResult<Vec<WorkerId>> {
        let now = Utc::now();
        let stale_after = chrono::Duration::from_std(stale_after)
            .map_err(|e| QueueError::Internal(e.to_string()))?;
        let jobs = self.jobs.read();
        let active_workers: std::collections::HashSet<WorkerId> = jobs
            .values()
            .filter_map(|r| r.worker_id.clone())
            .collect();
        let heartbeats = self.heartbeats.read();
        Ok(active_workers
            .into_iter()
            .filter(|w| match heartbeats.get(w) {
                Some(last_seen) => now - *last_seen > stale_after,
                None => true,
            })
            .collect())
    }

    async fn reap_stuck(
        &self,
        elapsed_bound: Duration,
        dead_workers: &[WorkerId],
        backoff: BackoffFn<'_>,
    ) -> QueueResult<usize> {
        let now = Utc::now();
        let elapsed_bound = chrono::Duration::from_std(elapsed_bound)
            .map_err(|e| QueueError::Internal(e.to_string()))?;
        let dead: std::collections::HashSet<&WorkerId> = dead_workers.iter().collect();

        let stuck_ids: Vec<JobId> = {
            let jobs = self.jobs.read();
            jobs.values()
                .filter(|r| {
                    r.status == JobStatus::Processing
                        && r.started_at.map(|s| now - s > elapsed_bound).unwrap_or(false)
                        && r.worker_id.as_ref().map(|w| dead.contains(w)).unwrap_or(false)
                })
                .map(|r| r.id.clone())
                .collect()
        };

        for job_id in &stuck_ids {
            let mut jobs = self.jobs.write();
            let record = jobs.get_mut(job_id).expect("job exists");
            record.fail(
                "worker heartbeat lost while job was processing".to_string(),
                |attempt| backoff(attempt),
            );
            let went_to_retry = record.status == JobStatus::Retry;
            let job_type = record.job_type.clone();
            drop(jobs);
            if went_to_retry {
                self.queues.write().entry(job_type).or_default().push_back(job_id.clone());
            }
            let _ = self.event_broadcaster.send(JobEvent::Reaped {
                job_id: job_id.clone(),
                at: now,
            });
        }

        Ok(stuck_ids.len())
    }

    async fn delete_terminal_older_than(&self, retention: Duration) -> QueueResult<usize> {
        let now = Utc::now();
        let retention = chrono::Duration::from_std(retention)
            .map_err(|e| QueueError::Internal(e.to_string()))?;
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, r| {
            !(r.status.is_terminal()
                && r.completed_at.map(|c| now - c > retention).unwrap_or(false))
        });
        Ok(before - jobs.len())
    }

    async fn delete_terminal_by_status(&self, status: JobStatus) -> QueueResult<usize> {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, r| r.status != status);
        Ok(before - jobs.len())
    }

    fn event_stream(&self) -> BoxStream<JobEvent> {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let receiver = self.event_broadcaster.subscribe();
        Box::pin(BroadcastStream::new(receiver).filter_map(|result| result.ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    fn test_message() -> JobMessage {
        JobMessage::new("test_job", serde_json::json!({"k": "v"})).with_priority(Priority::default())
    }

    fn backoff(_attempt: u32) -> chrono::DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(30)
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_leases_atomically() {
        let backend = MemoryBackend::new();
        let job_id = backend.enqueue(test_message()).await.unwrap();
        let worker = WorkerId::from_string("w-1".into());

        let leased = backend.dequeue(worker.clone(), None).await.unwrap().unwrap();
        assert_eq!(leased.id, job_id);
        assert_eq!(leased.attempts, 1);
        assert_eq!(leased.worker_id, Some(worker));
    }

    #[tokio::test]
    async fn only_holder_can_complete() {
        let backend = MemoryBackend::new();
        backend.enqueue(test_message()).await.unwrap();
        let leased = backend
            .dequeue(WorkerId::from_string("w-1".into()), None)
            .await
            .unwrap()
            .unwrap();

        let result = backend.complete(&leased.id, &WorkerId::from_string("w-2".into())).await;
        assert!(matches!(result, Err(QueueError::WorkerMismatch)));
    }

    #[tokio::test]
    async fn dedup_returns_existing_open_job() {
        let backend = MemoryBackend::new();
        let message = test_message().with_dedup_key("raw-123");
        let first = backend.enqueue(message.clone()).await.unwrap();
        let second = backend.enqueue(message).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn cancel_wins_over_complete() {
        let backend = MemoryBackend::new();
        backend.enqueue(test_message()).await.unwrap();
        let worker = WorkerId::from_string("w-1".into());
        let leased = backend.dequeue(worker.clone(), None).await.unwrap().unwrap();

        assert!(backend.cancel(&leased.id).await.unwrap());
        let result = backend.complete(&leased.id, &worker).await;
        assert!(matches!(result, Err(QueueError::JobCanceled)));
    }

    #[tokio::test]
    async fn retryable_failure_schedules_retry() {
        let backend = MemoryBackend::new();
        backend.enqueue(test_message()).await.unwrap();
        let worker = WorkerId::from_string("w-1".into());
        let leased = backend.dequeue(worker.clone(), None).await.unwrap().unwrap();

        backend
            .fail(&leased.id, &worker, "ETIMEDOUT".into(), &backoff)
            .await
            .unwrap();

        let record = backend.get_record(&leased.id).await.unwrap();
        assert_eq!(record.status, JobStatus::Retry);
        assert_eq!(record.error_message.as_deref(), Some("ETIMEDOUT"));
    }

    #[tokio::test]
    async fn reset_on_an_already_queued_retry_row_does_not_duplicate_the_queue_entry() {
        let backend = MemoryBackend::new();
        let job_id = backend.enqueue(test_message()).await.unwrap();
        let worker = WorkerId::from_string("w-1".into());
        let leased = backend.dequeue(worker.clone(), None).await.unwrap().unwrap();

        // Failing moves the row to `retry` and pushes it back onto its
        // type's queue, so `job_id` is already present there.
        backend
            .fail(&leased.id, &worker, "ETIMEDOUT".into(), &backoff)
            .await
            .unwrap();

        // Resetting re-inserts at the `pending` position. If the stale
        // `retry` entry were not removed first, the queue would hold
        // two ids for `job_id`, and a second dequeue of the same type
        // would wrongly succeed against the leftover entry.
        backend.reset(&job_id).await.unwrap();

        let first = backend.dequeue(WorkerId::from_string("w-2".into()), None).await.unwrap();
        assert_eq!(first.map(|r| r.id), Some(job_id));
        assert!(backend.dequeue(WorkerId::from_string("w-3".into()), None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn priority_then_fifo_ordering() {
        let backend = MemoryBackend::new();
        let low = JobMessage::new("cleanup", serde_json::json!({}))
            .with_priority(Priority::new(10).unwrap());
        let high = JobMessage::new("cleanup", serde_json::json!({}))
            .with_priority(Priority::new(1).unwrap());

        backend.enqueue(low).await.unwrap();
        let high_id = backend.enqueue(high).await.unwrap();

        let leased = backend
            .dequeue(WorkerId::from_string("w-1".into()), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased.id, high_id);
    }
}
