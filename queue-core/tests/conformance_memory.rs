//! Conformance suite for `MemoryBackend` against the `QueueBackend`
//! contract: atomic dequeue, ownership-checked completion, cancel-wins
//! semantics, retry scheduling, dedup, priority/FIFO ordering, and
//! event emission. A Postgres-backed implementation is expected to
//! pass the same scenarios.

use std::time::Duration;

use futures::StreamExt;

use queue_core::backend::memory::MemoryBackend;
use queue_core::{JobEvent, JobMessage, JobStatus, Priority, QueueBackend, QueueError, WorkerId};

fn worker(name: &str) -> WorkerId {
    WorkerId::from_string(name.to_string())
}

fn message(job_type: &str) -> JobMessage {
    JobMessage::new(job_type, serde_json::json!({"n": 1}))
}

#[tokio::test]
async fn dequeue_leases_atomically() {
    let backend = MemoryBackend::new();
    let job_id = backend.enqueue(message("test_job")).await.unwrap();

    let leased = backend.dequeue(worker("w-1"), None).await.unwrap().unwrap();
    assert_eq!(leased.id, job_id);
    assert_eq!(leased.status, JobStatus::Processing);
    assert_eq!(leased.worker_id, Some(worker("w-1")));
    assert_eq!(leased.attempts, 1);

    // Already leased: a second dequeue finds nothing.
    assert!(backend.dequeue(worker("w-2"), None).await.unwrap().is_none());
}

#[tokio::test]
async fn only_holder_can_complete() {
    let backend = MemoryBackend::new();
    backend.enqueue(message("test_job")).await.unwrap();
    let leased = backend.dequeue(worker("w-1"), None).await.unwrap().unwrap();

    let result = backend.complete(&leased.id, &worker("w-2")).await;
    assert!(matches!(result, Err(QueueError::WorkerMismatch)));

    backend.complete(&leased.id, &worker("w-1")).await.unwrap();
    let record = backend.get_record(&leased.id).await.unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert!(record.worker_id.is_none());
}

#[tokio::test]
async fn complete_is_at_most_once() {
    let backend = MemoryBackend::new();
    backend.enqueue(message("test_job")).await.unwrap();
    let leased = backend.dequeue(worker("w-1"), None).await.unwrap().unwrap();

    backend.complete(&leased.id, &worker("w-1")).await.unwrap();
    let result = backend.complete(&leased.id, &worker("w-1")).await;
    assert!(matches!(result, Err(QueueError::JobNotProcessing)));
}

#[tokio::test]
async fn cancel_wins_over_complete() {
    let backend = MemoryBackend::new();
    backend.enqueue(message("test_job")).await.unwrap();
    let leased = backend.dequeue(worker("w-1"), None).await.unwrap().unwrap();

    let cancelled = backend.cancel(&leased.id).await.unwrap();
    assert!(cancelled);

    let result = backend.complete(&leased.id, &worker("w-1")).await;
    assert!(result.is_err());

    let record = backend.get_record(&leased.id).await.unwrap();
    assert_eq!(record.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn retryable_failure_schedules_retry_and_stays_ineligible() {
    let backend = MemoryBackend::new();
    backend.enqueue(message("test_job").with_priority(Priority::default())).await.unwrap();
    let leased = backend.dequeue(worker("w-1"), None).await.unwrap().unwrap();

    let backoff = |_attempts: u32| chrono::Utc::now() + chrono::Duration::seconds(60);
    backend.fail(&leased.id, &worker("w-1"), "transient".into(), &backoff).await.unwrap();

    let record = backend.get_record(&leased.id).await.unwrap();
    assert_eq!(record.status, JobStatus::Retry);
    assert_eq!(record.error_message.as_deref(), Some("transient"));

    // Not yet eligible: no dequeue returns it.
    assert!(backend.dequeue(worker("w-2"), None).await.unwrap().is_none());
}

#[tokio::test]
async fn failure_becomes_permanent_once_attempts_exhausted() {
    let backend = MemoryBackend::new();
    let job_id = backend.enqueue(message("test_job").with_max_attempts(1)).await.unwrap();
    let leased = backend.dequeue(worker("w-1"), None).await.unwrap().unwrap();

    let backoff = |_attempts: u32| chrono::Utc::now() + chrono::Duration::seconds(1);
    backend.fail(&leased.id, &worker("w-1"), "fatal".into(), &backoff).await.unwrap();

    let record = backend.get_record(&job_id).await.unwrap();
    assert_eq!(record.status, JobStatus::Failed);
}

#[tokio::test]
async fn fail_permanent_bypasses_remaining_attempts() {
    let backend = MemoryBackend::new();
    backend.enqueue(message("test_job").with_max_attempts(5)).await.unwrap();
    let leased = backend.dequeue(worker("w-1"), None).await.unwrap().unwrap();

    backend.fail_permanent(&leased.id, &worker("w-1"), "unrecoverable".into()).await.unwrap();

    let record = backend.get_record(&leased.id).await.unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.attempts, 1);
}

#[tokio::test]
async fn requeue_restores_attempt_count_without_counting_as_a_failure() {
    let backend = MemoryBackend::new();
    backend.enqueue(message("test_job")).await.unwrap();
    let leased = backend.dequeue(worker("w-1"), None).await.unwrap().unwrap();
    assert_eq!(leased.attempts, 1);

    backend.requeue(&leased.id, &worker("w-1"), chrono::Duration::milliseconds(0)).await.unwrap();

    let record = backend.get_record(&leased.id).await.unwrap();
    assert_eq!(record.status, JobStatus::Pending);
    assert_eq!(record.attempts, 0);
}

#[tokio::test]
async fn dedup_key_returns_existing_open_job() {
    let backend = MemoryBackend::new();
    let first = backend.enqueue(message("test_job").with_dedup_key("src-1")).await.unwrap();
    let second = backend.enqueue(message("test_job").with_dedup_key("src-1")).await.unwrap();
    assert_eq!(first, second);

    // A different job_type with the same key does not collide.
    let other_type = backend.enqueue(message("other_job").with_dedup_key("src-1")).await.unwrap();
    assert_ne!(first, other_type);
}

#[tokio::test]
async fn dedup_key_reopens_once_the_prior_job_is_terminal() {
    let backend = MemoryBackend::new();
    let first = backend.enqueue(message("test_job").with_dedup_key("src-1")).await.unwrap();
    let leased = backend.dequeue(worker("w-1"), None).await.unwrap().unwrap();
    backend.complete(&leased.id, &worker("w-1")).await.unwrap();

    let second = backend.enqueue(message("test_job").with_dedup_key("src-1")).await.unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn priority_then_fifo_ordering() {
    let backend = MemoryBackend::new();

    let low = backend.enqueue(message("t").with_priority(Priority::new(9).unwrap())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let high_first = backend.enqueue(message("t").with_priority(Priority::new(1).unwrap())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let high_second = backend.enqueue(message("t").with_priority(Priority::new(1).unwrap())).await.unwrap();

    let first = backend.dequeue(worker("w-1"), None).await.unwrap().unwrap();
    let second = backend.dequeue(worker("w-1"), None).await.unwrap().unwrap();
    let third = backend.dequeue(worker("w-1"), None).await.unwrap().unwrap();

    assert_eq!(first.id, high_first);
    assert_eq!(second.id, high_second);
    assert_eq!(third.id, low);
}

#[tokio::test]
async fn eligible_types_restricts_dequeue() {
    let backend = MemoryBackend::new();
    backend.enqueue(message("feed_fetch")).await.unwrap();
    backend.enqueue(message("cleanup")).await.unwrap();

    let leased = backend.dequeue(worker("w-1"), Some(&["cleanup"])).await.unwrap().unwrap();
    assert_eq!(leased.job_type, "cleanup");

    // feed_fetch remains pending, untouched by the restricted dequeue.
    let stats = backend.stats().await.unwrap();
    assert_eq!(*stats.by_status.get("pending").unwrap_or(&0), 1);
}

#[tokio::test]
async fn emits_lifecycle_events_in_order() {
    let backend = MemoryBackend::new();
    let mut events = backend.event_stream();

    let job_id = backend.enqueue(message("test_job")).await.unwrap();
    match events.next().await.unwrap() {
        JobEvent::Enqueued { job_id: id, .. } => assert_eq!(id, job_id),
        other => panic!("expected Enqueued, got {other:?}"),
    }

    backend.dequeue(worker("w-1"), None).await.unwrap();
    match events.next().await.unwrap() {
        JobEvent::Processing { job_id: id, worker_id, .. } => {
            assert_eq!(id, job_id);
            assert_eq!(worker_id, "w-1");
        }
        other => panic!("expected Processing, got {other:?}"),
    }

    backend.complete(&job_id, &worker("w-1")).await.unwrap();
    match events.next().await.unwrap() {
        JobEvent::Completed { job_id: id, .. } => assert_eq!(id, job_id),
        other => panic!("expected Completed, got {other:?}"),
    }
}

#[tokio::test]
async fn reap_stuck_requeues_or_fails_rows_held_by_dead_workers() {
    let backend = MemoryBackend::new();
    backend.enqueue(message("test_job").with_max_attempts(1)).await.unwrap();
    let leased = backend.dequeue(worker("dead-worker"), None).await.unwrap().unwrap();

    let backoff = |_attempts: u32| chrono::Utc::now();
    let reaped = backend
        .reap_stuck(Duration::from_secs(0), &[worker("dead-worker")], &backoff)
        .await
        .unwrap();
    assert_eq!(reaped, 1);

    let record = backend.get_record(&leased.id).await.unwrap();
    assert_eq!(record.status, JobStatus::Failed);
}

#[tokio::test]
async fn delete_terminal_by_status_only_removes_that_status() {
    let backend = MemoryBackend::new();
    let completed = backend.enqueue(message("a")).await.unwrap();
    let leased = backend.dequeue(worker("w-1"), None).await.unwrap().unwrap();
    backend.complete(&leased.id, &worker("w-1")).await.unwrap();

    backend.enqueue(message("b")).await.unwrap();

    let removed = backend.delete_terminal_by_status(JobStatus::Completed).await.unwrap();
    assert_eq!(removed, 1);
    assert!(backend.get_record(&completed).await.is_err());
}
