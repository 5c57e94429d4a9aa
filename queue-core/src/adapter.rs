//! Worker pool: polls a `QueueEngine` for eligible jobs and dispatches
//! them through a `JobRegistry`, holding one per-job-type `Semaphore`
//! so no job type can starve the others of concurrency.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{oneshot, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::QueueBackend;
use crate::engine::QueueEngine;
use crate::error::QueueResult;
use crate::job::JobRegistry;
use crate::types::WorkerId;

/// Time a worker sleeps after an empty dequeue before polling again,
/// randomized within `[base, base + jitter]` so a fleet of idle
/// workers doesn't thunder against the backend in lockstep.
const POLL_BASE: Duration = Duration::from_secs(2);
const POLL_JITTER: Duration = Duration::from_millis(500);

/// Grace period given to a timed-out handler to unwind cooperatively
/// (drop guards, flush partial state) before the pool moves on and
/// reports the job failed regardless.
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Delay applied when a dequeued job is handed back to its queue
/// because its type's concurrency semaphore is full.
const SEMAPHORE_FULL_REQUEUE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub pool_name: String,
    pub fiber_count: usize,
    /// Restrict this pool to a subset of registered job types, or
    /// `None` to accept anything in the registry.
    pub eligible_types: Option<Vec<String>>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { pool_name: "default".to_string(), fiber_count: 4, eligible_types: None }
    }
}

/// Handle to a running pool. Dropping it does not stop the pool;
/// call `shutdown().await` for a graceful stop (finish in-flight jobs,
/// don't start new ones).
pub struct WorkerPoolHandle {
    shutdown_tx: Vec<oneshot::Sender<()>>,
    join_handles: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    pub async fn shutdown(self) {
        for tx in self.shutdown_tx {
            let _ = tx.send(());
        }
        for handle in self.join_handles {
            let _ = handle.await;
        }
    }
}

/// Runs `fiber_count` concurrent poll loops against one `QueueEngine`,
/// dispatching through one `JobRegistry<C>`. Each loop dequeues across
/// every type the registry (or `eligible_types`) allows, then bounds
/// in-flight handlers for that type with the registry's configured
/// `max_concurrency` semaphore.
pub struct WorkerPool<B: QueueBackend + 'static, C: Send + Sync + Clone + 'static> {
    engine: Arc<QueueEngine<B>>,
    registry: Arc<JobRegistry<C>>,
    context: C,
    config: WorkerPoolConfig,
    paused: Arc<AtomicBool>,
    semaphores: Arc<HashMap<String, Arc<Semaphore>>>,
}

impl<B: QueueBackend + 'static, C: Send + Sync + Clone + 'static> WorkerPool<B, C> {
    pub fn new(engine: Arc<QueueEngine<B>>, registry: Arc<JobRegistry<C>>, context: C, config: WorkerPoolConfig) -> Self {
        let semaphores = registry
            .registered_types()
            .into_iter()
            .map(|job_type| {
                let permits = registry.max_concurrency(&job_type);
                (job_type, Arc::new(Semaphore::new(permits)))
            })
            .collect();
        Self { engine, registry, context, config, paused: Arc::new(AtomicBool::new(false)), semaphores: Arc::new(semaphores) }
    }

    pub fn paused_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.paused)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Spawn `fiber_count` poll loops plus one heartbeat loop per
    /// fiber. Returns a handle for graceful shutdown.
    pub fn spawn(&self) -> WorkerPoolHandle {
        let mut shutdown_tx = Vec::new();
        let mut join_handles = Vec::new();

        let eligible_types: Option<Vec<String>> =
            self.config.eligible_types.clone().or_else(|| Some(self.registry.registered_types()));

        for fiber_index in 0..self.config.fiber_count {
            let (tx, rx) = oneshot::channel();
            shutdown_tx.push(tx);

            let worker_id = WorkerId::new(&self.config.pool_name, fiber_index);
            let engine = Arc::clone(&self.engine);
            let registry = Arc::clone(&self.registry);
            let semaphores = Arc::clone(&self.semaphores);
            let context = self.context.clone();
            let paused = Arc::clone(&self.paused);
            let eligible_types = eligible_types.clone();

            let fiber = Fiber { worker_id, engine, registry, semaphores, context, paused, eligible_types };
            join_handles.push(tokio::spawn(fiber.run(rx)));
        }

        WorkerPoolHandle { shutdown_tx, join_handles }
    }
}

struct Fiber<B: QueueBackend + 'static, C: Send + Sync + Clone + 'static> {
    worker_id: WorkerId,
    engine: Arc<QueueEngine<B>>,
    registry: Arc<JobRegistry<C>>,
    semaphores: Arc<HashMap<String, Arc<Semaphore>>>,
    context: C,
    paused: Arc<AtomicBool>,
    eligible_types: Option<Vec<String>>,
}

impl<B: QueueBackend + 'static, C: Send + Sync + Clone + 'static> Fiber<B, C> {
    async fn run(self, mut shutdown_rx: oneshot::Receiver<()>) {
        info!(worker_id = %self.worker_id.as_str(), "worker fiber started");
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!(worker_id = %self.worker_id.as_str(), "worker fiber shutting down");
                    break;
                }
                _ = heartbeat.tick() => {
                    if let Err(err) = self.engine.heartbeat(&self.worker_id).await {
                        warn!(error = %err, "heartbeat failed");
                    }
                }
                processed = self.poll_once() => {
                    match processed {
                        Ok(true) => {}
                        Ok(false) => tokio::time::sleep(jittered_poll_delay()).await,
                        Err(err) => {
                            error!(error = %err, "poll iteration failed");
                            tokio::time::sleep(jittered_poll_delay()).await;
                        }
                    }
                }
            }
        }
    }

    async fn poll_once(&self) -> QueueResult<bool> {
        if self.paused.load(Ordering::SeqCst) {
            tokio::time::sleep(jittered_poll_delay()).await;
            return Ok(false);
        }

        let eligible: Option<Vec<&str>> =
            self.eligible_types.as_ref().map(|types| types.iter().map(String::as_str).collect());
        let eligible_refs = eligible.as_deref();

        let record = match self.engine.dequeue(self.worker_id.clone(), eligible_refs).await? {
            Some(record) => record,
            None => return Ok(false),
        };

        let job_type = record.job_type.clone();
        let permit = match self.semaphores.get(&job_type) {
            Some(sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(TryAcquireError::NoPermits) => {
                    debug!(job_id = %record.id.as_str(), job_type = %job_type, "type concurrency full, returning job to queue");
                    if let Err(err) =
                        self.engine.requeue(&record.id, &self.worker_id, SEMAPHORE_FULL_REQUEUE_DELAY).await
                    {
                        error!(error = %err, "failed to requeue job after semaphore exhaustion");
                    }
                    return Ok(true);
                }
                Err(TryAcquireError::Closed) => None,
            },
            None => None,
        };

        self.dispatch(record).await;
        drop(permit);
        Ok(true)
    }

    #[instrument(skip(self, record), fields(job_id = %record.id.as_str(), job_type = %record.job_type))]
    async fn dispatch(&self, record: crate::types::JobRecord) {
        let job_id = record.id.clone();
        let timeout = self.registry.timeout(&record.job_type);
        debug!("dispatching job");

        let outcome = tokio::time::timeout(
            timeout + TIMEOUT_GRACE,
            self.registry.dispatch(&record.job_type, record.payload.clone(), self.context.clone()),
        )
        .await;

        match outcome {
            Ok(Ok(_value)) => {
                if let Err(err) = self.engine.complete(&job_id, &self.worker_id).await {
                    error!(error = %err, "failed to record job completion");
                }
            }
            Ok(Err(job_error)) => {
                let result = if job_error.is_retryable() {
                    self.engine.fail(&job_id, &self.worker_id, job_error.message().to_string()).await
                } else {
                    self.engine.fail_permanent(&job_id, &self.worker_id, job_error.message().to_string()).await
                };
                if let Err(err) = result {
                    error!(error = %err, "failed to record job failure");
                }
            }
            Err(_elapsed) => {
                warn!(timeout = ?timeout, "handler exceeded timeout");
                if let Err(err) =
                    self.engine.fail(&job_id, &self.worker_id, format!("handler exceeded {:?} timeout", timeout)).await
                {
                    error!(error = %err, "failed to record job timeout");
                }
            }
        }
    }
}

fn jittered_poll_delay() -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..=POLL_JITTER.as_millis() as u64);
    POLL_BASE + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::job::FnHandler;
    use crate::types::{JobMessage, Priority};
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn pool_dispatches_enqueued_job_to_handler() {
        let backend = MemoryBackend::new();
        let engine = Arc::new(QueueEngine::new(backend));

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let mut registry: JobRegistry<()> = JobRegistry::new();
        registry
            .register(Arc::new(FnHandler::new("cleanup", move |payload: serde_json::Value, _ctx: ()| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(payload)
                }
            })))
            .unwrap();
        let registry = Arc::new(registry);

        engine
            .enqueue(JobMessage::new("cleanup", serde_json::json!({})).with_priority(Priority::default()))
            .await
            .unwrap();

        let pool = WorkerPool::new(
            Arc::clone(&engine),
            registry,
            (),
            WorkerPoolConfig { pool_name: "test".to_string(), fiber_count: 1, eligible_types: None },
        );
        let handle = pool.spawn();

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.by_status.get("completed").copied().unwrap_or(0), 1);
    }

    #[tokio::test]
    async fn pause_stops_new_dequeues() {
        let backend = MemoryBackend::new();
        let engine = Arc::new(QueueEngine::new(backend));
        let registry: Arc<JobRegistry<()>> = Arc::new(JobRegistry::new());

        let pool = WorkerPool::new(
            Arc::clone(&engine),
            registry,
            (),
            WorkerPoolConfig { pool_name: "paused".to_string(), fiber_count: 1, eligible_types: None },
        );
        pool.pause();
        assert!(pool.is_paused());

        let handle = pool.spawn();
        engine
            .enqueue(JobMessage::new("cleanup", serde_json::json!({})).with_priority(Priority::default()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await;

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.by_status.get("pending").copied().unwrap_or(0), 1);
    }
}
