//! Reaper / janitor. Runs once per `interval` (default 60s), generalized
//! to work over any `QueueBackend`, combining an elapsed-time bound
//! with a worker-heartbeat liveness check rather than wall-clock alone.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::engine::calculate_retry_time;
use crate::backend::QueueBackend;
use crate::error::QueueResult;

/// Reaper configuration.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// How often the reaper runs. `REAPER_INTERVAL_SEC`, default 60s.
    pub interval: Duration,
    /// A `processing` row is a reap candidate once `started_at` is
    /// older than `2 * handler_timeout`.
    pub handler_timeout: Duration,
    /// A worker is considered dead once its heartbeat is older than
    /// this. Default 30s.
    pub worker_heartbeat_timeout: Duration,
    /// Terminal rows older than this are deleted. `JOB_RETENTION_DAYS`.
    pub retention: Duration,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            handler_timeout: Duration::from_secs(300),
            worker_heartbeat_timeout: Duration::from_secs(30),
            retention: Duration::from_secs(7 * 24 * 3600),
            base_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(3600),
        }
    }
}

/// Janitor process: reclaims stuck `processing` rows, prunes terminal
/// rows past retention, and sweeps the expired cache.
pub struct Reaper<B: QueueBackend + 'static> {
    backend: Arc<B>,
    cache: Option<Arc<dyn crate::cache::Cache>>,
    config: ReaperConfig,
}

impl<B: QueueBackend + 'static> Reaper<B> {
    pub fn new(backend: Arc<B>, config: ReaperConfig) -> Self {
        Self { backend, cache: None, config }
    }

    pub fn with_cache(mut self, cache: Arc<dyn crate::cache::Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Spawn the periodic loop. Returns the `JoinHandle` so callers can
    /// abort it alongside the rest of the worker pool on shutdown.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            loop {
                ticker.tick().await;
                if let Err(err) = self.run_once().await {
                    warn!(error = %err, "reaper tick failed");
                }
            }
        })
    }

    #[instrument(skip(self))]
    pub async fn run_once(&self) -> QueueResult<ReaperReport> {
        let dead_workers = self
            .backend
            .dead_workers(self.config.worker_heartbeat_timeout)
            .await?;

        let base = self.config.base_backoff;
        let max = self.config.max_backoff;
        let backoff = move |attempts: u32| calculate_retry_time(attempts, base, max);

        let reaped = self
            .backend
            .reap_stuck(self.config.handler_timeout * 2, &dead_workers, &backoff)
            .await?;
        if reaped > 0 {
            info!(reaped, "reclaimed stuck processing rows");
        }

        let deleted = self.backend.delete_terminal_older_than(self.config.retention).await?;
        if deleted > 0 {
            info!(deleted, "pruned terminal rows past retention");
        }

        let cache_swept = if let Some(cache) = &self.cache {
            cache.cleanup().await?
        } else {
            0
        };

        let stats = self.backend.stats().await?;
        Ok(ReaperReport {
            reaped_stuck: reaped,
            deleted_terminal: deleted,
            cache_entries_swept: cache_swept,
            stats,
            at: Utc::now(),
        })
    }
}

/// Summary of a single reaper pass; also doubles as the gauge-metric
/// source for dashboards (queue depth per `(type, status)`, age of
/// oldest pending).
#[derive(Debug, Clone)]
pub struct ReaperReport {
    pub reaped_stuck: usize,
    pub deleted_terminal: usize,
    pub cache_entries_swept: usize,
    pub stats: crate::backend::QueueStats,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::types::{JobMessage, Priority, WorkerId};
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn stuck_recovery_reclaims_dead_worker_jobs() {
        let backend = Arc::new(MemoryBackend::new());
        let worker = WorkerId::from_string("dead-worker".into());

        backend
            .enqueue(JobMessage::new("cleanup", serde_json::json!({})).with_priority(Priority::default()))
            .await
            .unwrap();
        let leased = backend.dequeue(worker.clone(), None).await.unwrap().unwrap();
        backend.force_started_at(&leased.id, Utc::now() - chrono::Duration::hours(1));
        // Never heartbeat `worker`, so it shows up as dead immediately.

        let reaper = Reaper::new(backend.clone(), ReaperConfig {
            handler_timeout: StdDuration::from_secs(1),
            worker_heartbeat_timeout: StdDuration::from_secs(1),
            ..Default::default()
        });
        let report = reaper.run_once().await.unwrap();
        assert_eq!(report.reaped_stuck, 1);

        let record = backend.get_record(&leased.id).await.unwrap();
        assert!(record.status == crate::types::JobStatus::Retry || record.status == crate::types::JobStatus::Failed);
    }

    #[tokio::test]
    async fn live_worker_heartbeat_prevents_reaping() {
        let backend = Arc::new(MemoryBackend::new());
        let worker = WorkerId::from_string("alive-worker".into());

        backend
            .enqueue(JobMessage::new("cleanup", serde_json::json!({})).with_priority(Priority::default()))
            .await
            .unwrap();
        let leased = backend.dequeue(worker.clone(), None).await.unwrap().unwrap();
        backend.force_started_at(&leased.id, Utc::now() - chrono::Duration::hours(1));
        backend.heartbeat(&worker).await.unwrap();

        let reaper = Reaper::new(backend.clone(), ReaperConfig {
            handler_timeout: StdDuration::from_secs(1),
            worker_heartbeat_timeout: StdDuration::from_secs(3600),
            ..Default::default()
        });
        let report = reaper.run_once().await.unwrap();
        assert_eq!(report.reaped_stuck, 0);
    }
}
