//! Pipeline producers: scheduled emitters translating "state of the
//! world" into new jobs. Three rules run independently: a per-minute
//! feed-source scan, an hourly `cleanup` enqueue, and a daily
//! `daily_analysis` enqueue at a configured UTC offset. The interval
//! rules reuse the reaper's `tokio::time::interval` loop shape. The
//! daily rule's next-fire computation is a plain UTC-offset
//! calculation by default; with the `cron-scheduling` feature it
//! instead parses a six-field cron expression via the `cron` crate,
//! for deployments that want more than one fixed time of day.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveTime, Utc};
use tracing::{info, instrument, warn};

use crate::backend::QueueBackend;
use crate::engine::QueueEngine;
use crate::error::QueueResult;
use crate::types::{priority_for_job_type, JobMessage};

/// Supplies the set of feed source ids currently due for a refresh.
/// Implemented by the embedding application, which alone knows what a
/// "feed source" and its cadence are; this crate only knows how to
/// turn "due" into an enqueued `feed_fetch` job.
#[async_trait]
pub trait FeedSourceCatalog: Send + Sync {
    /// Source ids where `now - last_processed_at >= cadence`.
    async fn due_sources(&self, now: chrono::DateTime<Utc>) -> QueueResult<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub feed_scan_interval: Duration,
    pub cleanup_interval: Duration,
    /// Time of day (UTC) the daily analysis job is enqueued.
    pub daily_analysis_at: NaiveTime,
    /// Six-field cron expression (`sec min hour day month weekday`)
    /// overriding `daily_analysis_at` when the `cron-scheduling`
    /// feature is enabled. `None` keeps the plain UTC-offset rule.
    #[cfg(feature = "cron-scheduling")]
    pub daily_analysis_cron: Option<String>,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            feed_scan_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(3600),
            daily_analysis_at: NaiveTime::from_hms_opt(2, 0, 0).expect("valid static time"),
            #[cfg(feature = "cron-scheduling")]
            daily_analysis_cron: None,
        }
    }
}

/// Spawns the three scheduled producer loops against one engine.
pub struct Producers<B: QueueBackend + 'static> {
    engine: Arc<QueueEngine<B>>,
    catalog: Arc<dyn FeedSourceCatalog>,
    config: ProducerConfig,
}

impl<B: QueueBackend + 'static> Producers<B> {
    pub fn new(engine: Arc<QueueEngine<B>>, catalog: Arc<dyn FeedSourceCatalog>, config: ProducerConfig) -> Self {
        Self { engine, catalog, config }
    }

    pub fn spawn(&self) -> Vec<tokio::task::JoinHandle<()>> {
        vec![self.spawn_feed_scan(), self.spawn_cleanup(), self.spawn_daily_analysis()]
    }

    fn spawn_feed_scan(&self) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let catalog = Arc::clone(&self.catalog);
        let interval = self.config.feed_scan_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = scan_feed_sources(&engine, catalog.as_ref()).await {
                    warn!(error = %err, "feed source scan failed");
                }
            }
        })
    }

    fn spawn_cleanup(&self) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let interval = self.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = enqueue_cleanup(&engine).await {
                    warn!(error = %err, "scheduled cleanup enqueue failed");
                }
            }
        })
    }

    fn spawn_daily_analysis(&self) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let at = self.config.daily_analysis_at;
        #[cfg(feature = "cron-scheduling")]
        let cron_expr = self.config.daily_analysis_cron.clone();
        tokio::spawn(async move {
            loop {
                #[cfg(feature = "cron-scheduling")]
                let sleep_for = match &cron_expr {
                    Some(expr) => match duration_until_next_cron(expr) {
                        Ok(d) => d,
                        Err(err) => {
                            warn!(error = %err, expr, "invalid daily_analysis cron expression, falling back to UTC offset");
                            duration_until_next(at)
                        }
                    },
                    None => duration_until_next(at),
                };
                #[cfg(not(feature = "cron-scheduling"))]
                let sleep_for = duration_until_next(at);

                tokio::time::sleep(sleep_for).await;
                if let Err(err) = enqueue_daily_analysis(&engine).await {
                    warn!(error = %err, "scheduled daily analysis enqueue failed");
                }
            }
        })
    }
}

#[cfg(feature = "cron-scheduling")]
fn duration_until_next_cron(expr: &str) -> Result<Duration, String> {
    use std::str::FromStr;
    let schedule = cron::Schedule::from_str(expr).map_err(|e| e.to_string())?;
    let next = schedule
        .upcoming(Utc)
        .next()
        .ok_or_else(|| "cron expression has no upcoming fire time".to_string())?;
    (next - Utc::now()).to_std().map_err(|e| e.to_string())
}

/// Every minute: scan active feed sources, enqueue `feed_fetch` for
/// any that are due. De-duplicated by `(feed_fetch, source_id)`.
#[instrument(skip(engine, catalog))]
async fn scan_feed_sources<B: QueueBackend>(
    engine: &QueueEngine<B>,
    catalog: &dyn FeedSourceCatalog,
) -> QueueResult<()> {
    let now = Utc::now();
    let due = catalog.due_sources(now).await?;
    for source_id in due {
        let message = JobMessage::new("feed_fetch", serde_json::json!({ "source_id": source_id }))
            .with_priority(priority_for_job_type("feed_fetch"))
            .with_dedup_key(source_id.clone());
        let job_id = engine.enqueue(message).await?;
        info!(source_id = %source_id, job_id = %job_id, "enqueued feed_fetch");
    }
    Ok(())
}

/// Every hour: enqueue `cleanup`. Not deduplicated - the handler is
/// idempotent and the reaper's own retention sweep makes a double
/// enqueue harmless.
async fn enqueue_cleanup<B: QueueBackend>(engine: &QueueEngine<B>) -> QueueResult<()> {
    let message =
        JobMessage::new("cleanup", serde_json::json!({})).with_priority(priority_for_job_type("cleanup"));
    let job_id = engine.enqueue(message).await?;
    info!(job_id = %job_id, "enqueued scheduled cleanup");
    Ok(())
}

/// Daily at the configured UTC offset: enqueue `daily_analysis`,
/// deduplicated by today's date so a restart mid-day can't double-run it.
async fn enqueue_daily_analysis<B: QueueBackend>(engine: &QueueEngine<B>) -> QueueResult<()> {
    let today = Utc::now().date_naive();
    let message = JobMessage::new("daily_analysis", serde_json::json!({ "date": today.to_string() }))
        .with_priority(priority_for_job_type("daily_analysis"))
        .with_dedup_key(today.to_string());
    let job_id = engine.enqueue(message).await?;
    info!(job_id = %job_id, date = %today, "enqueued daily_analysis");
    Ok(())
}

fn duration_until_next(at: NaiveTime) -> Duration {
    let now = Utc::now();
    let today_fire = now.date_naive().and_time(at).and_utc();
    let next_fire = if today_fire > now { today_fire } else { today_fire + chrono::Duration::days(1) };
    (next_fire - now).to_std().unwrap_or(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;

    struct FixedCatalog(Vec<String>);

    #[async_trait]
    impl FeedSourceCatalog for FixedCatalog {
        async fn due_sources(&self, _now: chrono::DateTime<Utc>) -> QueueResult<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn feed_scan_enqueues_one_job_per_due_source() {
        let engine = QueueEngine::new(MemoryBackend::new());
        let catalog = FixedCatalog(vec!["source-a".to_string(), "source-b".to_string()]);

        scan_feed_sources(&engine, &catalog).await.unwrap();

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.by_job_type.get("feed_fetch").and_then(|s| s.get("pending")).copied(), Some(2));
    }

    #[tokio::test]
    async fn feed_scan_is_deduplicated_by_source() {
        let engine = QueueEngine::new(MemoryBackend::new());
        let catalog = FixedCatalog(vec!["source-a".to_string()]);

        scan_feed_sources(&engine, &catalog).await.unwrap();
        scan_feed_sources(&engine, &catalog).await.unwrap();

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.by_job_type.get("feed_fetch").and_then(|s| s.get("pending")).copied(), Some(1));
    }

    #[tokio::test]
    async fn daily_analysis_is_deduplicated_by_date() {
        let engine = QueueEngine::new(MemoryBackend::new());
        enqueue_daily_analysis(&engine).await.unwrap();
        enqueue_daily_analysis(&engine).await.unwrap();

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.by_job_type.get("daily_analysis").and_then(|s| s.get("pending")).copied(), Some(1));
    }
}
