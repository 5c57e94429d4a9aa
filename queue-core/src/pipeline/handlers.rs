//! The seven built-in job-type handlers, wired against a
//! `PipelineContext<B>`. Each reads through its `ContentStore` and its
//! one external collaborator, persists, and enqueues whatever comes
//! next, with dedup keys chosen so a redundant producer tick is harmless.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::backend::QueueBackend;
use crate::cache::{fingerprint, Cache};
use crate::engine::{calculate_retry_time, QueueEngine};
use crate::error::JobError;
use crate::job::JobHandlerFn;
use crate::types::{priority_for_job_type, JobMessage};

use super::model::*;
use super::traits::{Analyzer, ContentProcessor, ContentStore, FeedAdapter, Predictor, Transcriber};

/// Retention/staleness knobs the `cleanup` job type needs to mirror
/// the reaper's own sweep (`reaper::Reaper::run_once`) when triggered
/// on demand through the management API, rather than waiting for the
/// next scheduled tick. Defaults match `QueueConfig::default()`.
#[derive(Debug, Clone, Copy)]
pub struct CleanupPolicy {
    /// Terminal rows older than this are pruned. `JOB_RETENTION_DAYS`.
    pub retention: Duration,
    /// A `processing` row is a reap candidate once `started_at` is
    /// older than `2 * handler_timeout`. `HANDLER_TIMEOUT_DEFAULT_SEC`.
    pub handler_timeout: Duration,
    /// A worker is considered dead once its heartbeat is older than
    /// this. `REAPER_INTERVAL_SEC`'s companion knob, default 30s.
    pub worker_heartbeat_timeout: Duration,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(7 * 24 * 3600),
            handler_timeout: Duration::from_secs(300),
            worker_heartbeat_timeout: Duration::from_secs(30),
        }
    }
}

/// Collaborators and store a pipeline handler needs, bundled so the
/// worker pool's single `C: Clone` context type can carry all seven
/// handlers at once. Cheap to clone: every field is an `Arc` or `Copy`.
pub struct PipelineContext<B: QueueBackend + 'static> {
    pub engine: Arc<QueueEngine<B>>,
    pub store: Arc<dyn ContentStore>,
    pub feed_adapter: Arc<dyn FeedAdapter>,
    pub content_processor: Arc<dyn ContentProcessor>,
    pub transcriber: Arc<dyn Transcriber>,
    pub analyzer: Arc<dyn Analyzer>,
    pub predictor: Arc<dyn Predictor>,
    pub cache: Arc<dyn Cache>,
    pub cleanup_policy: CleanupPolicy,
}

impl<B: QueueBackend + 'static> Clone for PipelineContext<B> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            store: Arc::clone(&self.store),
            feed_adapter: Arc::clone(&self.feed_adapter),
            content_processor: Arc::clone(&self.content_processor),
            transcriber: Arc::clone(&self.transcriber),
            analyzer: Arc::clone(&self.analyzer),
            predictor: Arc::clone(&self.predictor),
            cache: Arc::clone(&self.cache),
            cleanup_policy: self.cleanup_policy,
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(payload: &Value) -> Result<T, JobError> {
    serde_json::from_value(payload.clone()).map_err(|err| JobError::permanent(format!("bad payload: {err}")))
}

async fn enqueue<B: QueueBackend>(
    engine: &QueueEngine<B>,
    job_type: &str,
    payload: Value,
    dedup_key: Option<String>,
    delay: chrono::Duration,
) -> Result<(), JobError> {
    let mut message =
        JobMessage::new(job_type.to_string(), payload).with_priority(priority_for_job_type(job_type)).with_delay(delay);
    if let Some(key) = dedup_key {
        message = message.with_dedup_key(key);
    }
    engine.enqueue(message).await.map_err(|err| JobError::retryable(err.to_string()))?;
    Ok(())
}

/// `{source_id}` - fetches via `FeedAdapter`, upserts new items, and
/// fans each one out to `podcast_transcription` (when it carries
/// `audio_url`) or straight to `content_process`.
pub struct FeedFetchHandler;

#[async_trait]
impl<B: QueueBackend + 'static> JobHandlerFn<PipelineContext<B>> for FeedFetchHandler {
    fn job_type(&self) -> &'static str {
        "feed_fetch"
    }

    async fn handle(&self, payload: Value, ctx: PipelineContext<B>) -> Result<Value, JobError> {
        let FeedFetchPayload { source_id } = decode(&payload)?;

        let items = ctx.feed_adapter.fetch(&source_id).await?;
        let new_items = ctx.store.upsert_raw_items(&source_id, items).await?;

        for item in &new_items {
            if let Some(audio_url) = &item.audio_url {
                enqueue(
                    &ctx.engine,
                    "podcast_transcription",
                    serde_json::to_value(PodcastTranscriptionPayload {
                        raw_feed_id: item.id.clone(),
                        audio_url: audio_url.clone(),
                    })
                    .expect("serializable payload"),
                    Some(item.id.clone()),
                    chrono::Duration::zero(),
                )
                .await?;
            } else {
                enqueue(
                    &ctx.engine,
                    "content_process",
                    serde_json::to_value(ContentProcessPayload { raw_feed_id: item.id.clone() })
                        .expect("serializable payload"),
                    Some(item.id.clone()),
                    chrono::Duration::zero(),
                )
                .await?;
            }
        }

        ctx.store.mark_source_processed(&source_id).await?;
        Ok(serde_json::json!({ "new_items": new_items.len() }))
    }
}

/// `{raw_feed_id}` - transcribes via `Transcriber`, stores the
/// transcript, and enqueues `content_process` for the same item.
pub struct PodcastTranscriptionHandler;

#[async_trait]
impl<B: QueueBackend + 'static> JobHandlerFn<PipelineContext<B>> for PodcastTranscriptionHandler {
    fn job_type(&self) -> &'static str {
        "podcast_transcription"
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(900))
    }

    async fn handle(&self, payload: Value, ctx: PipelineContext<B>) -> Result<Value, JobError> {
        let PodcastTranscriptionPayload { raw_feed_id, audio_url } = decode(&payload)?;

        let cache_key = fingerprint("podcast_transcription", &[("audio_url", &Value::String(audio_url.clone()))]);
        let transcript = match ctx.cache.get(&cache_key).await.map_err(|e| JobError::retryable(e.to_string()))? {
            Some(cached) => cached.as_str().map(str::to_string).ok_or_else(|| JobError::permanent("corrupt cache entry"))?,
            None => {
                let transcript = ctx.transcriber.transcribe(&audio_url).await?;
                ctx.cache
                    .set(&cache_key, Value::String(transcript.clone()), Duration::from_secs(30 * 24 * 3600))
                    .await
                    .map_err(|e| JobError::retryable(e.to_string()))?;
                transcript
            }
        };

        ctx.store.store_transcript(&raw_feed_id, transcript).await?;

        enqueue(
            &ctx.engine,
            "content_process",
            serde_json::to_value(ContentProcessPayload { raw_feed_id: raw_feed_id.clone() }).expect("serializable payload"),
            Some(raw_feed_id),
            chrono::Duration::zero(),
        )
        .await?;

        Ok(Value::Null)
    }
}

/// `{raw_feed_id}` - runs `ContentProcessor` over the raw item and
/// marks it processed. No downstream enqueue: `daily_analysis` reads
/// every processed item for its date directly from the store.
pub struct ContentProcessHandler;

#[async_trait]
impl<B: QueueBackend + 'static> JobHandlerFn<PipelineContext<B>> for ContentProcessHandler {
    fn job_type(&self) -> &'static str {
        "content_process"
    }

    async fn handle(&self, payload: Value, ctx: PipelineContext<B>) -> Result<Value, JobError> {
        let ContentProcessPayload { raw_feed_id } = decode(&payload)?;

        let raw_item = ctx.store.get_raw_item(&raw_feed_id).await?;
        let processed = ctx.content_processor.process(&raw_item).await?;
        ctx.store.store_processed_content(processed).await?;
        ctx.store.mark_raw_item_processed(&raw_feed_id).await?;

        Ok(Value::Null)
    }
}

/// `{date, force?}` - aggregates the day's `ProcessedContent` via
/// `Analyzer`, stores the analysis (overwriting on `force`), and
/// enqueues `generate_predictions` five minutes out so the analysis
/// row is visible to any read replica before predictions read it.
pub struct DailyAnalysisHandler;

#[async_trait]
impl<B: QueueBackend + 'static> JobHandlerFn<PipelineContext<B>> for DailyAnalysisHandler {
    fn job_type(&self) -> &'static str {
        "daily_analysis"
    }

    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(600))
    }

    async fn handle(&self, payload: Value, ctx: PipelineContext<B>) -> Result<Value, JobError> {
        let DailyAnalysisPayload { date, .. } = decode(&payload)?;

        let processed = ctx.store.processed_content_for_date(date).await?;
        let analysis = ctx.analyzer.analyze(date, &processed).await?;
        let analysis_id = ctx.store.store_analysis(analysis).await?;

        enqueue(
            &ctx.engine,
            "generate_predictions",
            serde_json::to_value(GeneratePredictionsPayload { analysis_id: analysis_id.clone() })
                .expect("serializable payload"),
            Some(analysis_id.clone()),
            chrono::Duration::minutes(5),
        )
        .await?;

        Ok(serde_json::json!({ "analysis_id": analysis_id }))
    }
}

/// `{analysis_id}` - runs `Predictor` over the named analysis, stores
/// the predictions. No downstream enqueue: `prediction_compare` runs
/// on its own schedule against whatever has matured.
pub struct GeneratePredictionsHandler;

#[async_trait]
impl<B: QueueBackend + 'static> JobHandlerFn<PipelineContext<B>> for GeneratePredictionsHandler {
    fn job_type(&self) -> &'static str {
        "generate_predictions"
    }

    async fn handle(&self, payload: Value, ctx: PipelineContext<B>) -> Result<Value, JobError> {
        let GeneratePredictionsPayload { analysis_id } = decode(&payload)?;

        let analysis = ctx.store.get_analysis(&analysis_id).await?;
        let predictions = ctx.predictor.predict(&analysis).await?;
        let count = predictions.len();
        ctx.store.store_predictions(predictions).await?;

        Ok(serde_json::json!({ "predictions": count }))
    }
}

/// `{horizon}` - reconciles every prediction at `horizon` whose
/// maturity has passed against its realized outcome. Purely a store
/// read/write; no external collaborator.
pub struct PredictionCompareHandler;

#[async_trait]
impl<B: QueueBackend + 'static> JobHandlerFn<PipelineContext<B>> for PredictionCompareHandler {
    fn job_type(&self) -> &'static str {
        "prediction_compare"
    }

    async fn handle(&self, payload: Value, ctx: PipelineContext<B>) -> Result<Value, JobError> {
        let PredictionComparePayload { horizon } = decode(&payload)?;

        let matured = ctx.store.matured_predictions(&horizon).await?;
        let mut compared = 0;
        for prediction in matured {
            if let Some(outcome) = prediction.realized_outcome {
                ctx.store.record_comparison(&prediction.analysis_id, &prediction.prediction_type, outcome).await?;
                compared += 1;
            }
        }

        Ok(serde_json::json!({ "compared": compared }))
    }
}

/// No payload fields read - performs the same three-part sweep as the
/// reaper's own `run_once` (prune terminal rows past retention, expire
/// cache entries, reset jobs stuck under a dead worker), on demand
/// rather than waiting for the next scheduled tick. Kept as a distinct
/// job type (rather than folded into the reaper) so an operator can
/// trigger it through the management API.
pub struct CleanupHandler;

#[async_trait]
impl<B: QueueBackend + 'static> JobHandlerFn<PipelineContext<B>> for CleanupHandler {
    fn job_type(&self) -> &'static str {
        "cleanup"
    }

    async fn handle(&self, _payload: Value, ctx: PipelineContext<B>) -> Result<Value, JobError> {
        let policy = ctx.cleanup_policy;

        let dead_workers = ctx
            .engine
            .dead_workers(policy.worker_heartbeat_timeout)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;

        let base = Duration::from_secs(30);
        let cap = Duration::from_secs(3600);
        let backoff = move |attempts: u32| calculate_retry_time(attempts, base, cap);
        let reaped = ctx
            .engine
            .backend()
            .reap_stuck(policy.handler_timeout * 2, &dead_workers, &backoff)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;

        let pruned = ctx
            .engine
            .backend()
            .delete_terminal_older_than(policy.retention)
            .await
            .map_err(|e| JobError::retryable(e.to_string()))?;

        let cache_removed = ctx.cache.cleanup().await.map_err(|e| JobError::retryable(e.to_string()))?;

        Ok(serde_json::json!({
            "reaped_stuck": reaped,
            "terminal_rows_pruned": pruned,
            "cache_entries_removed": cache_removed,
        }))
    }
}

/// Registers all seven handlers under their canonical `job_type`s with
/// their per-type concurrency overrides.
pub fn register_all<B: QueueBackend + 'static>(
    registry: &mut crate::job::JobRegistry<PipelineContext<B>>,
) -> crate::error::QueueResult<()> {
    registry.register(Arc::new(FeedFetchHandler))?;
    registry.register(Arc::new(PodcastTranscriptionHandler))?;
    registry.register(Arc::new(ContentProcessHandler))?;
    registry.register(Arc::new(DailyAnalysisHandler))?;
    registry.register(Arc::new(GeneratePredictionsHandler))?;
    registry.register(Arc::new(PredictionCompareHandler))?;
    registry.register(Arc::new(CleanupHandler))?;

    registry.with_max_concurrency("content_process", 8);
    registry.with_max_concurrency("feed_fetch", 4);
    registry.with_max_concurrency("podcast_transcription", 2);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::cache::memory::MemoryCache;
    use crate::types::{JobMessage, Priority, WorkerId};
    use std::collections::HashMap;

    fn test_context(backend: Arc<MemoryBackend>, cache: Arc<dyn Cache>) -> PipelineContext<MemoryBackend> {
        use crate::pipeline::memory_store::MemoryContentStore;
        use crate::pipeline::test_doubles::{FakeAnalyzer, FakeContentProcessor, FakeFeedAdapter, FakePredictor, FakeTranscriber};

        PipelineContext {
            engine: Arc::new(QueueEngine::from_arc(backend)),
            store: Arc::new(MemoryContentStore::new()),
            feed_adapter: Arc::new(FakeFeedAdapter::new(HashMap::new())),
            content_processor: Arc::new(FakeContentProcessor),
            transcriber: Arc::new(FakeTranscriber::new(None)),
            analyzer: Arc::new(FakeAnalyzer),
            predictor: Arc::new(FakePredictor::new("1w")),
            cache,
            cleanup_policy: CleanupPolicy {
                retention: Duration::from_secs(0),
                handler_timeout: Duration::from_secs(1),
                worker_heartbeat_timeout: Duration::from_secs(1),
            },
        }
    }

    #[tokio::test]
    async fn cleanup_prunes_retention_reaps_stuck_and_sweeps_cache() {
        let backend = Arc::new(MemoryBackend::new());
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());

        // A completed row, old enough to be pruned with retention=0.
        let completed_id = backend
            .enqueue(JobMessage::new("cleanup", serde_json::json!({})).with_priority(Priority::default()))
            .await
            .unwrap();
        let holder = WorkerId::from_string("w-completed".into());
        let leased = backend.dequeue(holder.clone(), None).await.unwrap().unwrap();
        backend.complete(&leased.id, &holder).await.unwrap();

        // A row stuck under a worker that never heartbeats.
        let stuck_id = backend
            .enqueue(JobMessage::new("feed_fetch", serde_json::json!({})).with_priority(Priority::default()))
            .await
            .unwrap();
        let dead_worker = WorkerId::from_string("w-dead".into());
        let stuck = backend.dequeue(dead_worker, None).await.unwrap().unwrap();
        backend.force_started_at(&stuck.id, chrono::Utc::now() - chrono::Duration::hours(1));

        // An already-expired cache entry.
        cache.set("k", serde_json::json!({"v": 1}), Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let ctx = test_context(backend.clone(), cache.clone());
        let result = CleanupHandler.handle(Value::Null, ctx).await.unwrap();

        assert_eq!(result["reaped_stuck"], 1);
        assert_eq!(result["terminal_rows_pruned"], 1);
        assert_eq!(result["cache_entries_removed"], 1);

        assert!(backend.get_record(&completed_id).await.is_err());
        let reaped_record = backend.get_record(&stuck_id).await.unwrap();
        assert_ne!(reaped_record.status, crate::types::JobStatus::Processing);
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
