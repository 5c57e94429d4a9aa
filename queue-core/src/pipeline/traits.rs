//! External-collaborator interfaces: feed adapters, the content
//! processor, transcription, analysis/prediction, and the domain store
//! the built-in handlers read and write through. This crate ships no
//! production implementation of any of these - only the in-memory test
//! doubles in `pipeline::memory_store`. Each is a seam the embedding
//! application fills in with its own feed-fetching, NLP, and storage
//! code.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::JobError;
use super::model::*;

/// `fetch(source) -> items`.
#[async_trait]
pub trait FeedAdapter: Send + Sync {
    async fn fetch(&self, source_id: &str) -> Result<Vec<FetchedItem>, JobError>;
}

/// `process(rawItem) -> structured content`.
#[async_trait]
pub trait ContentProcessor: Send + Sync {
    async fn process(&self, raw_item: &RawFeedItem) -> Result<ProcessedContent, JobError>;
}

/// `transcribe(url) -> text`.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_url: &str) -> Result<String, JobError>;
}

/// `analyze(date) -> summary`.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, date: NaiveDate, processed: &[ProcessedContent]) -> Result<DailyAnalysis, JobError>;
}

/// `predict(analysisId) -> predictions[]`.
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, analysis: &DailyAnalysis) -> Result<Vec<Prediction>, JobError>;
}

/// The domain tables the pipeline handlers read and write. The queue
/// core owns none of this storage itself; the embedding application
/// supplies an implementation (typically the same relational store
/// the queue engine's `PostgresBackend` uses, but that is the
/// application's choice, not this crate's).
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Upserts fetched items for `source_id` by `(source_id,
    /// external_id)`, returning only the ones that were newly
    /// inserted (already-seen items are silently skipped, not
    /// returned, so `feed_fetch` only spawns downstream jobs for
    /// genuinely new content).
    async fn upsert_raw_items(
        &self,
        source_id: &str,
        items: Vec<FetchedItem>,
    ) -> Result<Vec<RawFeedItem>, JobError>;

    async fn get_raw_item(&self, raw_item_id: &str) -> Result<RawFeedItem, JobError>;

    async fn store_transcript(&self, raw_item_id: &str, transcript: String) -> Result<(), JobError>;

    async fn mark_raw_item_processed(&self, raw_item_id: &str) -> Result<(), JobError>;

    async fn store_processed_content(&self, content: ProcessedContent) -> Result<(), JobError>;

    /// Every `ProcessedContent` derived from a raw item published on
    /// `date`.
    async fn processed_content_for_date(&self, date: NaiveDate) -> Result<Vec<ProcessedContent>, JobError>;

    /// Persists an analysis, overwriting any existing row for
    /// `analysis.date` (see `DailyAnalysisPayload::force`'s
    /// semantics in DESIGN.md). Returns the analysis id.
    async fn store_analysis(&self, analysis: DailyAnalysis) -> Result<String, JobError>;

    async fn get_analysis(&self, analysis_id: &str) -> Result<DailyAnalysis, JobError>;

    async fn store_predictions(&self, predictions: Vec<Prediction>) -> Result<(), JobError>;

    /// Predictions whose `horizon` has elapsed and have not yet been
    /// compared against a realized outcome.
    async fn matured_predictions(&self, horizon: &str) -> Result<Vec<Prediction>, JobError>;

    async fn record_comparison(&self, analysis_id: &str, prediction_type: &str, outcome: serde_json::Value) -> Result<(), JobError>;

    /// `last_processed_at` update a `feed_fetch` handler commits once
    /// its adapter call and raw-item upserts have landed.
    async fn mark_source_processed(&self, source_id: &str) -> Result<(), JobError>;
}
