//! Opaque domain shapes the pipeline handlers pass between the
//! external collaborators and a `ContentStore`. The queue core owns
//! none of these as persisted tables - no domain table belongs to this
//! crate; a `ContentStore` implementation owns them all - these are
//! plain data carried through handler bodies.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One item returned by a `FeedAdapter::fetch` call, before it has
/// been assigned a store-local id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedItem {
    /// Identifies this item within its source feed; `(source_id,
    /// external_id)` uniquely identifies a raw feed item.
    pub external_id: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
    pub body: String,
    /// Present for podcast sources; triggers `podcast_transcription`
    /// instead of `content_process` directly.
    pub audio_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawItemStatus {
    Pending,
    AwaitingTranscription,
    Completed,
}

/// A raw feed item as persisted by the embedding application's store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFeedItem {
    pub id: String,
    pub source_id: String,
    pub external_id: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
    pub body: String,
    pub audio_url: Option<String>,
    pub transcript: Option<String>,
    pub processing_status: RawItemStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedContent {
    pub raw_item_id: String,
    pub sentiment: f64,
    pub entities: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyAnalysis {
    pub id: String,
    pub date: NaiveDate,
    pub sentiment: f64,
    pub themes: Vec<String>,
    pub summary: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub analysis_id: String,
    pub prediction_type: String,
    pub horizon: String,
    pub text: String,
    pub confidence: f64,
    pub data: Value,
    pub realized_outcome: Option<Value>,
}

/// `{source_id}` - `feed_fetch`'s payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedFetchPayload {
    pub source_id: String,
}

/// `{raw_feed_id}` - `content_process`'s payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentProcessPayload {
    pub raw_feed_id: String,
}

/// `{raw_feed_id, audio_url}` - `podcast_transcription`'s payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodcastTranscriptionPayload {
    pub raw_feed_id: String,
    pub audio_url: String,
}

/// `{date, force?}` - `daily_analysis`'s payload. `force=true` bypasses
/// dedup and overwrites the existing analysis for `date` rather than
/// versioning it (see DESIGN.md for the rationale).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyAnalysisPayload {
    pub date: NaiveDate,
    #[serde(default)]
    pub force: bool,
}

/// `{analysis_id}` - `generate_predictions`'s payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratePredictionsPayload {
    pub analysis_id: String,
}

/// `{horizon}` - `prediction_compare`'s payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionComparePayload {
    pub horizon: String,
}
