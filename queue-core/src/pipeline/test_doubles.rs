//! In-memory test doubles for the external-collaborator traits, for
//! embedding applications to exercise the pipeline handlers against
//! before wiring in a real feed client, LLM, or transcription service.
//! Deterministic and configured up front; none of them call out to
//! anything.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::JobError;

use super::model::{DailyAnalysis, FetchedItem, ProcessedContent, Prediction, RawFeedItem};
use super::traits::{Analyzer, ContentProcessor, FeedAdapter, Predictor, Transcriber};

/// Returns a fixed item list per `source_id`, configured at
/// construction. An unconfigured source yields an empty fetch rather
/// than an error.
pub struct FakeFeedAdapter {
    items: HashMap<String, Vec<FetchedItem>>,
}

impl FakeFeedAdapter {
    pub fn new(items: HashMap<String, Vec<FetchedItem>>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl FeedAdapter for FakeFeedAdapter {
    async fn fetch(&self, source_id: &str) -> Result<Vec<FetchedItem>, JobError> {
        Ok(self.items.get(source_id).cloned().unwrap_or_default())
    }
}

/// Produces a deterministic, content-free `ProcessedContent` from a
/// raw item's id and body length.
pub struct FakeContentProcessor;

#[async_trait]
impl ContentProcessor for FakeContentProcessor {
    async fn process(&self, raw_item: &RawFeedItem) -> Result<ProcessedContent, JobError> {
        Ok(ProcessedContent {
            raw_item_id: raw_item.id.clone(),
            sentiment: 0.0,
            entities: Vec::new(),
            summary: format!("{} chars", raw_item.body.len()),
        })
    }
}

/// Echoes back a fixed transcript for every `audio_url`, or one
/// derived from the url if none was configured.
pub struct FakeTranscriber {
    fixed: Option<String>,
}

impl FakeTranscriber {
    pub fn new(fixed: Option<String>) -> Self {
        Self { fixed }
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, audio_url: &str) -> Result<String, JobError> {
        Ok(self.fixed.clone().unwrap_or_else(|| format!("transcript of {audio_url}")))
    }
}

/// Averages `ProcessedContent::sentiment` across the day's items and
/// concatenates entities into `themes`.
pub struct FakeAnalyzer;

#[async_trait]
impl Analyzer for FakeAnalyzer {
    async fn analyze(&self, date: NaiveDate, processed: &[ProcessedContent]) -> Result<DailyAnalysis, JobError> {
        let sentiment = if processed.is_empty() {
            0.0
        } else {
            processed.iter().map(|p| p.sentiment).sum::<f64>() / processed.len() as f64
        };
        let themes: Vec<String> = processed.iter().flat_map(|p| p.entities.clone()).collect();
        Ok(DailyAnalysis {
            id: String::new(),
            date,
            sentiment,
            themes,
            summary: format!("{} items analyzed", processed.len()),
            confidence: if processed.is_empty() { 0.0 } else { 1.0 },
        })
    }
}

/// Emits one fixed-horizon prediction per analysis, carrying the
/// analysis's own sentiment forward as its confidence.
pub struct FakePredictor {
    horizon: String,
}

impl FakePredictor {
    pub fn new(horizon: impl Into<String>) -> Self {
        Self { horizon: horizon.into() }
    }
}

#[async_trait]
impl Predictor for FakePredictor {
    async fn predict(&self, analysis: &DailyAnalysis) -> Result<Vec<Prediction>, JobError> {
        Ok(vec![Prediction {
            analysis_id: analysis.id.clone(),
            prediction_type: "trend".to_string(),
            horizon: self.horizon.clone(),
            text: analysis.summary.clone(),
            confidence: analysis.confidence,
            data: serde_json::json!({ "sentiment": analysis.sentiment }),
            realized_outcome: None,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_feed_adapter_returns_empty_for_unconfigured_source() {
        let adapter = FakeFeedAdapter::new(HashMap::new());
        let items = adapter.fetch("unknown").await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn fake_analyzer_averages_sentiment() {
        let analyzer = FakeAnalyzer;
        let processed = vec![
            ProcessedContent { raw_item_id: "a".into(), sentiment: 1.0, entities: vec![], summary: String::new() },
            ProcessedContent { raw_item_id: "b".into(), sentiment: 0.0, entities: vec![], summary: String::new() },
        ];
        let analysis = analyzer.analyze(chrono::Utc::now().date_naive(), &processed).await.unwrap();
        assert_eq!(analysis.sentiment, 0.5);
    }
}
