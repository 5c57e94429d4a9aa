//! In-memory `ContentStore` test double, in the same
//! `parking_lot::RwLock<HashMap<..>>` shape `MemoryBackend` and
//! `MemoryCache` use. Not meant for production: every row lives only
//! as long as the process.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::JobError;

use super::model::*;
use super::traits::ContentStore;

#[derive(Default)]
struct State {
    raw_items: HashMap<String, RawFeedItem>,
    /// `(source_id, external_id) -> raw_item_id`, for upsert dedup.
    seen_external_ids: HashMap<(String, String), String>,
    processed: HashMap<String, ProcessedContent>,
    analyses: HashMap<String, DailyAnalysis>,
    /// `date -> analysis_id`, so a `force` re-run overwrites in place.
    analyses_by_date: HashMap<NaiveDate, String>,
    predictions: Vec<Prediction>,
    source_last_processed: HashMap<String, chrono::DateTime<chrono::Utc>>,
}

/// In-memory `ContentStore`. Cheap to construct; share one instance
/// across a `PipelineContext` via `Arc`.
pub struct MemoryContentStore {
    state: RwLock<State>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self { state: RwLock::new(State::default()) }
    }
}

impl Default for MemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn upsert_raw_items(
        &self,
        source_id: &str,
        items: Vec<FetchedItem>,
    ) -> Result<Vec<RawFeedItem>, JobError> {
        let mut state = self.state.write();
        let mut inserted = Vec::new();
        for item in items {
            let dedup_key = (source_id.to_string(), item.external_id.clone());
            if state.seen_external_ids.contains_key(&dedup_key) {
                continue;
            }
            let id = Uuid::new_v4().to_string();
            let status =
                if item.audio_url.is_some() { RawItemStatus::AwaitingTranscription } else { RawItemStatus::Pending };
            let raw_item = RawFeedItem {
                id: id.clone(),
                source_id: source_id.to_string(),
                external_id: item.external_id,
                title: item.title,
                published_at: item.published_at,
                body: item.body,
                audio_url: item.audio_url,
                transcript: None,
                processing_status: status,
            };
            state.seen_external_ids.insert(dedup_key, id.clone());
            state.raw_items.insert(id, raw_item.clone());
            inserted.push(raw_item);
        }
        Ok(inserted)
    }

    async fn get_raw_item(&self, raw_item_id: &str) -> Result<RawFeedItem, JobError> {
        self.state
            .read()
            .raw_items
            .get(raw_item_id)
            .cloned()
            .ok_or_else(|| JobError::permanent(format!("raw item not found: {raw_item_id}")))
    }

    async fn store_transcript(&self, raw_item_id: &str, transcript: String) -> Result<(), JobError> {
        let mut state = self.state.write();
        let item = state
            .raw_items
            .get_mut(raw_item_id)
            .ok_or_else(|| JobError::permanent(format!("raw item not found: {raw_item_id}")))?;
        item.transcript = Some(transcript);
        Ok(())
    }

    async fn mark_raw_item_processed(&self, raw_item_id: &str) -> Result<(), JobError> {
        let mut state = self.state.write();
        let item = state
            .raw_items
            .get_mut(raw_item_id)
            .ok_or_else(|| JobError::permanent(format!("raw item not found: {raw_item_id}")))?;
        item.processing_status = RawItemStatus::Completed;
        Ok(())
    }

    async fn store_processed_content(&self, content: ProcessedContent) -> Result<(), JobError> {
        self.state.write().processed.insert(content.raw_item_id.clone(), content);
        Ok(())
    }

    async fn processed_content_for_date(&self, date: NaiveDate) -> Result<Vec<ProcessedContent>, JobError> {
        let state = self.state.read();
        let ids_for_date: Vec<&str> = state
            .raw_items
            .values()
            .filter(|item| item.published_at.date_naive() == date)
            .map(|item| item.id.as_str())
            .collect();
        Ok(ids_for_date.into_iter().filter_map(|id| state.processed.get(id).cloned()).collect())
    }

    async fn store_analysis(&self, analysis: DailyAnalysis) -> Result<String, JobError> {
        let mut state = self.state.write();
        let id = state.analyses_by_date.get(&analysis.date).cloned().unwrap_or(analysis.id.clone());
        let mut analysis = analysis;
        analysis.id = id.clone();
        state.analyses_by_date.insert(analysis.date, id.clone());
        state.analyses.insert(id.clone(), analysis);
        Ok(id)
    }

    async fn get_analysis(&self, analysis_id: &str) -> Result<DailyAnalysis, JobError> {
        self.state
            .read()
            .analyses
            .get(analysis_id)
            .cloned()
            .ok_or_else(|| JobError::permanent(format!("analysis not found: {analysis_id}")))
    }

    async fn store_predictions(&self, predictions: Vec<Prediction>) -> Result<(), JobError> {
        self.state.write().predictions.extend(predictions);
        Ok(())
    }

    async fn matured_predictions(&self, horizon: &str) -> Result<Vec<Prediction>, JobError> {
        Ok(self.state.read().predictions.iter().filter(|p| p.horizon == horizon).cloned().collect())
    }

    async fn record_comparison(
        &self,
        analysis_id: &str,
        prediction_type: &str,
        outcome: serde_json::Value,
    ) -> Result<(), JobError> {
        let mut state = self.state.write();
        if let Some(prediction) =
            state.predictions.iter_mut().find(|p| p.analysis_id == analysis_id && p.prediction_type == prediction_type)
        {
            prediction.realized_outcome = Some(outcome);
        }
        Ok(())
    }

    async fn mark_source_processed(&self, source_id: &str) -> Result<(), JobError> {
        self.state.write().source_last_processed.insert(source_id.to_string(), chrono::Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(external_id: &str) -> FetchedItem {
        FetchedItem {
            external_id: external_id.to_string(),
            title: "title".to_string(),
            published_at: chrono::Utc::now(),
            body: "body".to_string(),
            audio_url: None,
        }
    }

    #[tokio::test]
    async fn upsert_skips_already_seen_external_ids() {
        let store = MemoryContentStore::new();
        let first = store.upsert_raw_items("source-a", vec![item("ext-1")]).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = store.upsert_raw_items("source-a", vec![item("ext-1"), item("ext-2")]).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].external_id, "ext-2");
    }

    #[tokio::test]
    async fn store_analysis_overwrites_same_date() {
        let store = MemoryContentStore::new();
        let date = chrono::Utc::now().date_naive();

        let first_id = store
            .store_analysis(DailyAnalysis {
                id: "ignored".to_string(),
                date,
                sentiment: 0.1,
                themes: vec![],
                summary: "first".to_string(),
                confidence: 0.5,
            })
            .await
            .unwrap();

        let second_id = store
            .store_analysis(DailyAnalysis {
                id: "ignored-too".to_string(),
                date,
                sentiment: 0.9,
                themes: vec![],
                summary: "second".to_string(),
                confidence: 0.9,
            })
            .await
            .unwrap();

        assert_eq!(first_id, second_id);
        let stored = store.get_analysis(&first_id).await.unwrap();
        assert_eq!(stored.summary, "second");
    }
}
