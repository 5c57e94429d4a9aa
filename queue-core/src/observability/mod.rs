pub mod metrics;

pub use metrics::{GlobalMetrics, LiveMetrics, MetricsCollector, PerformanceMetrics};

use std::sync::Arc;

use futures::StreamExt;

use crate::backend::BoxStream;
use crate::types::JobEvent;

/// Wires a backend's `event_stream()` into `LiveMetrics`, counting
/// every transition as it is broadcast. Spawn `watch()` once per
/// process; it runs until the backend's broadcaster is dropped.
pub struct ObservabilityLayer {
    metrics: Arc<LiveMetrics>,
}

impl ObservabilityLayer {
    pub fn new() -> Self {
        Self { metrics: Arc::new(LiveMetrics::new()) }
    }

    pub fn metrics(&self) -> &Arc<LiveMetrics> {
        &self.metrics
    }

    /// Spawn a task that folds every event from `stream` into the
    /// metrics counters. Returns the `JoinHandle` so callers can shut
    /// it down alongside the rest of the process.
    pub fn watch(&self, mut stream: BoxStream<JobEvent>) -> tokio::task::JoinHandle<()> {
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                metrics.record(&event);
            }
        })
    }
}

impl Default for ObservabilityLayer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{memory::MemoryBackend, QueueBackend};
    use crate::types::{JobMessage, Priority};

    #[tokio::test]
    async fn watch_counts_enqueue_events() {
        let backend = MemoryBackend::new();
        let observability = ObservabilityLayer::new();
        let handle = observability.watch(backend.event_stream());

        backend
            .enqueue(JobMessage::new("cleanup", serde_json::json!({})).with_priority(Priority::default()))
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(observability.metrics().jobs_enqueued(), 1);
        handle.abort();
    }
}
