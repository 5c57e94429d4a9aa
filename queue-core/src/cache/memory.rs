use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;

use super::{Cache, CacheEntry};
use crate::error::QueueResult;

/// In-memory `Cache` for tests and the `memory` feature's standalone
/// mode, mirroring `MemoryBackend`'s `RwLock<HashMap<_>>` shape.
#[derive(Default)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> QueueResult<Option<Value>> {
        let now = Utc::now();
        Ok(self
            .entries
            .read()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl: std::time::Duration) -> QueueResult<()> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(0));
        self.entries.write().insert(
            key.to_string(),
            CacheEntry { key: key.to_string(), value, expires_at },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> QueueResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn cleanup(&self) -> QueueResult<usize> {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_entries_are_treated_as_absent() {
        let cache = MemoryCache::new();
        cache
            .set("k", serde_json::json!({"v": 1}), std::time::Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cleanup_sweeps_expired_entries() {
        let cache = MemoryCache::new();
        cache
            .set("k", serde_json::json!(1), std::time::Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(cache.cleanup().await.unwrap(), 1);
    }
}
