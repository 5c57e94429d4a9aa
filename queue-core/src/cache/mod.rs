//! Content-addressed cache for memoizing deterministic handler output.
//! The in-memory variant reuses the same `parking_lot::RwLock`-guarded
//! map shape `MemoryBackend` uses for job rows; the Postgres variant
//! follows the same raw-`sqlx::query` style as the job backend.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::QueueResult;

/// Keyed, TTL'd store for memoizing deterministic expensive
/// computations (AI calls, transcription, feed HTTP responses).
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the value iff `now < expires_at`; an expired entry is
    /// treated as absent.
    async fn get(&self, key: &str) -> QueueResult<Option<Value>>;

    /// Overwrites any existing entry for `key`.
    async fn set(&self, key: &str, value: Value, ttl: std::time::Duration) -> QueueResult<()>;

    async fn delete(&self, key: &str) -> QueueResult<()>;

    /// Idempotent sweep of expired entries; returns the count removed.
    /// Invoked on a schedule by the reaper.
    async fn cleanup(&self) -> QueueResult<usize>;
}

/// Hex digest of a canonical serialization of the handler-declared
/// cache key parts. `job_type` plus every `(key, value)` pair is
/// inserted into a `serde_json::Map`, which without the `preserve_order`
/// feature is a `BTreeMap` - so the rendered JSON is already sorted by
/// key, making the digest independent of `parts`' input order.
pub fn fingerprint(job_type: &str, parts: &[(&str, &Value)]) -> String {
    let mut map = serde_json::Map::new();
    map.insert("job_type".to_string(), Value::String(job_type.to_string()));
    for (key, value) in parts {
        map.insert((*key).to_string(), (*value).clone());
    }
    let canonical = Value::Object(map).to_string();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A cache entry as persisted: `cache(key, value_json, expires_at)`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}
