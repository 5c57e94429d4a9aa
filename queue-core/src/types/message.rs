use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Priority;

/// Maximum payload size accepted at enqueue time. Payloads larger than
/// 64 KiB are rejected at enqueue time.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Immutable submission data for a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    /// Job type identifier for dispatch; drawn from the closed
    /// handler registry.
    pub job_type: String,

    /// Structured JSON payload, schema defined per `job_type`.
    pub payload: Value,

    /// Queue ordering priority, 1..=10, lower dequeues earlier.
    pub priority: Priority,

    /// Maximum attempts before the job becomes permanently `failed`.
    pub max_attempts: u32,

    /// Earliest time the job is eligible for dequeue.
    pub scheduled_at: DateTime<Utc>,

    /// Suppresses duplicate enqueues of the same `(job_type, dedup_key)`
    /// while an open row already exists.
    pub dedup_key: Option<String>,
}

impl JobMessage {
    pub fn new(job_type: impl Into<String>, payload: Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            priority: Priority::default(),
            max_attempts: 3,
            scheduled_at: Utc::now(),
            dedup_key: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay dequeue eligibility by `delay` from now.
    pub fn with_delay(mut self, delay: chrono::Duration) -> Self {
        self.scheduled_at = Utc::now() + delay;
        self
    }

    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.scheduled_at = scheduled_at;
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn is_eligible(&self) -> bool {
        self.scheduled_at <= Utc::now()
    }

    pub fn payload_size(&self) -> usize {
        self.payload.to_string().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligibility_respects_scheduled_at() {
        let future = JobMessage::new("cleanup", serde_json::json!({}))
            .with_delay(chrono::Duration::seconds(60));
        assert!(!future.is_eligible());

        let now = JobMessage::new("cleanup", serde_json::json!({}));
        assert!(now.is_eligible());
    }
}
