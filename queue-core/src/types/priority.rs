use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Job priority, 1..=10. Lower value dequeues earlier; `1` is highest.
/// A plain integer range with a derived `Ord`: ascending order already
/// matches dequeue order, so no `Reverse` wrapper is needed anywhere
/// this gets sorted or compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(u8);

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;
pub const DEFAULT_PRIORITY: u8 = 5;

impl Priority {
    /// Construct a priority, validating the 1..=10 range.
    pub fn new(value: u8) -> Result<Self, QueueError> {
        if (MIN_PRIORITY..=MAX_PRIORITY).contains(&value) {
            Ok(Self(value))
        } else {
            Err(QueueError::InvalidPriority(value))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(DEFAULT_PRIORITY)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for Priority {
    type Error = QueueError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// The fixed priority assigned to each built-in job type.
pub fn priority_for_job_type(job_type: &str) -> Priority {
    let value = match job_type {
        "feed_fetch" => 1,
        "content_process" => 2,
        "daily_analysis" => 1,
        "generate_predictions" => 3,
        "podcast_transcription" => 4,
        "prediction_compare" => 5,
        "cleanup" => 10,
        _ => DEFAULT_PRIORITY,
    };
    Priority::new(value).expect("built-in priorities are within 1..=10")
}
