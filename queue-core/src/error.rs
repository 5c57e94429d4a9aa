use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure-level errors: fatal and structural failures that are
/// not a handler's outcome.
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("priority {0} out of range 1..=10")]
    InvalidPriority(u8),

    /// Returned by `complete`/`fail` when the caller's `worker_id`
    /// does not match the row's current holder.
    #[error("worker does not hold this job")]
    WorkerMismatch,

    #[error("job is not in processing state")]
    JobNotProcessing,

    #[error("job has been canceled")]
    JobCanceled,

    #[error("job is already in a terminal state")]
    JobAlreadyTerminal,

    #[error("job execution failed: {0}")]
    JobFailed(#[from] JobError),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("backend does not support feature: {0}")]
    BackendUnsupported(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("job type not registered: {0}")]
    JobTypeNotRegistered(String),

    #[error("job type already registered: {0}")]
    JobTypeAlreadyRegistered(String),

    #[error("worker pool is shutting down")]
    WorkerShutdown,

    #[error("store error: {0}")]
    Store(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Handler execution outcome - determines retry behavior. A transient
/// failure maps to `Retryable`; a permanent data problem maps to
/// `Permanent`. Handler timeouts are also surfaced as `Retryable`;
/// semaphore exhaustion is never an error (the job simply waits its
/// turn behind the per-type limit).
#[derive(Error, Debug, Clone)]
pub enum JobError {
    #[error("retryable error: {0}")]
    Retryable(String),

    #[error("permanent error: {0}")]
    Permanent(String),
}

/// Upper bound on the length of a diagnostic persisted to
/// `jobs.error_message`.
pub const MAX_ERROR_MESSAGE_BYTES: usize = 2048;

impl JobError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }

    /// Truncate to `MAX_ERROR_MESSAGE_BYTES` on a UTF-8 boundary before
    /// the message is persisted as `jobs.error_message`.
    pub fn truncated_message(&self) -> String {
        truncate_diagnostic(self.message())
    }
}

pub fn truncate_diagnostic(message: &str) -> String {
    if message.len() <= MAX_ERROR_MESSAGE_BYTES {
        return message.to_string();
    }
    let mut end = MAX_ERROR_MESSAGE_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &message[..end])
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_diagnostics() {
        let long = "x".repeat(MAX_ERROR_MESSAGE_BYTES + 500);
        let truncated = truncate_diagnostic(&long);
        assert!(truncated.len() <= MAX_ERROR_MESSAGE_BYTES + 3);
    }

    #[test]
    fn leaves_short_diagnostics_untouched() {
        assert_eq!(truncate_diagnostic("ETIMEDOUT"), "ETIMEDOUT");
    }
}
