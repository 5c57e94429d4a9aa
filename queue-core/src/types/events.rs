use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobId;

/// Stable event protocol broadcast for observability - the reaper's
/// gauge metrics and the management API's live feed both ride this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    Enqueued {
        job_id: JobId,
        job_type: String,
        at: DateTime<Utc>,
    },
    Processing {
        job_id: JobId,
        worker_id: String,
        at: DateTime<Utc>,
    },
    Retrying {
        job_id: JobId,
        scheduled_at: DateTime<Utc>,
        error: String,
        at: DateTime<Utc>,
    },
    Completed {
        job_id: JobId,
        at: DateTime<Utc>,
    },
    Failed {
        job_id: JobId,
        error: String,
        at: DateTime<Utc>,
    },
    Cancelled {
        job_id: JobId,
        at: DateTime<Utc>,
    },
    Reaped {
        job_id: JobId,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Processing { .. } => "processing",
            Self::Retrying { .. } => "retrying",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
            Self::Reaped { .. } => "reaped",
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Enqueued { job_id, .. }
            | Self::Processing { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::Cancelled { job_id, .. }
            | Self::Reaped { job_id, .. } => job_id,
        }
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Enqueued { at, .. }
            | Self::Processing { at, .. }
            | Self::Retrying { at, .. }
            | Self::Completed { at, .. }
            | Self::Failed { at, .. }
            | Self::Cancelled { at, .. }
            | Self::Reaped { at, .. } => at,
        }
    }
}
