pub mod events;
pub mod ids;
pub mod message;
pub mod priority;
pub mod record;

pub use events::JobEvent;
pub use ids::{JobId, WorkerId};
pub use message::{JobMessage, MAX_PAYLOAD_BYTES};
pub use priority::{priority_for_job_type, Priority};
pub use record::{JobRecord, JobStatus};
