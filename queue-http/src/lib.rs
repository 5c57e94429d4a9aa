//! JSON management API over `queue-core`: queue stats, job listing,
//! single-job retry/cancel/reset/delete, pool pause/resume, and
//! terminal-status clearing. Mounted at `/api/v1/queue`. Every response
//! uses the envelope `{success, data?, error?, meta?}`; authentication
//! is left to whatever sits in front of this router.

pub mod app;
pub mod error;
pub mod rest;
pub mod state;

pub use app::build_router;
pub use error::ApiError;
pub use state::AppState;
