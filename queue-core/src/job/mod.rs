//! Handler registry: the closed mapping from job type to its handler,
//! retry policy, timeout, and concurrency limit. A single async-closure
//! interface over `serde_json::Value` - handlers here are plain async
//! functions, not a zero-copy/resource-tracked execution model.

pub mod registry;

pub use registry::{CachePolicy, JobRegistry};

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::JobError;

/// One of the closed set of job types (`feed_fetch`, `content_process`,
/// `podcast_transcription`, `daily_analysis`, `generate_predictions`,
/// `prediction_compare`, `cleanup`). A handler receives the enqueued
/// payload already decoded from JSON and an application-supplied
/// context carrying whatever collaborators it needs (feed clients, an
/// LLM client, a database pool, ...).
#[async_trait]
pub trait JobHandlerFn<C>: Send + Sync {
    /// Static identifier used for dispatch and for the priority table
    /// in `types::priority::priority_for_job_type`.
    fn job_type(&self) -> &'static str;

    /// Per-handler execution budget, overridable per job type. `None`
    /// defers to the pool's `HANDLER_TIMEOUT_DEFAULT_SEC`.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn handle(&self, payload: Value, ctx: C) -> Result<Value, JobError>;
}

/// Adapter that turns any `async fn(Value, C) -> Result<Value,
/// JobError>` plus a job type string into a `JobHandlerFn`, so
/// producers/tests can register closures instead of writing out a
/// struct + impl for every handler.
pub struct FnHandler<C, F> {
    job_type: &'static str,
    timeout: Option<Duration>,
    func: F,
    _marker: std::marker::PhantomData<fn(C)>,
}

impl<C, F> FnHandler<C, F> {
    pub fn new(job_type: &'static str, func: F) -> Self {
        Self { job_type, timeout: None, func, _marker: std::marker::PhantomData }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl<C, F, Fut> JobHandlerFn<C> for FnHandler<C, F>
where
    C: Send + Sync + 'static,
    F: Fn(Value, C) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, JobError>> + Send,
{
    fn job_type(&self) -> &'static str {
        self.job_type
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn handle(&self, payload: Value, ctx: C) -> Result<Value, JobError> {
        (self.func)(payload, ctx).await
    }
}
