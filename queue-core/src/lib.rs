//! Durable, database-backed job orchestration: a priority queue with
//! delayed visibility, at-most-once dequeue under concurrency, typed
//! worker dispatch with per-type concurrency and timeouts, a
//! dependency-driven pipeline of job-emitting handlers, a stuck-job
//! reaper, retry/backoff, deduplication, and a content-addressed cache
//! for memoizing expensive deterministic work.
//!
//! The crate ships one storage-agnostic engine (`engine::QueueEngine`)
//! over a `backend::QueueBackend` trait, with an in-memory
//! implementation always available (`memory` feature, default-on) and
//! a Postgres-backed one behind the `postgres` feature.
//!
//! ```no_run
//! use std::sync::Arc;
//! use queue_core::backend::memory::MemoryBackend;
//! use queue_core::engine::QueueEngine;
//! use queue_core::job::{FnHandler, JobRegistry};
//! use queue_core::adapter::{WorkerPool, WorkerPoolConfig};
//!
//! # async fn run() -> queue_core::error::QueueResult<()> {
//! let engine = Arc::new(QueueEngine::new(MemoryBackend::new()));
//!
//! let mut registry: JobRegistry<()> = JobRegistry::new();
//! registry.register(Arc::new(FnHandler::new("cleanup", |payload, _ctx: ()| async move {
//!     Ok(payload)
//! })))?;
//!
//! let pool = WorkerPool::new(Arc::clone(&engine), Arc::new(registry), (), WorkerPoolConfig::default());
//! let _handle = pool.spawn();
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod backend;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod observability;
pub mod pipeline;
pub mod producers;
pub mod reaper;
pub mod types;

pub use adapter::{WorkerPool, WorkerPoolConfig, WorkerPoolHandle};
pub use backend::QueueBackend;
pub use cache::Cache;
pub use config::QueueConfig;
pub use engine::QueueEngine;
pub use error::{JobError, QueueError, QueueResult};
pub use job::{FnHandler, JobHandlerFn, JobRegistry};
pub use observability::{LiveMetrics, ObservabilityLayer};
pub use pipeline::{register_all, CleanupPolicy, PipelineContext};
pub use producers::{FeedSourceCatalog, ProducerConfig, Producers};
pub use reaper::{Reaper, ReaperConfig, ReaperReport};
pub use types::{JobEvent, JobId, JobMessage, JobRecord, JobStatus, Priority, WorkerId};

#[cfg(feature = "postgres")]
pub use backend::postgres::PostgresBackend;

#[cfg(feature = "postgres")]
pub use cache::postgres::PostgresCache;

/// Common imports for applications embedding the queue.
pub mod prelude {
    pub use crate::adapter::{WorkerPool, WorkerPoolConfig};
    pub use crate::backend::memory::MemoryBackend;
    pub use crate::backend::QueueBackend;
    pub use crate::engine::QueueEngine;
    pub use crate::error::{JobError, QueueError, QueueResult};
    pub use crate::job::{FnHandler, JobHandlerFn, JobRegistry};
    pub use crate::pipeline::{
        Analyzer, CleanupPolicy, ContentProcessor, ContentStore, FeedAdapter, MemoryContentStore, PipelineContext,
        Predictor, Transcriber,
    };
    pub use crate::types::{JobEvent, JobId, JobMessage, JobRecord, JobStatus, Priority, WorkerId};
    pub use async_trait::async_trait;
}
