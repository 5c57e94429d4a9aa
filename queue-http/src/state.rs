use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use queue_core::backend::QueueBackend;
use queue_core::engine::QueueEngine;

/// Shared state for the management router. Generic over the backend so
/// the same handlers serve a `MemoryBackend`-backed engine in tests and
/// a `PostgresBackend`-backed one in production.
pub struct AppState<B: QueueBackend + 'static> {
    pub engine: Arc<QueueEngine<B>>,
    /// Shared with the embedding process's `WorkerPool::paused_flag()`.
    /// `/queue/pause` and `/queue/resume` flip this directly; the pool
    /// reads it before every dequeue.
    pub paused: Arc<AtomicBool>,
}

impl<B: QueueBackend + 'static> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self { engine: Arc::clone(&self.engine), paused: Arc::clone(&self.paused) }
    }
}

impl<B: QueueBackend + 'static> AppState<B> {
    pub fn new(engine: Arc<QueueEngine<B>>, paused: Arc<AtomicBool>) -> Self {
        Self { engine, paused }
    }

    /// Convenience constructor for an embedding process with no worker
    /// pool of its own (e.g. a standalone management UI against a
    /// shared Postgres backend); pause/resume then only affects pools
    /// that were handed the same `Arc`.
    pub fn standalone(engine: Arc<QueueEngine<B>>) -> Self {
        Self::new(engine, Arc::new(AtomicBool::new(false)))
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}
