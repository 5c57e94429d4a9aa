use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{JobError, QueueError};
use crate::job::JobHandlerFn;
use crate::types::priority_for_job_type;
use crate::QueueResult;

/// Default handler timeout when a registration doesn't override it.
/// `HANDLER_TIMEOUT_DEFAULT_SEC`, default 300s.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(300);

/// Default `max_attempts` for a job type that doesn't specify one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Cache policy declared by a handler that opts into memoizing its
/// output: the key parts are canonicalized and hashed by
/// `cache::fingerprint`, and a hit short-circuits the handler body.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub ttl: Duration,
}

/// Registration metadata for one job type: the handler itself plus the
/// knobs the worker pool and engine need (`max_attempts` used when a
/// producer doesn't pin one, `timeout` as the per-handler execution
/// budget, `max_concurrency` as the per-type semaphore size).
struct Entry<C> {
    handler: Arc<dyn JobHandlerFn<C>>,
    max_attempts: u32,
    timeout: Duration,
    max_concurrency: usize,
    cache_policy: Option<CachePolicy>,
}

impl<C> Clone for Entry<C> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            max_attempts: self.max_attempts,
            timeout: self.timeout,
            max_concurrency: self.max_concurrency,
            cache_policy: self.cache_policy,
        }
    }
}

/// Handler registry: the closed mapping from job type to `(handler,
/// max_attempts, timeout, max_concurrency, cache_policy)`. Type-erased
/// over the handler's context so the worker pool can dispatch on the
/// `job_type` string alone.
pub struct JobRegistry<C> {
    entries: HashMap<String, Entry<C>>,
}

impl<C: Send + Sync + 'static> JobRegistry<C> {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Register a handler under its own `job_type()`, with defaults
    /// (`max_attempts=3`, `timeout=300s`, `max_concurrency=1`). Errors
    /// if the type is already registered - the registry is a closed
    /// set, not a multimap.
    pub fn register(&mut self, handler: Arc<dyn JobHandlerFn<C>>) -> QueueResult<()> {
        let job_type = handler.job_type().to_string();
        if self.entries.contains_key(&job_type) {
            return Err(QueueError::JobTypeAlreadyRegistered(job_type));
        }
        let timeout = handler.timeout().unwrap_or(DEFAULT_HANDLER_TIMEOUT);
        self.entries.insert(
            job_type,
            Entry {
                handler,
                max_attempts: DEFAULT_MAX_ATTEMPTS,
                timeout,
                max_concurrency: 1,
                cache_policy: None,
            },
        );
        Ok(())
    }

    pub fn with_max_attempts(&mut self, job_type: &str, max_attempts: u32) -> &mut Self {
        if let Some(entry) = self.entries.get_mut(job_type) {
            entry.max_attempts = max_attempts;
        }
        self
    }

    pub fn with_timeout(&mut self, job_type: &str, timeout: Duration) -> &mut Self {
        if let Some(entry) = self.entries.get_mut(job_type) {
            entry.timeout = timeout;
        }
        self
    }

    pub fn with_max_concurrency(&mut self, job_type: &str, max_concurrency: usize) -> &mut Self {
        if let Some(entry) = self.entries.get_mut(job_type) {
            entry.max_concurrency = max_concurrency.max(1);
        }
        self
    }

    pub fn with_cache_policy(&mut self, job_type: &str, policy: CachePolicy) -> &mut Self {
        if let Some(entry) = self.entries.get_mut(job_type) {
            entry.cache_policy = Some(policy);
        }
        self
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.entries.contains_key(job_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn max_attempts(&self, job_type: &str) -> u32 {
        self.entries.get(job_type).map(|e| e.max_attempts).unwrap_or(DEFAULT_MAX_ATTEMPTS)
    }

    pub fn timeout(&self, job_type: &str) -> Duration {
        self.entries.get(job_type).map(|e| e.timeout).unwrap_or(DEFAULT_HANDLER_TIMEOUT)
    }

    pub fn max_concurrency(&self, job_type: &str) -> usize {
        self.entries.get(job_type).map(|e| e.max_concurrency).unwrap_or(1)
    }

    pub fn cache_policy(&self, job_type: &str) -> Option<CachePolicy> {
        self.entries.get(job_type).and_then(|e| e.cache_policy)
    }

    pub fn priority(&self, job_type: &str) -> crate::types::Priority {
        priority_for_job_type(job_type)
    }

    /// Dispatch a payload to the registered handler under its context.
    /// An unknown `job_type` is a permanent error, not a transient one
    /// - there is no retry path that would make it resolve.
    pub async fn dispatch(&self, job_type: &str, payload: Value, ctx: C) -> Result<Value, JobError> {
        let entry = self
            .entries
            .get(job_type)
            .ok_or_else(|| JobError::permanent(format!("unknown job type: {job_type}")))?
            .clone();
        entry.handler.handle(payload, ctx).await
    }
}

impl<C: Send + Sync + 'static> Default for JobRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FnHandler;

    fn noop_handler(job_type: &'static str) -> Arc<dyn JobHandlerFn<()>> {
        Arc::new(FnHandler::new(job_type, |payload: Value, _ctx: ()| async move {
            Ok(payload)
        }))
    }

    #[test]
    fn register_rejects_duplicate_job_type() {
        let mut registry: JobRegistry<()> = JobRegistry::new();
        registry.register(noop_handler("cleanup")).unwrap();
        let err = registry.register(noop_handler("cleanup")).unwrap_err();
        assert!(matches!(err, QueueError::JobTypeAlreadyRegistered(_)));
    }

    #[test]
    fn unset_job_type_falls_back_to_defaults() {
        let registry: JobRegistry<()> = JobRegistry::new();
        assert_eq!(registry.max_attempts("unknown"), DEFAULT_MAX_ATTEMPTS);
        assert_eq!(registry.timeout("unknown"), DEFAULT_HANDLER_TIMEOUT);
        assert_eq!(registry.max_concurrency("unknown"), 1);
    }

    #[tokio::test]
    async fn dispatch_routes_to_registered_handler() {
        let mut registry: JobRegistry<()> = JobRegistry::new();
        registry.register(noop_handler("cleanup")).unwrap();
        registry.with_max_concurrency("cleanup", 4);
        assert_eq!(registry.max_concurrency("cleanup"), 4);

        let result = registry.dispatch("cleanup", serde_json::json!({"ok": true}), ()).await.unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn dispatch_unknown_type_is_permanent() {
        let registry: JobRegistry<()> = JobRegistry::new();
        let err = registry.dispatch("ghost", serde_json::json!({}), ()).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
