//! In-process executor.
//!
//! Dispatches on the job's name to a handler registered before the
//! scheduler starts.

use async_trait::async_trait;
use cronlease_core::{Error, Executor, Job, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// A registered job handler.
pub type Handler = Arc<dyn Fn(Instant, Job) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Executor that runs async functions registered by job name.
#[derive(Default, Clone)]
pub struct LocalExecutor {
    handlers: HashMap<String, Handler>,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for the job called `name`, replacing any previous one.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Instant, Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |deadline, job| f(deadline, job).boxed());
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Builder-style variant of `register_fn`.
    pub fn with_fn<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Instant, Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register_fn(name, f);
        self
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

impl std::fmt::Debug for LocalExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalExecutor")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn name(&self) -> &str {
        "local"
    }

    async fn exec(&self, deadline: Instant, job: &Job) -> Result<()> {
        let handler = self
            .handlers
            .get(&job.name)
            .cloned()
            .ok_or_else(|| Error::HandlerNotFound(job.name.clone()))?;

        debug!(job_id = %job.id, job = %job.name, "Running local handler");
        handler(deadline, job.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::make_job;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_dispatches_by_job_name() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let executor = LocalExecutor::new().with_fn("daily-report", move |_, job| {
            let counter = counter.clone();
            async move {
                assert_eq!(job.cfg, "{\"recipients\":3}");
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let deadline = Instant::now() + Duration::from_secs(60);
        executor
            .exec(deadline, &make_job("daily-report", "{\"recipients\":3}"))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(executor.name(), "local");
    }

    #[tokio::test]
    async fn test_missing_handler() {
        let executor = LocalExecutor::new();
        let deadline = Instant::now() + Duration::from_secs(60);
        let err = executor
            .exec(deadline, &make_job("weekly-digest", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HandlerNotFound(name) if name == "weekly-digest"));
    }

    #[tokio::test]
    async fn test_handler_error_is_returned() {
        let executor = LocalExecutor::new().with_fn("flaky", |_, _| async {
            Err(Error::ExecutionFailed("upstream returned 503".to_string()))
        });
        let deadline = Instant::now() + Duration::from_secs(60);
        let err = executor
            .exec(deadline, &make_job("flaky", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed(_)));
    }

    #[test]
    fn test_register_replaces_handler() {
        let mut executor = LocalExecutor::new();
        executor
            .register_fn("a", |_, _| async { Ok(()) })
            .register_fn("a", |_, _| async { Ok(()) });
        assert!(executor.has_handler("a"));
        assert!(!executor.has_handler("b"));
        assert_eq!(executor.handlers.len(), 1);
    }
}
