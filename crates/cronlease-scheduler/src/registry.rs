//! Executor registry.
//!
//! Built before the scheduler starts and moved into it afterwards, so
//! lookups during scheduling need no synchronization.

use cronlease_core::Executor;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps executor-kind keys to executors.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `kind` with `executor`, returning the executor it replaced.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        executor: Arc<dyn Executor>,
    ) -> Option<Arc<dyn Executor>> {
        self.executors.insert(kind.into(), executor)
    }

    /// Register an executor under its own name.
    pub fn register_executor<E: Executor + 'static>(&mut self, executor: E) -> &mut Self {
        let kind = executor.name().to_string();
        self.executors.insert(kind, Arc::new(executor));
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(kind).cloned()
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
