//! Executor capability.
//!
//! An executor knows how to run the business logic behind a job. The
//! scheduler looks executors up by the job's executor-kind key and hands
//! them the claimed job together with the instant at which the attempt is
//! abandoned.

use async_trait::async_trait;
use tokio::time::Instant;

use crate::{Job, Result};

/// Trait for job executors.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name of this executor, used as the default registry key.
    fn name(&self) -> &str;

    /// Run one attempt of `job`.
    ///
    /// The scheduler stops polling the returned future at `deadline`, so
    /// implementations that hold external resources should release them on
    /// drop.
    async fn exec(&self, deadline: Instant, job: &Job) -> Result<()>;
}
