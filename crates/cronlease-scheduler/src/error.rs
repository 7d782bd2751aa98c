//! Scheduler error types.

use cronlease_core::JobId;
use cronlease_db::DbError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] DbError),

    #[error("preemption did not finish within {0:?}")]
    PreemptTimeout(Duration),

    #[error("job {0} is no longer held by this lease")]
    LeaseLost(JobId),
}

impl SchedulerError {
    /// Whether the poll loop should simply back off and try again.
    pub fn is_transient(&self) -> bool {
        match self {
            SchedulerError::Store(e) => e.is_transient(),
            SchedulerError::PreemptTimeout(_) => true,
            SchedulerError::LeaseLost(_) => false,
        }
    }
}
