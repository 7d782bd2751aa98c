//! Observable scheduler events.

use chrono::{DateTime, Utc};
use cronlease_core::JobId;
use std::time::Duration;

/// How one execution attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    /// The executor returned an error.
    Failed(String),
    /// The execution deadline elapsed first.
    TimedOut,
    /// The executor panicked.
    Panicked(String),
    /// The claim was taken away while the executor ran.
    LeaseLost,
}

impl ExecutionOutcome {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Succeeded => "succeeded",
            ExecutionOutcome::Failed(_) => "failed",
            ExecutionOutcome::TimedOut => "timed_out",
            ExecutionOutcome::Panicked(_) => "panicked",
            ExecutionOutcome::LeaseLost => "lease_lost",
        }
    }
}

/// Event emitted by a scheduler, its leases and its reaper.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A poll found no due waiting job.
    NoJobDue,
    /// A poll failed; the loop backs off and retries.
    PollFailed { error: String, transient: bool },
    Claimed { job_id: JobId, name: String },
    /// No executor is registered for the claimed job's kind.
    ExecutorMissing { job_id: JobId, kind: String },
    ExecutionFinished {
        job_id: JobId,
        outcome: ExecutionOutcome,
        elapsed: Duration,
    },
    Released {
        job_id: JobId,
        next_time: DateTime<Utc>,
    },
    ReleaseFailed { job_id: JobId, error: String },
    /// A heartbeat found the claim no longer held.
    HeartbeatLost { job_id: JobId },
    /// Orphaned jobs were forced back to waiting.
    Reclaimed { job_ids: Vec<JobId> },
}
