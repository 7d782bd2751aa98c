//! Fleet-wide cron scheduling for cronlease.
//!
//! Every worker runs the same [`Scheduler`]. Workers coordinate only through
//! the job table: a due job is claimed with a conditional update, held with a
//! heartbeating [`Lease`] while it runs, and released with its next fire time.
//! Jobs left running by dead workers are recovered by the [`OrphanReaper`].

pub mod error;
pub mod event;
pub mod lease;
pub mod preempt;
pub mod reaper;
pub mod registry;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use error::SchedulerError;
pub use event::{ExecutionOutcome, SchedulerEvent};
pub use lease::{Lease, LeaseManager};
pub use preempt::PreemptionEngine;
pub use reaper::OrphanReaper;
pub use registry::ExecutorRegistry;
pub use scheduler::{PollOutcome, Scheduler};
