//! Job execution backends for cronlease.
//!
//! Provides executor implementations for running scheduled jobs:
//! - In-process handlers keyed by job name
//! - Shell commands taken from the job's config payload

pub mod local;
pub mod shell;

pub use cronlease_core::executor::Executor;
pub use local::{Handler, LocalExecutor};
pub use shell::ShellExecutor;

#[cfg(test)]
pub(crate) mod testing {
    use chrono::Utc;
    use cronlease_core::{Job, JobId, JobStatus};

    pub fn make_job(name: &str, cfg: &str) -> Job {
        let now = Utc::now();
        Job {
            id: JobId::new(1),
            name: name.to_string(),
            cfg: cfg.to_string(),
            executor: "local".to_string(),
            expression: "*/10 * * * * ?".to_string(),
            status: JobStatus::Running,
            next_time: now,
            heartbeat: now,
            epoch: 1,
            created_at: now,
            updated_at: now,
        }
    }
}
