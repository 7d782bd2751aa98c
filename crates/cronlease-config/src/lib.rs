//! KDL configuration parsing for cronlease.
//!
//! This crate handles parsing of:
//! - Worker configuration (database, executors)
//! - Scheduler timing (poll, lease and recovery intervals)
//! - Human-readable durations

pub mod duration;
pub mod error;
pub mod worker;

pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
pub use worker::{
    ExecutorsConfig, SchedulerConfig, ShellConfig, WorkerConfig, load_worker_config,
    parse_worker_config,
};
