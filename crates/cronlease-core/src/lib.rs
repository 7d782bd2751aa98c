//! Core domain types and traits for cronlease.
//!
//! This crate contains:
//! - The job entity and its lease state machine
//! - Cron schedule evaluation
//! - The executor capability trait
//! - The shared error taxonomy

pub mod error;
pub mod executor;
pub mod id;
pub mod job;

pub use error::{Error, Result};
pub use executor::Executor;
pub use id::JobId;
pub use job::{Job, JobStatus, parse_schedule};
