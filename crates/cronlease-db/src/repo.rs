//! Store traits and implementations.

pub mod job;

pub use job::{JobRecord, JobStore, NewJob, PgJobStore};
