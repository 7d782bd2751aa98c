//! Error types for cronlease.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("handler not found: {0}")]
    HandlerNotFound(String),

    #[error("invalid schedule '{expression}': {message}")]
    InvalidSchedule { expression: String, message: String },

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
