//! Errors surfaced by the runtime to producers and callers.
//!
//! Execution failures of individual tasks are not here: those are
//! [`TaskError`](tracklane_core::TaskError) values delivered through the
//! result queue or callbacks.

use thiserror::Error;
use tracklane_core::TaskError;

/// Admission and collection failures of the queue engines.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// No admission slot opened within the admission timeout; try later.
    #[error("queue is full")]
    Full,
    /// The engine has been stopped and accepts no more work.
    #[error("queue is closed")]
    Closed,
    /// No result became available within the requested timeout.
    #[error("no result available")]
    NoResult,
}

/// Connection pool failures, surfaced only to the direct caller of `get`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("timed out waiting for a pooled client")]
    Timeout,
    #[error("pool is closed")]
    Closed,
    #[error("failed to create client: {0}")]
    Create(TaskError),
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

impl From<PoolError> for TaskError {
    fn from(value: PoolError) -> Self {
        match value {
            PoolError::Timeout => TaskError::unavailable("no pooled client available"),
            PoolError::Closed => TaskError::ShutDown,
            PoolError::Create(err) => err,
            PoolError::InvalidConfig(msg) => TaskError::Fatal(msg),
        }
    }
}

impl From<ConfigError> for PoolError {
    fn from(value: ConfigError) -> Self {
        PoolError::InvalidConfig(value.to_string())
    }
}

/// Invalid engine configuration, detected at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration: {field}: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}
