//! Seams of the worker-pool engine: what runs, how it runs, and where the
//! terminal outcome goes.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use tracklane_core::TaskError;

/// A unit of work owned by exactly one worker at a time.
pub trait Task: Send + 'static {
    type Id: Copy + fmt::Display + Send;

    fn id(&self) -> Self::Id;

    /// Zero-based index of the attempt about to run.
    fn attempt(&self) -> u32;

    /// Record that another attempt will follow.
    fn next_attempt(&mut self);
}

/// Performs one attempt of a task.
#[async_trait]
pub trait Executor<T: Task>: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn execute(&self, task: &T) -> Result<Self::Output, TaskError>;
}

/// Delivers the terminal outcome of a task. Invoked exactly once per task.
#[async_trait]
pub trait Completion<T: Task, O: Send + 'static>: Send + Sync + 'static {
    /// Returns `false` when the outcome could not be delivered and was dropped.
    async fn complete(&self, task: T, outcome: Result<O, TaskError>, elapsed: Duration) -> bool;
}
