//! Caller-supplied execution step for jobs.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use tracklane_core::TaskError;

use super::types::Job;
use crate::engine::Executor;

/// Executes one attempt of a job. The queue itself is payload-agnostic.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &Job) -> Result<Value, TaskError>;
}

/// Adapter returned by [`handler_fn`].
#[derive(Debug, Clone)]
pub struct FnHandler<F>(F);

/// Wrap an async closure as a [`JobHandler`]. The closure receives a copy of
/// the job so the returned future can be `'static`.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    async fn handle(&self, job: &Job) -> Result<Value, TaskError> {
        (self.0)(job.clone()).await
    }
}

/// Bridges a shared handler into the engine.
pub(crate) struct HandlerExecutor(pub(crate) Arc<dyn JobHandler>);

#[async_trait]
impl Executor<Job> for HandlerExecutor {
    type Output = Value;

    async fn execute(&self, job: &Job) -> Result<Value, TaskError> {
        self.0.handle(job).await
    }
}
