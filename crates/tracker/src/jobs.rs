//! Job handler that executes queued jobs as tracker operations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use tracklane_core::TaskError;
use tracklane_runtime::{ClientFactory, ConnectionPool, Job, JobHandler};

use crate::client::TrackerClient;
use crate::dispatcher::run_pooled;
use crate::operation::OperationRequest;

/// Runs each [`Job`] against a pooled tracker client.
pub struct TrackerJobHandler<F: ClientFactory> {
    pool: Arc<ConnectionPool<F>>,
    timeout: Option<Duration>,
}

impl<F: ClientFactory> TrackerJobHandler<F> {
    pub fn new(pool: Arc<ConnectionPool<F>>) -> Self {
        Self {
            pool,
            timeout: None,
        }
    }

    /// Deadline applied to every attempt.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl<F> JobHandler for TrackerJobHandler<F>
where
    F: ClientFactory,
    F::Client: TrackerClient,
{
    async fn handle(&self, job: &Job) -> Result<Value, TaskError> {
        let request = OperationRequest::from_job(job)?;
        run_pooled(&self.pool, &request, self.timeout).await
    }
}
