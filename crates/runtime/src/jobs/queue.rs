//! Job queue: the worker-pool engine with a pull-based result queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use tracklane_core::{JobId, TaskError};

use super::handler::{HandlerExecutor, JobHandler};
use super::types::{Job, JobResult};
use crate::engine::{Completion, EngineConfig, EngineMetrics, WorkerPool};
use crate::error::{ConfigError, QueueError};
use crate::priority_queue::PriorityQueue;
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;

/// Job queue configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct JobQueueConfig {
    pub engine: EngineConfig,
    /// Bound of the completion queue.
    pub result_capacity: usize,
    /// How long a worker waits for room in the completion queue before
    /// dropping the result.
    pub result_timeout: Duration,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default().with_name("job-queue"),
            result_capacity: 100,
            result_timeout: Duration::from_millis(100),
        }
    }
}

impl JobQueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        if self.result_capacity == 0 {
            return Err(ConfigError::new("result_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

/// Completion strategy pushing results onto a bounded channel.
pub(crate) struct ResultQueue {
    sender: mpsc::Sender<JobResult>,
    timeout: Duration,
}

#[async_trait]
impl Completion<Job, Value> for ResultQueue {
    async fn complete(&self, job: Job, outcome: Result<Value, TaskError>, elapsed: Duration) -> bool {
        let result = JobResult::new(&job, outcome, elapsed);
        self.sender.send_timeout(result, self.timeout).await.is_ok()
    }
}

/// Bounded job queue with a fixed worker pool and a bounded result queue.
#[derive(Debug)]
pub struct JobQueue {
    engine: WorkerPool<Job, HandlerExecutor, ResultQueue>,
    results: tokio::sync::Mutex<mpsc::Receiver<JobResult>>,
}

impl JobQueue {
    /// Start the workers. Must be called inside a tokio runtime.
    pub fn start<H: JobHandler>(
        config: JobQueueConfig,
        handler: H,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        Self::start_shared(config, Arc::new(handler), limiter, retry)
    }

    pub fn start_shared(
        config: JobQueueConfig,
        handler: Arc<dyn JobHandler>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (sender, receiver) = mpsc::channel(config.result_capacity);
        let completion = ResultQueue {
            sender,
            timeout: config.result_timeout,
        };
        let engine = WorkerPool::start(
            config.engine,
            HandlerExecutor(handler),
            completion,
            limiter,
            retry,
        )?;
        Ok(Self {
            engine,
            results: tokio::sync::Mutex::new(receiver),
        })
    }

    /// Enqueue a job, waiting briefly for room. Rejection means "try later".
    pub async fn submit(&self, job: Job) -> Result<JobId, QueueError> {
        let id = job.id;
        self.engine.submit(job).await?;
        Ok(id)
    }

    pub fn try_submit(&self, job: Job) -> Result<JobId, QueueError> {
        let id = job.id;
        self.engine.try_submit(job)?;
        Ok(id)
    }

    /// Wait up to `timeout` for the next finished job, in completion order.
    pub async fn get_result(&self, timeout: Duration) -> Result<JobResult, QueueError> {
        let deadline = Instant::now() + timeout;
        let Ok(mut results) = tokio::time::timeout_at(deadline, self.results.lock()).await else {
            return Err(QueueError::NoResult);
        };
        match tokio::time::timeout_at(deadline, results.recv()).await {
            Ok(Some(result)) => Ok(result),
            Ok(None) => Err(QueueError::Closed),
            Err(_) => Err(QueueError::NoResult),
        }
    }

    /// Move parked jobs into the admission queue, highest priority first,
    /// while slots are free.
    pub fn admit_backlog(&self, backlog: &PriorityQueue<Job>) -> usize {
        self.engine.admit_from(backlog)
    }

    pub fn queue_len(&self) -> usize {
        self.engine.queue_len()
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.engine.metrics()
    }

    pub fn is_stopped(&self) -> bool {
        self.engine.is_shut_down()
    }

    /// Stop the workers. Queued jobs get a [`TaskError::ShutDown`] result.
    /// Results already produced stay collectable. Idempotent.
    pub async fn stop(&self) {
        self.engine.shutdown().await;
    }
}
