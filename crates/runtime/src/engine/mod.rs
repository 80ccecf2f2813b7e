//! Generic worker-pool engine shared by the job queue and the operation
//! dispatcher.
//!
//! ## Design
//!
//! - Bounded admission queue (`tokio::sync::mpsc`); producers wait at most
//!   `admission_timeout` for a slot and are rejected with [`QueueError::Full`]
//! - Fixed set of workers sharing one receiver; the channel hands each task to
//!   exactly one worker
//! - Every attempt waits on the shared [`RateLimiter`] first
//! - Retryable failures sleep in the failing worker and are re-submitted with
//!   an incremented attempt counter; if the queue is full the retry runs inline
//! - A panicking attempt is caught and fails its task with
//!   [`TaskError::Fatal`]; the worker keeps running
//! - Terminal outcomes go through a [`Completion`] strategy
//! - `shutdown` lets in-flight attempts finish and resolves everything still
//!   queued with [`TaskError::ShutDown`]

mod metrics;
mod task;

pub use metrics::EngineMetrics;
pub use task::{Completion, Executor, Task};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tracklane_core::TaskError;

use crate::error::{ConfigError, QueueError};
use crate::priority_queue::{Prioritized, PriorityQueue};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;

use self::metrics::MetricsRecorder;

/// Worker-pool settings. Immutable once the engine is started.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Name for logging
    pub name: String,
    pub workers: usize,
    /// Bound of the admission queue.
    pub queue_capacity: usize,
    /// How long `submit` waits for a free slot before rejecting.
    pub admission_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "engine".to_string(),
            workers: 4,
            queue_capacity: 100,
            admission_timeout: Duration::from_millis(100),
        }
    }
}

impl EngineConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_admission_timeout(mut self, timeout: Duration) -> Self {
        self.admission_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::new("workers", "must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::new("queue_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

struct Shared<T, X, C> {
    name: String,
    receiver: tokio::sync::Mutex<mpsc::Receiver<T>>,
    requeue: mpsc::Sender<T>,
    executor: X,
    completion: C,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    metrics: MetricsRecorder,
    shutdown: CancellationToken,
}

/// A running pool of workers draining a bounded queue of `T`.
pub struct WorkerPool<T, X, C>
where
    T: Task,
    X: Executor<T>,
    C: Completion<T, X::Output>,
{
    config: EngineConfig,
    sender: mpsc::Sender<T>,
    shared: Arc<Shared<T, X, C>>,
    workers: Mutex<Option<JoinSet<()>>>,
}

impl<T, X, C> std::fmt::Debug for WorkerPool<T, X, C>
where
    T: Task,
    X: Executor<T>,
    C: Completion<T, X::Output>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("queue_len", &self.queue_len())
            .finish()
    }
}

impl<T, X, C> WorkerPool<T, X, C>
where
    T: Task,
    X: Executor<T>,
    C: Completion<T, X::Output>,
{
    /// Spawn `config.workers` workers on the current tokio runtime.
    pub fn start(
        config: EngineConfig,
        executor: X,
        completion: C,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        retry.validate()?;

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            receiver: tokio::sync::Mutex::new(receiver),
            requeue: sender.clone(),
            executor,
            completion,
            limiter,
            retry,
            metrics: MetricsRecorder::new(),
            shutdown: CancellationToken::new(),
        });

        let mut workers = JoinSet::new();
        for index in 0..config.workers {
            workers.spawn(run_worker(Arc::clone(&shared), index));
        }
        info!(engine = %config.name, workers = config.workers, capacity = config.queue_capacity, "worker pool started");

        Ok(Self {
            config,
            sender,
            shared,
            workers: Mutex::new(Some(workers)),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Enqueue a task, waiting up to the admission timeout for a free slot.
    pub async fn submit(&self, task: T) -> Result<(), QueueError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(QueueError::Closed);
        }
        match self.sender.send_timeout(task, self.config.admission_timeout).await {
            Ok(()) => {
                self.shared.metrics.submitted();
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => {
                self.shared.metrics.rejected();
                Err(QueueError::Full)
            }
            Err(SendTimeoutError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    /// Enqueue a task only if a slot is free right now.
    pub fn try_submit(&self, task: T) -> Result<(), QueueError> {
        if self.shared.shutdown.is_cancelled() {
            return Err(QueueError::Closed);
        }
        match self.sender.try_send(task) {
            Ok(()) => {
                self.shared.metrics.submitted();
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.shared.metrics.rejected();
                Err(QueueError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    /// Move tasks from `backlog` into the admission queue, highest priority
    /// first, until the queue has no free slot. Returns how many moved.
    pub fn admit_from(&self, backlog: &PriorityQueue<T>) -> usize
    where
        T: Prioritized,
    {
        if self.shared.shutdown.is_cancelled() {
            return 0;
        }
        let mut admitted = 0;
        while let Ok(permit) = self.sender.try_reserve() {
            let Some(task) = backlog.pop() else {
                break;
            };
            permit.send(task);
            self.shared.metrics.submitted();
            admitted += 1;
        }
        admitted
    }

    /// Tasks waiting in the admission queue.
    pub fn queue_len(&self) -> usize {
        self.config.queue_capacity - self.sender.capacity()
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.shared.metrics.snapshot()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Stop the workers after their current attempt, then resolve every task
    /// still queued with [`TaskError::ShutDown`]. Idempotent.
    pub async fn shutdown(&self) {
        let Some(mut workers) = self.workers.lock().take() else {
            return;
        };
        self.shared.shutdown.cancel();

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(engine = %self.shared.name, error = %e, "worker task failed");
            }
        }

        let mut receiver = self.shared.receiver.lock().await;
        receiver.close();
        let mut drained = 0usize;
        while let Ok(task) = receiver.try_recv() {
            drained += 1;
            self.shared.finish(task, Err(TaskError::ShutDown), Duration::ZERO).await;
        }
        info!(engine = %self.shared.name, drained, "worker pool stopped");
    }
}

impl<T, X, C> Drop for WorkerPool<T, X, C>
where
    T: Task,
    X: Executor<T>,
    C: Completion<T, X::Output>,
{
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

async fn run_worker<T, X, C>(shared: Arc<Shared<T, X, C>>, index: usize)
where
    T: Task,
    X: Executor<T>,
    C: Completion<T, X::Output>,
{
    debug!(engine = %shared.name, worker = index, "worker started");

    loop {
        let next = {
            let mut receiver = tokio::select! {
                biased;
                _ = shared.shutdown.cancelled() => break,
                receiver = shared.receiver.lock() => receiver,
            };
            tokio::select! {
                biased;
                _ = shared.shutdown.cancelled() => None,
                task = receiver.recv() => task,
            }
        };

        let Some(task) = next else {
            break;
        };
        debug!(engine = %shared.name, worker = index, task_id = %task.id(), attempt = task.attempt(), "dequeued task");

        shared.metrics.dequeued();
        shared.process(task).await;
        shared.metrics.released();
    }

    debug!(engine = %shared.name, worker = index, "worker stopped");
}

impl<T, X, C> Shared<T, X, C>
where
    T: Task,
    X: Executor<T>,
    C: Completion<T, X::Output>,
{
    async fn process(&self, mut task: T) {
        let started = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.finish(task, Err(TaskError::ShutDown), started.elapsed()).await;
                    return;
                }
                _ = self.limiter.wait() => {}
            }

            let attempt = task.attempt();
            let attempt_started = Instant::now();
            let attempt_run = AssertUnwindSafe(self.executor.execute(&task));
            let outcome = match attempt_run.catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!(engine = %self.name, task_id = %task.id(), attempt, "executor panicked");
                    Err(TaskError::fatal("executor panicked"))
                }
            };
            self.metrics.attempt(attempt_started.elapsed());

            let err = match outcome {
                Ok(output) => {
                    self.finish(task, Ok(output), started.elapsed()).await;
                    return;
                }
                Err(err) => err,
            };

            if !self.retry.should_retry(&err, attempt) {
                let err = if err.is_transient() {
                    TaskError::exhausted(attempt + 1, err)
                } else {
                    err
                };
                warn!(engine = %self.name, task_id = %task.id(), attempts = attempt + 1, error = %err, "task failed");
                self.finish(task, Err(err), started.elapsed()).await;
                return;
            }

            let delay = self.retry.delay_for(attempt);
            self.metrics.retried();
            task.next_attempt();
            debug!(
                engine = %self.name,
                task_id = %task.id(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "scheduling retry"
            );

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.finish(task, Err(TaskError::ShutDown), started.elapsed()).await;
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match self.requeue.try_send(task) {
                Ok(()) => return,
                Err(TrySendError::Full(t)) => {
                    debug!(engine = %self.name, task_id = %t.id(), "queue full, retrying inline");
                    task = t;
                }
                Err(TrySendError::Closed(t)) => {
                    self.finish(t, Err(TaskError::ShutDown), started.elapsed()).await;
                    return;
                }
            }
        }
    }

    async fn finish(&self, task: T, outcome: Result<X::Output, TaskError>, elapsed: Duration) {
        let success = outcome.is_ok();
        let id = task.id();
        let delivered = self.completion.complete(task, outcome, elapsed).await;
        if !delivered {
            warn!(engine = %self.name, task_id = %id, "result dropped");
        }
        self.metrics.finished(success, delivered);
    }
}
