//! Operation dispatcher: the worker-pool engine specialised for typed tracker
//! operations, with per-operation callback completion.
//!
//! Each attempt checks a client out of the shared [`ConnectionPool`], runs the
//! operation under its optional deadline, and returns the client. Clients that
//! hit a network failure are marked invalid so the pool replaces them.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use tracklane_core::{OperationId, TaskError};
use tracklane_runtime::{
    ClientFactory, Completion, ConfigError, ConnectionPool, EngineConfig, EngineMetrics, Executor,
    QueueError, RateLimiter, RetryPolicy, WorkerPool,
};

use crate::client::TrackerClient;
use crate::operation::{Operation, OperationRequest};

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherConfig {
    pub engine: EngineConfig,
    /// Applied to operations submitted without their own timeout.
    pub default_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default().with_name("dispatcher"),
            default_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Runs operations with pooled clients.
pub(crate) struct PooledExecutor<F: ClientFactory> {
    pool: Arc<ConnectionPool<F>>,
}

#[async_trait]
impl<F> Executor<Operation> for PooledExecutor<F>
where
    F: ClientFactory,
    F::Client: TrackerClient,
{
    type Output = Value;

    async fn execute(&self, op: &Operation) -> Result<Value, TaskError> {
        if op.is_cancelled() {
            debug!(operation_id = %op.id, "operation cancelled before attempt");
            return Err(TaskError::Cancelled);
        }
        run_pooled(&self.pool, &op.request, op.timeout).await
    }
}

/// One attempt of `request` on a pooled client, under an optional deadline.
/// Clients that hit a network failure are marked invalid before being returned.
pub(crate) async fn run_pooled<F>(
    pool: &ConnectionPool<F>,
    request: &OperationRequest,
    timeout: Option<Duration>,
) -> Result<Value, TaskError>
where
    F: ClientFactory,
    F::Client: TrackerClient,
{
    let mut client = pool.get().await?;

    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, request.run(client.client()))
            .await
            .unwrap_or(Err(TaskError::Timeout)),
        None => request.run(client.client()).await,
    };

    if matches!(result, Err(TaskError::Network { .. })) {
        client.mark_invalid();
    }
    if let Err(e) = pool.put(client).await {
        debug!(kind = request.kind(), error = %e, "could not return client to pool");
    }
    result
}

/// Invokes each operation's own callback.
#[derive(Debug, Default)]
pub(crate) struct CallbackCompletion;

#[async_trait]
impl Completion<Operation, Value> for CallbackCompletion {
    async fn complete(
        &self,
        mut op: Operation,
        outcome: Result<Value, TaskError>,
        elapsed: Duration,
    ) -> bool {
        debug!(
            operation_id = %op.id,
            kind = op.request.kind(),
            success = outcome.is_ok(),
            elapsed_ms = elapsed.as_millis() as u64,
            "operation finished"
        );
        match std::panic::catch_unwind(AssertUnwindSafe(|| op.resolve(outcome))) {
            Ok(delivered) => delivered,
            Err(_) => {
                warn!(operation_id = %op.id, "operation callback panicked");
                false
            }
        }
    }
}

type Engine<F> = WorkerPool<Operation, PooledExecutor<F>, CallbackCompletion>;

/// Bounded, rate-limited dispatcher of tracker operations.
pub struct Dispatcher<F>
where
    F: ClientFactory,
    F::Client: TrackerClient,
{
    engine: Engine<F>,
    pool: Arc<ConnectionPool<F>>,
    default_timeout: Option<Duration>,
}

impl<F> std::fmt::Debug for Dispatcher<F>
where
    F: ClientFactory,
    F::Client: TrackerClient,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("engine", &self.engine)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl<F> Dispatcher<F>
where
    F: ClientFactory,
    F::Client: TrackerClient,
{
    /// Start the workers. The pool stays owned by the caller and is not closed
    /// by [`close`](Self::close).
    pub fn start(
        config: DispatcherConfig,
        pool: Arc<ConnectionPool<F>>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let executor = PooledExecutor {
            pool: Arc::clone(&pool),
        };
        let engine = WorkerPool::start(config.engine, executor, CallbackCompletion, limiter, retry)?;
        Ok(Self {
            engine,
            pool,
            default_timeout: config.default_timeout,
        })
    }

    /// Admit an operation. On rejection the callback is dropped uninvoked and
    /// the caller gets the error instead.
    pub async fn submit_operation(&self, mut op: Operation) -> Result<OperationId, QueueError> {
        if op.timeout.is_none() {
            op.timeout = self.default_timeout;
        }
        let id = op.id;
        debug!(operation_id = %id, kind = op.request.kind(), "submitting operation");
        self.engine.submit(op).await?;
        Ok(id)
    }

    pub async fn submit<C>(&self, request: OperationRequest, callback: C) -> Result<OperationId, QueueError>
    where
        C: FnOnce(Result<Value, TaskError>) + Send + 'static,
    {
        self.submit_operation(Operation::new(request, callback)).await
    }

    pub async fn fetch_async<C>(
        &self,
        issue_key: impl Into<String>,
        fields: Vec<String>,
        callback: C,
    ) -> Result<OperationId, QueueError>
    where
        C: FnOnce(Result<Value, TaskError>) + Send + 'static,
    {
        let request = OperationRequest::Fetch {
            issue_key: issue_key.into(),
            fields,
        };
        self.submit(request, callback).await
    }

    pub async fn search_async<C>(
        &self,
        jql: impl Into<String>,
        start_at: u32,
        max_results: u32,
        callback: C,
    ) -> Result<OperationId, QueueError>
    where
        C: FnOnce(Result<Value, TaskError>) + Send + 'static,
    {
        let request = OperationRequest::Search {
            jql: jql.into(),
            start_at,
            max_results,
        };
        self.submit(request, callback).await
    }

    pub async fn update_async<C>(
        &self,
        issue_key: impl Into<String>,
        fields: Value,
        callback: C,
    ) -> Result<OperationId, QueueError>
    where
        C: FnOnce(Result<Value, TaskError>) + Send + 'static,
    {
        let request = OperationRequest::Update {
            issue_key: issue_key.into(),
            fields,
        };
        self.submit(request, callback).await
    }

    pub async fn create_async<C>(&self, fields: Value, callback: C) -> Result<OperationId, QueueError>
    where
        C: FnOnce(Result<Value, TaskError>) + Send + 'static,
    {
        self.submit(OperationRequest::Create { fields }, callback).await
    }

    pub async fn comment_async<C>(
        &self,
        issue_key: impl Into<String>,
        body: impl Into<String>,
        callback: C,
    ) -> Result<OperationId, QueueError>
    where
        C: FnOnce(Result<Value, TaskError>) + Send + 'static,
    {
        let request = OperationRequest::Comment {
            issue_key: issue_key.into(),
            body: body.into(),
        };
        self.submit(request, callback).await
    }

    pub async fn transition_async<C>(
        &self,
        issue_key: impl Into<String>,
        transition_id: impl Into<String>,
        callback: C,
    ) -> Result<OperationId, QueueError>
    where
        C: FnOnce(Result<Value, TaskError>) + Send + 'static,
    {
        let request = OperationRequest::Transition {
            issue_key: issue_key.into(),
            transition_id: transition_id.into(),
        };
        self.submit(request, callback).await
    }

    /// Submit and wait for the terminal outcome.
    ///
    /// Admission rejection surfaces as [`TaskError::Unavailable`], a stopped
    /// dispatcher as [`TaskError::ShutDown`].
    pub async fn execute(&self, request: OperationRequest) -> Result<Value, TaskError> {
        let (tx, rx) = oneshot::channel();
        self.submit(request, move |outcome| {
            let _ = tx.send(outcome);
        })
        .await
        .map_err(admission_error)?;
        rx.await.unwrap_or(Err(TaskError::ShutDown))
    }

    /// [`execute`](Self::execute) for a JSON tagged request. Unknown tags fail
    /// before admission.
    pub async fn execute_json(&self, request: Value) -> Result<Value, TaskError> {
        let request = OperationRequest::from_json(request)?;
        self.execute(request).await
    }

    /// Submit every request, then wait for all of them. Outcomes are returned
    /// in input order regardless of completion order.
    pub async fn submit_batch(
        &self,
        requests: Vec<OperationRequest>,
    ) -> Vec<Result<Value, TaskError>> {
        let mut pending = Vec::with_capacity(requests.len());
        for request in requests {
            let (tx, rx) = oneshot::channel();
            let admitted = self
                .submit(request, move |outcome| {
                    let _ = tx.send(outcome);
                })
                .await;
            pending.push(admitted.map(|_| rx).map_err(admission_error));
        }

        let mut outcomes = Vec::with_capacity(pending.len());
        for entry in pending {
            let outcome = match entry {
                Ok(rx) => rx.await.unwrap_or(Err(TaskError::ShutDown)),
                Err(e) => Err(e),
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.engine.metrics()
    }

    pub fn queue_len(&self) -> usize {
        self.engine.queue_len()
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<F>> {
        &self.pool
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_shut_down()
    }

    /// Stop accepting work, let active attempts finish, then fail every
    /// queued operation's callback with [`TaskError::ShutDown`]. Idempotent.
    pub async fn close(&self) {
        self.engine.shutdown().await;
    }
}

fn admission_error(err: QueueError) -> TaskError {
    match err {
        QueueError::Full => TaskError::unavailable("dispatcher queue is full"),
        QueueError::Closed | QueueError::NoResult => TaskError::ShutDown,
    }
}
