//! Concurrency core: rate limiting, retries, pooled clients, and the bounded
//! worker-pool engines built on them.
//!
//! Nothing here is global. Limiters, policies, and pools are constructed by
//! the caller and handed to the engines that share them.

pub mod engine;
pub mod error;
pub mod jobs;
pub mod pool;
pub mod priority_queue;
pub mod rate_limiter;
pub mod retry;

pub use engine::{Completion, EngineConfig, EngineMetrics, Executor, Task, WorkerPool};
pub use error::{ConfigError, PoolError, QueueError};
pub use jobs::{Job, JobHandler, JobQueue, JobQueueConfig, JobResult, JobType, handler_fn};
pub use pool::{ClientFactory, ConnectionPool, HealthReport, PoolConfig, PoolStats, PooledClient};
pub use priority_queue::{Prioritized, PriorityQueue};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use retry::RetryPolicy;
