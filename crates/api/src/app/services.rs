//! Runtime wiring: one upstream pool and rate limiter shared by the job queue
//! and the operation dispatcher.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use tracklane_runtime::{ConnectionPool, Job, JobQueue, PriorityQueue, RateLimiter};
use tracklane_tracker::{Dispatcher, HttpClientFactory, TrackerJobHandler};

use crate::config::Settings;

pub type TrackerPool = ConnectionPool<HttpClientFactory>;

#[derive(Debug)]
pub struct AppServices {
    pub limiter: Arc<RateLimiter>,
    pub pool: Arc<TrackerPool>,
    pub jobs: JobQueue,
    pub dispatcher: Dispatcher<HttpClientFactory>,
    /// Jobs parked until there is room in the job queue.
    pub backlog: PriorityQueue<Job>,
}

/// Build and start every engine. Must run inside a tokio runtime.
pub fn build_services(settings: &Settings) -> Result<AppServices> {
    let limiter = Arc::new(
        RateLimiter::new(&settings.rate_limit).context("failed to build rate limiter")?,
    );
    let factory = HttpClientFactory::new(settings.tracker.clone());
    let pool = Arc::new(
        ConnectionPool::new(factory, settings.pool.clone())
            .context("failed to build connection pool")?,
    );

    let mut handler = TrackerJobHandler::new(Arc::clone(&pool));
    if let Some(timeout) = settings.job_timeout {
        handler = handler.with_timeout(timeout);
    }
    let jobs = JobQueue::start(
        settings.job_queue.clone(),
        handler,
        Arc::clone(&limiter),
        settings.retry.clone(),
    )
    .context("failed to start job queue")?;

    let dispatcher = Dispatcher::start(
        settings.dispatcher.clone(),
        Arc::clone(&pool),
        Arc::clone(&limiter),
        settings.retry.clone(),
    )
    .context("failed to start dispatcher")?;

    info!(
        upstream = %settings.tracker.base_url,
        job_workers = settings.job_queue.engine.workers,
        dispatcher_workers = settings.dispatcher.engine.workers,
        "services started"
    );

    Ok(AppServices {
        limiter,
        pool,
        jobs,
        dispatcher,
        backlog: PriorityQueue::new(),
    })
}

impl AppServices {
    /// Pre-fill the pool and start its background health cycle.
    pub async fn start_pool_maintenance(&self) {
        match self.pool.warm_up().await {
            Ok(created) => info!(created, "connection pool warmed up"),
            Err(e) => warn!(error = %e, "connection pool warm-up failed"),
        }
        self.pool.start_health_checks();
    }

    /// Stop both engines, then close the pool. Parked backlog jobs are
    /// discarded.
    pub async fn shutdown(&self) {
        self.jobs.stop().await;
        self.dispatcher.close().await;
        let _ = self.pool.close().await;
        let discarded = self.backlog.clear();
        info!(discarded, "services stopped");
    }
}
