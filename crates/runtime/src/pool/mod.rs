//! Bounded pool of reusable remote-API clients.
//!
//! ## Invariants
//!
//! - `total` counts every live client: idle, checked out, being created or
//!   being health-checked. New clients are only created while
//!   `total < max_size`, so checked-out clients never exceed `max_size`.
//! - A returned client is destroyed instead of recycled when it is invalid,
//!   older than `max_lifetime`, the idle store is full, or the pool shrank.
//! - Creation failures reach the caller of `get`; health-check failures only
//!   reach [`PoolStats`].

mod client;

pub use client::{ClientFactory, PooledClient};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, PoolError};

/// Pool settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_size: usize,
    /// Idle clients the health cycle keeps available.
    pub min_size: usize,
    /// Default wait for [`ConnectionPool::get`].
    pub acquire_timeout: Duration,
    /// Clients older than this are destroyed on return or during health checks.
    pub max_lifetime: Duration,
    /// Idle clients unused for longer are reaped while above `min_size`.
    pub idle_timeout: Duration,
    pub health_check_interval: Duration,
    /// Idle clients probed per health cycle.
    pub health_check_sample: usize,
    /// Probe idle clients before handing them out.
    pub validate_on_get: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_size: 2,
            acquire_timeout: Duration::from_secs(5),
            max_lifetime: Duration::from_secs(30 * 60),
            idle_timeout: Duration::from_secs(5 * 60),
            health_check_interval: Duration::from_secs(30),
            health_check_sample: 3,
            validate_on_get: false,
        }
    }
}

impl PoolConfig {
    pub fn with_size(mut self, max_size: usize, min_size: usize) -> Self {
        self.max_size = max_size;
        self.min_size = min_size;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_bounds(self.max_size, self.min_size)?;
        if self.health_check_interval.is_zero() {
            return Err(ConfigError::new("health_check_interval", "must be non-zero"));
        }
        Ok(())
    }
}

fn validate_bounds(max_size: usize, min_size: usize) -> Result<(), ConfigError> {
    if max_size == 0 {
        return Err(ConfigError::new("max_size", "must be at least 1"));
    }
    if min_size > max_size {
        return Err(ConfigError::new("min_size", "must not exceed max_size"));
    }
    Ok(())
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_size: usize,
    pub min_size: usize,
    pub total: usize,
    pub idle: usize,
    pub in_use: usize,
    pub created: u64,
    pub destroyed: u64,
    pub creation_failures: u64,
    pub health_check_failures: u64,
    pub acquired: u64,
    pub timeouts: u64,
    pub closed: bool,
}

/// Outcome of one health cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub checked: usize,
    pub failed: usize,
    pub reaped: usize,
    pub replenished: usize,
}

#[derive(Debug)]
struct PoolState<C> {
    idle: VecDeque<PooledClient<C>>,
    total: usize,
    in_use: usize,
    max_size: usize,
    min_size: usize,
    closed: bool,
    stats: PoolStats,
}

enum Acquire<C> {
    Idle(PooledClient<C>),
    Create,
    Wait,
}

/// Bounded client pool.
pub struct ConnectionPool<F: ClientFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Client>>,
    available: Notify,
    shutdown: CancellationToken,
}

impl<F: ClientFactory> std::fmt::Debug for ConnectionPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<F: ClientFactory> ConnectionPool<F> {
    /// Create an empty pool. Call [`warm_up`](Self::warm_up) to pre-fill it.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_size),
            total: 0,
            in_use: 0,
            max_size: config.max_size,
            min_size: config.min_size,
            closed: false,
            stats: PoolStats::default(),
        };
        Ok(Self {
            factory,
            config,
            state: Mutex::new(state),
            available: Notify::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Check out a client, waiting up to the configured acquire timeout.
    pub async fn get(&self) -> Result<PooledClient<F::Client>, PoolError> {
        self.get_timeout(self.config.acquire_timeout).await
    }

    /// Check out a client, waiting up to `timeout`.
    ///
    /// Prefers an idle client (validated first when `validate_on_get` is set),
    /// creates a new one while below `max_size`, and otherwise waits for a
    /// return, resize, or close.
    pub async fn get_timeout(
        &self,
        timeout: Duration,
    ) -> Result<PooledClient<F::Client>, PoolError> {
        let deadline = Instant::now() + timeout;

        loop {
            // Registered before inspecting state so no release is missed.
            let notified = self.available.notified();

            let action = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(PoolError::Closed);
                }
                if let Some(client) = state.idle.pop_back() {
                    state.in_use += 1;
                    Acquire::Idle(client)
                } else if state.total < state.max_size {
                    state.total += 1;
                    state.in_use += 1;
                    Acquire::Create
                } else {
                    Acquire::Wait
                }
            };

            match action {
                Acquire::Idle(mut client) => {
                    if client.age() >= self.config.max_lifetime {
                        debug!(client_id = %client.id(), "discarding expired idle client");
                        self.destroy(client, true).await;
                        continue;
                    }
                    if self.config.validate_on_get {
                        let probe = self.factory.validate(client.client()).await;
                        if let Err(e) = probe {
                            warn!(client_id = %client.id(), error = %e, "pooled client failed validation");
                            self.state.lock().stats.health_check_failures += 1;
                            self.destroy(client, true).await;
                            continue;
                        }
                    }
                    client.touch();
                    self.state.lock().stats.acquired += 1;
                    return Ok(client);
                }
                Acquire::Create => match self.factory.create().await {
                    Ok(raw) => {
                        let mut client = PooledClient::new(raw);
                        client.touch();
                        {
                            let mut state = self.state.lock();
                            state.stats.created += 1;
                            state.stats.acquired += 1;
                        }
                        debug!(client_id = %client.id(), "created pooled client");
                        return Ok(client);
                    }
                    Err(e) => {
                        {
                            let mut state = self.state.lock();
                            state.total = state.total.saturating_sub(1);
                            state.in_use = state.in_use.saturating_sub(1);
                            state.stats.creation_failures += 1;
                        }
                        self.available.notify_waiters();
                        warn!(error = %e, "failed to create pooled client");
                        return Err(PoolError::Create(e));
                    }
                },
                Acquire::Wait => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        self.state.lock().stats.timeouts += 1;
                        return Err(PoolError::Timeout);
                    }
                }
            }
        }
    }

    /// Hand a checked-out client back.
    ///
    /// Invalid, expired, or surplus clients are destroyed. Returning to a
    /// closed pool destroys the client and reports [`PoolError::Closed`].
    pub async fn put(&self, mut client: PooledClient<F::Client>) -> Result<(), PoolError> {
        let expired = client.age() >= self.config.max_lifetime;
        let closed = {
            let mut state = self.state.lock();
            state.in_use = state.in_use.saturating_sub(1);
            let keep = !state.closed
                && client.is_valid()
                && !expired
                && state.total <= state.max_size
                && state.idle.len() < state.max_size;
            if keep {
                client.release();
                state.idle.push_back(client);
                None
            } else {
                Some((state.closed, client))
            }
        };

        match closed {
            None => {
                self.available.notify_waiters();
                Ok(())
            }
            Some((was_closed, client)) => {
                debug!(client_id = %client.id(), valid = client.is_valid(), expired, "destroying returned client");
                self.destroy(client, false).await;
                if was_closed {
                    Err(PoolError::Closed)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Adjust bounds; destroys surplus idle clients and tops up to the new minimum.
    pub async fn resize(&self, max_size: usize, min_size: usize) -> Result<(), PoolError> {
        validate_bounds(max_size, min_size)?;

        let surplus: Vec<_> = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            state.max_size = max_size;
            state.min_size = min_size;
            let mut surplus = Vec::new();
            while state.total > state.max_size {
                match state.idle.pop_front() {
                    Some(client) => {
                        state.total -= 1;
                        surplus.push(client);
                    }
                    None => break,
                }
            }
            surplus
        };

        info!(max_size, min_size, destroyed = surplus.len(), "resized connection pool");
        for client in surplus {
            self.dispose(client).await;
        }
        self.available.notify_waiters();

        self.fill_to_min().await?;
        Ok(())
    }

    /// Create clients until `min_size` idle clients exist.
    pub async fn warm_up(&self) -> Result<usize, PoolError> {
        self.fill_to_min().await
    }

    /// One health cycle: probe a sample of idle clients, reap expired or
    /// stale ones, and replenish to `min_size`. Never fails.
    pub async fn health_check(&self) -> HealthReport {
        let mut report = HealthReport::default();

        let (sample, min_size) = {
            let mut state = self.state.lock();
            if state.closed {
                return report;
            }
            let n = self.config.health_check_sample.min(state.idle.len());
            let sample: Vec<_> = state.idle.drain(..n).collect();
            (sample, state.min_size)
        };

        let mut pending = sample.len();
        for client in sample {
            report.checked += 1;
            pending -= 1;

            // Stale clients only go while the idle store stays above minimum.
            let stale = client.idle_for() >= self.config.idle_timeout
                && self.state.lock().idle.len() + pending >= min_size;
            if client.age() >= self.config.max_lifetime || stale {
                report.reaped += 1;
                self.destroy(client, false).await;
                continue;
            }

            let probe = self.factory.validate(client.client()).await;
            match probe {
                Ok(()) => self.restore_idle(client).await,
                Err(e) => {
                    warn!(client_id = %client.id(), error = %e, "health check failed");
                    report.failed += 1;
                    self.state.lock().stats.health_check_failures += 1;
                    self.destroy(client, false).await;
                }
            }
        }

        match self.fill_to_min().await {
            Ok(n) => report.replenished = n,
            Err(e) => warn!(error = %e, "failed to replenish pool during health check"),
        }

        debug!(?report, "pool health check finished");
        report
    }

    /// Spawn the periodic health cycle. Stops when the pool is closed.
    pub fn start_health_checks(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let period = self.config.health_check_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        pool.health_check().await;
                    }
                }
            }
            debug!("pool health checks stopped");
        })
    }

    /// Destroy every idle client and refuse further checkouts. Clients still
    /// checked out are destroyed when returned. Idempotent.
    pub async fn close(&self) -> Result<(), PoolError> {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.stats.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.total = state.total.saturating_sub(drained.len());
            drained
        };

        self.shutdown.cancel();
        self.available.notify_waiters();

        let n = drained.len();
        for client in drained {
            self.dispose(client).await;
        }
        info!(destroyed = n, "connection pool closed");
        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            max_size: state.max_size,
            min_size: state.min_size,
            total: state.total,
            idle: state.idle.len(),
            in_use: state.in_use,
            ..state.stats.clone()
        }
    }

    /// Put a health-checked client back, unless the pool closed meanwhile.
    async fn restore_idle(&self, client: PooledClient<F::Client>) {
        let rejected = {
            let mut state = self.state.lock();
            if state.closed || state.total > state.max_size {
                Some(client)
            } else {
                state.idle.push_back(client);
                None
            }
        };
        match rejected {
            Some(client) => self.destroy(client, false).await,
            None => self.available.notify_waiters(),
        }
    }

    async fn fill_to_min(&self) -> Result<usize, PoolError> {
        let mut created = 0;
        loop {
            {
                let mut state = self.state.lock();
                if state.closed
                    || state.idle.len() >= state.min_size
                    || state.total >= state.max_size
                {
                    break;
                }
                state.total += 1;
            }

            match self.factory.create().await {
                Ok(raw) => {
                    created += 1;
                    {
                        let mut state = self.state.lock();
                        state.stats.created += 1;
                    }
                    self.restore_idle(PooledClient::new(raw)).await;
                }
                Err(e) => {
                    {
                        let mut state = self.state.lock();
                        state.total = state.total.saturating_sub(1);
                        state.stats.creation_failures += 1;
                    }
                    self.available.notify_waiters();
                    return Err(PoolError::Create(e));
                }
            }
        }
        Ok(created)
    }

    /// Release a client that is counted in `total` (and in `in_use` when
    /// `checked_out`).
    async fn destroy(&self, client: PooledClient<F::Client>, checked_out: bool) {
        {
            let mut state = self.state.lock();
            state.total = state.total.saturating_sub(1);
            if checked_out {
                state.in_use = state.in_use.saturating_sub(1);
            }
        }
        self.dispose(client).await;
        self.available.notify_waiters();
    }

    /// Close a client already removed from `total`.
    async fn dispose(&self, client: PooledClient<F::Client>) {
        self.state.lock().stats.destroyed += 1;
        self.factory.close(client.into_inner()).await;
    }
}

impl<F: ClientFactory> Drop for ConnectionPool<F> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
