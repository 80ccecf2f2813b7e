//! Pooled client handles and the factory seam used to build them.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use tracklane_core::{ClientId, TaskError};

/// Creates, probes, and disposes of remote-API clients for a [`ConnectionPool`](super::ConnectionPool).
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    type Client: Send + Sync + 'static;

    /// Build a fresh client. Failures are counted and surfaced to the caller of `get`.
    async fn create(&self) -> Result<Self::Client, TaskError>;

    /// Health probe. Failures never reach callers; the client is replaced.
    async fn validate(&self, client: &Self::Client) -> Result<(), TaskError>;

    /// Release any resources held by a client that leaves the pool.
    async fn close(&self, _client: Self::Client) {}
}

/// A client checked out of (or idle inside) the pool.
#[derive(Debug)]
pub struct PooledClient<C> {
    id: ClientId,
    client: C,
    created_at: Instant,
    last_used: Instant,
    usage_count: u64,
    valid: bool,
}

impl<C> PooledClient<C> {
    pub(crate) fn new(client: C) -> Self {
        let now = Instant::now();
        Self {
            id: ClientId::new(),
            client,
            created_at: now,
            last_used: now,
            usage_count: 0,
            valid: true,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Flag the client as broken; the pool destroys it on return.
    pub fn mark_invalid(&mut self) {
        self.valid = false;
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
        self.usage_count += 1;
    }

    /// Restart the idle clock when the client goes back to the idle store.
    pub(crate) fn release(&mut self) {
        self.last_used = Instant::now();
    }

    pub(crate) fn into_inner(self) -> C {
        self.client
    }
}

impl<C> std::ops::Deref for PooledClient<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.client
    }
}
