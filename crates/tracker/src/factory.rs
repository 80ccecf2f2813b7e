//! Pooled-client factory for the HTTP tracker client.

use async_trait::async_trait;

use tracklane_core::TaskError;
use tracklane_runtime::ClientFactory;

use crate::client::{HttpTrackerClient, TrackerClient, TrackerConfig};

/// Builds [`HttpTrackerClient`]s for a [`ConnectionPool`](tracklane_runtime::ConnectionPool).
/// The health probe is [`TrackerClient::ping`].
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    config: TrackerConfig,
}

impl HttpClientFactory {
    pub fn new(config: TrackerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }
}

#[async_trait]
impl ClientFactory for HttpClientFactory {
    type Client = HttpTrackerClient;

    async fn create(&self) -> Result<HttpTrackerClient, TaskError> {
        HttpTrackerClient::new(&self.config)
    }

    async fn validate(&self, client: &HttpTrackerClient) -> Result<(), TaskError> {
        client.ping().await
    }
}
