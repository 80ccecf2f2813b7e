//! Remote issue-tracker client.
//!
//! `HttpTrackerClient` speaks the `/rest/api/2` layout. Transport failures are
//! mapped into [`TaskError`] here, once, so the retry policy can classify them:
//!
//! - connect failures → `Network { ConnectionRefused | ConnectionReset }`
//! - request deadline → `Timeout`
//! - non-2xx → `Status { code }`
//! - undecodable bodies → `Fatal`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Url};
use serde_json::{Value, json};
use tracing::debug;

use tracklane_core::{NetworkErrorKind, TaskError};

/// Operations the dispatcher can issue against the tracker.
#[async_trait]
pub trait TrackerClient: Send + Sync + 'static {
    async fn fetch_issue(&self, issue_key: &str, fields: &[String]) -> Result<Value, TaskError>;

    async fn search_issues(
        &self,
        jql: &str,
        start_at: u32,
        max_results: u32,
    ) -> Result<Value, TaskError>;

    async fn update_issue(&self, issue_key: &str, fields: &Value) -> Result<(), TaskError>;

    async fn create_issue(&self, fields: &Value) -> Result<Value, TaskError>;

    async fn add_comment(&self, issue_key: &str, body: &str) -> Result<Value, TaskError>;

    async fn transition_issue(&self, issue_key: &str, transition_id: &str)
    -> Result<(), TaskError>;

    /// Cheap liveness probe used by pool health checks.
    async fn ping(&self) -> Result<(), TaskError>;
}

/// Connection settings for [`HttpTrackerClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub base_url: String,
    /// Opaque bearer token, sent as-is.
    pub token: Option<String>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            token: None,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl TrackerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

const MAX_ERROR_BODY: usize = 512;

const API_PREFIX: [&str; 3] = ["rest", "api", "2"];

/// `reqwest`-backed tracker client.
#[derive(Debug, Clone)]
pub struct HttpTrackerClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpTrackerClient {
    pub fn new(config: &TrackerConfig) -> Result<Self, TaskError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| TaskError::fatal(format!("failed to build http client: {e}")))?;
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| TaskError::fatal(format!("invalid tracker url {}: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(TaskError::fatal(format!(
                "tracker url {} cannot carry a path",
                config.base_url
            )));
        }
        Ok(Self {
            http,
            base_url,
            token: config.token.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Each segment is percent-encoded on its own, so keys cannot escape it.
    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(API_PREFIX).extend(segments);
        }
        let req = self.http.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Value, TaskError> {
        let resp = req.send().await.map_err(transport_error)?;
        let status = resp.status();

        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            debug!(status = status.as_u16(), "tracker request failed");
            return Err(TaskError::status(status.as_u16(), body));
        }

        let bytes = resp.bytes().await.map_err(transport_error)?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| TaskError::fatal(format!("invalid response body: {e}")))
    }
}

#[async_trait]
impl TrackerClient for HttpTrackerClient {
    async fn fetch_issue(&self, issue_key: &str, fields: &[String]) -> Result<Value, TaskError> {
        let mut req = self.request(Method::GET, &["issue", issue_key]);
        if !fields.is_empty() {
            req = req.query(&[("fields", fields.join(","))]);
        }
        self.send(req).await
    }

    async fn search_issues(
        &self,
        jql: &str,
        start_at: u32,
        max_results: u32,
    ) -> Result<Value, TaskError> {
        let body = json!({ "jql": jql, "startAt": start_at, "maxResults": max_results });
        self.send(self.request(Method::POST, &["search"]).json(&body)).await
    }

    async fn update_issue(&self, issue_key: &str, fields: &Value) -> Result<(), TaskError> {
        let req = self
            .request(Method::PUT, &["issue", issue_key])
            .json(&json!({ "fields": fields }));
        self.send(req).await.map(|_| ())
    }

    async fn create_issue(&self, fields: &Value) -> Result<Value, TaskError> {
        let req = self
            .request(Method::POST, &["issue"])
            .json(&json!({ "fields": fields }));
        self.send(req).await
    }

    async fn add_comment(&self, issue_key: &str, body: &str) -> Result<Value, TaskError> {
        let req = self
            .request(Method::POST, &["issue", issue_key, "comment"])
            .json(&json!({ "body": body }));
        self.send(req).await
    }

    async fn transition_issue(
        &self,
        issue_key: &str,
        transition_id: &str,
    ) -> Result<(), TaskError> {
        let req = self
            .request(Method::POST, &["issue", issue_key, "transitions"])
            .json(&json!({ "transition": { "id": transition_id } }));
        self.send(req).await.map(|_| ())
    }

    async fn ping(&self) -> Result<(), TaskError> {
        self.send(self.request(Method::GET, &["serverInfo"])).await.map(|_| ())
    }
}

fn transport_error(err: reqwest::Error) -> TaskError {
    if err.is_timeout() {
        return TaskError::Timeout;
    }
    let kind = match io_error_kind(&err).map(NetworkErrorKind::from_io) {
        Some(kind) if kind != NetworkErrorKind::Other => kind,
        _ if err.is_connect() => NetworkErrorKind::ConnectionRefused,
        _ => NetworkErrorKind::Other,
    };
    TaskError::network(kind, err.to_string())
}

fn io_error_kind(err: &reqwest::Error) -> Option<std::io::ErrorKind> {
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = e.source();
    }
    None
}
