use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path;
use axum::http::StatusCode as UpstreamStatus;
use axum::routing::{get, post};
use axum::{Json, Router};
use reqwest::StatusCode;
use serde_json::{json, Value};

use tracklane_api::app::{build_app, services::build_services};
use tracklane_api::config::{Cli, Settings};
use tracklane_runtime::{EngineConfig, PoolConfig, RateLimitConfig, RetryPolicy};

async fn serve(router: Router) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind ephemeral port");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, handle)
}

/// Stand-in for the remote tracker.
fn upstream() -> Router {
    Router::new()
        .route(
            "/rest/api/2/issue/:key",
            get(|Path(key): Path<String>| async move {
                match key.as_str() {
                    "OPS-404" => Err((UpstreamStatus::NOT_FOUND, "Issue does not exist")),
                    "OPS-SLOW" => {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        Ok(Json(json!({ "key": key })))
                    }
                    _ => Ok(Json(json!({ "key": key, "fields": { "summary": "upstream" } }))),
                }
            }),
        )
        .route(
            "/rest/api/2/issue",
            post(|Json(body): Json<Value>| async move {
                Json(json!({ "key": "OPS-100", "sent": body }))
            }),
        )
        .route(
            "/rest/api/2/search",
            post(|Json(body): Json<Value>| async move { Json(json!({ "echo": body })) }),
        )
        .route(
            "/rest/api/2/serverInfo",
            get(|| async { Json(json!({ "version": "test" })) }),
        )
}

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    async fn spawn_with(tweak: impl FnOnce(&mut Settings)) -> Self {
        let (upstream_addr, upstream_handle) = serve(upstream()).await;

        let cli = Cli {
            upstream_url: Some(format!("http://{upstream_addr}")),
            ..Cli::default()
        };
        let mut settings = Settings::resolve(&cli, None).unwrap();
        settings.retry = RetryPolicy::fixed(1, Duration::from_millis(10));
        settings.rate_limit = RateLimitConfig {
            rate_per_sec: 1_000.0,
            burst: 100,
        };
        settings.pool = PoolConfig::default().with_size(4, 0);
        tweak(&mut settings);

        // Same router as prod, bound to an ephemeral port.
        let services = Arc::new(build_services(&settings).unwrap());
        let (addr, api_handle) = serve(build_app(services)).await;

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            handles: vec![upstream_handle, api_handle],
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client.post(self.url(path)).json(&body).send().await.unwrap()
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    async fn next_result(&self) -> Value {
        let res = self.get("/jobs/results?timeout_ms=3000").await;
        assert_eq!(res.status(), StatusCode::OK);
        res.json().await.unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[tokio::test]
async fn health_is_ok() {
    let server = TestServer::spawn().await;
    assert_eq!(server.get("/health").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn submitted_job_result_can_be_collected() {
    let server = TestServer::spawn().await;

    let res = server
        .post(
            "/jobs",
            json!({ "job_type": "fetch_issue", "payload": { "issue_key": "OPS-1" } }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let accepted: Value = res.json().await.unwrap();

    let result = server.next_result().await;
    assert_eq!(result["job_id"], accepted["job_id"]);
    assert_eq!(result["job_type"], "fetch_issue");
    assert_eq!(result["success"], true);
    assert_eq!(result["attempts"], 1);
    assert_eq!(result["result"]["key"], "OPS-1");
}

#[tokio::test]
async fn no_result_yields_no_content() {
    let server = TestServer::spawn().await;
    let res = server.get("/jobs/results?timeout_ms=50").await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn malformed_job_is_rejected_up_front() {
    let server = TestServer::spawn().await;

    let res = server
        .post("/jobs", json!({ "job_type": "add_comment", "payload": { "issue_key": "OPS-1" } }))
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_job");

    let status: Value = server.get("/queue/status").await.json().await.unwrap();
    assert_eq!(status["job_queue"]["metrics"]["submitted"], 0);
}

#[tokio::test]
async fn failed_job_reports_upstream_status() {
    let server = TestServer::spawn().await;

    server
        .post(
            "/jobs",
            json!({ "job_type": "fetch_issue", "payload": { "issue_key": "OPS-404" } }),
        )
        .await;

    let result = server.next_result().await;
    assert_eq!(result["success"], false);
    assert_eq!(result["attempts"], 1);
    assert_eq!(result["error"]["kind"], "status");
    assert_eq!(result["error"]["detail"]["code"], 404);
}

#[tokio::test]
async fn full_queue_returns_service_unavailable() {
    let server = TestServer::spawn_with(|s| {
        s.job_queue.engine = EngineConfig::default()
            .with_name("job-queue")
            .with_workers(1)
            .with_queue_capacity(1);
    })
    .await;
    let slow = json!({ "job_type": "fetch_issue", "payload": { "issue_key": "OPS-SLOW" } });

    assert_eq!(server.post("/jobs", slow.clone()).await.status(), StatusCode::ACCEPTED);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.post("/jobs", slow.clone()).await.status(), StatusCode::ACCEPTED);

    let res = server.post("/jobs", slow).await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "queue_full");

    let status: Value = server.get("/queue/status").await.json().await.unwrap();
    assert_eq!(status["job_queue"]["metrics"]["rejected"], 1);
}

#[tokio::test]
async fn backlog_is_admitted_by_priority() {
    let server = TestServer::spawn_with(|s| {
        s.job_queue.engine = EngineConfig::default().with_name("job-queue").with_workers(1);
    })
    .await;

    for (key, priority) in [("OPS-1", 1), ("OPS-2", 9), ("OPS-3", 5)] {
        let res = server
            .post(
                "/queue/backlog",
                json!({
                    "job_type": "fetch_issue",
                    "payload": { "issue_key": key },
                    "priority": priority,
                }),
            )
            .await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
    }

    let parked: Vec<Value> = server.get("/queue/backlog").await.json().await.unwrap();
    let priorities: Vec<_> = parked.iter().map(|j| j["priority"].as_i64().unwrap()).collect();
    assert_eq!(priorities, vec![9, 5, 1]);

    let admitted: Value = server.post("/queue/backlog/admit", json!({})).await.json().await.unwrap();
    assert_eq!(admitted, json!({ "admitted": 3, "remaining": 0 }));

    let mut keys = Vec::new();
    for _ in 0..3 {
        keys.push(server.next_result().await["result"]["key"].clone());
    }
    assert_eq!(keys, vec![json!("OPS-2"), json!("OPS-3"), json!("OPS-1")]);
}

#[tokio::test]
async fn backlog_can_be_cleared() {
    let server = TestServer::spawn().await;
    for key in ["OPS-1", "OPS-2"] {
        server
            .post(
                "/queue/backlog",
                json!({ "job_type": "fetch_issue", "payload": { "issue_key": key } }),
            )
            .await;
    }

    let res = server
        .client
        .delete(server.url("/queue/backlog"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cleared: Value = res.json().await.unwrap();
    assert_eq!(cleared["removed"], 2);

    let status: Value = server.get("/queue/status").await.json().await.unwrap();
    assert_eq!(status["backlog_len"], 0);
}

#[tokio::test]
async fn operation_runs_through_the_dispatcher() {
    let server = TestServer::spawn().await;

    let res = server
        .post(
            "/operations",
            json!({ "type": "create", "fields": { "summary": "new issue" } }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["result"]["key"], "OPS-100");
    assert_eq!(body["result"]["sent"]["fields"]["summary"], "new issue");

    let status: Value = server.get("/queue/status").await.json().await.unwrap();
    assert_eq!(status["dispatcher"]["metrics"]["succeeded"], 1);
    assert_eq!(status["pool"]["created"], 1);
}

#[tokio::test]
async fn operation_errors_map_to_http_statuses() {
    let server = TestServer::spawn().await;

    let unknown = server
        .post("/operations", json!({ "type": "archive", "issue_key": "OPS-1" }))
        .await;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
    let body: Value = unknown.json().await.unwrap();
    assert_eq!(body["error"], "invalid_operation");

    let missing = server
        .post("/operations", json!({ "type": "fetch", "issue_key": "OPS-404" }))
        .await;
    assert_eq!(missing.status(), StatusCode::BAD_GATEWAY);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["error"], "upstream_error");
    assert_eq!(body["upstream_status"], 404);
}

#[tokio::test]
async fn batch_outcomes_keep_input_order() {
    let server = TestServer::spawn().await;

    let res = server
        .post(
            "/operations/batch",
            json!([
                { "type": "fetch", "issue_key": "OPS-1" },
                { "type": "fetch", "issue_key": "OPS-404" },
                { "type": "search", "jql": "project = OPS" },
            ]),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let outcomes: Vec<Value> = res.json().await.unwrap();

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0]["result"]["key"], "OPS-1");
    assert_eq!(outcomes[1]["success"], false);
    assert_eq!(outcomes[1]["error"]["kind"], "status");
    assert_eq!(outcomes[2]["result"]["echo"]["maxResults"], 50);
}

#[tokio::test]
async fn pool_endpoints_report_state() {
    let server = TestServer::spawn_with(|s| {
        s.pool = PoolConfig::default().with_size(4, 2);
    })
    .await;

    let report: Value = server.post("/pool/health-check", json!({})).await.json().await.unwrap();
    assert_eq!(report["replenished"], 2);

    let stats: Value = server.get("/pool/stats").await.json().await.unwrap();
    assert_eq!(stats["idle"], 2);
    assert_eq!(stats["max_size"], 4);
}
