use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::app::dto::{JobAccepted, ResultsQuery, SubmitJobRequest};
use crate::app::{errors, services::AppServices};

const DEFAULT_RESULT_WAIT: Duration = Duration::from_secs(1);
const MAX_RESULT_WAIT: Duration = Duration::from_secs(30);

pub fn router() -> Router {
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/results", get(next_result))
}

/// POST /jobs - Enqueue a job; 503 when the queue has no room
pub async fn submit_job(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<SubmitJobRequest>,
) -> axum::response::Response {
    let job = match body.into_job() {
        Ok(job) => job,
        Err(resp) => return resp,
    };

    match services.jobs.submit(job).await {
        Ok(job_id) => (StatusCode::ACCEPTED, Json(JobAccepted { job_id })).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

/// GET /jobs/results?timeout_ms= - Next finished job, or 204 when none arrives in time
pub async fn next_result(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<ResultsQuery>,
) -> axum::response::Response {
    let wait = query
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_RESULT_WAIT)
        .min(MAX_RESULT_WAIT);

    match services.jobs.get_result(wait).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}
