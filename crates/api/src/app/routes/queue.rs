//! Queue status and the priority backlog.
//!
//! The backlog holds jobs that should not take a queue slot yet. Admission
//! moves them into the job queue, highest priority first, while slots are free.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::info;

use tracklane_runtime::Job;

use crate::app::dto::{
    BacklogAdmitted, BacklogCleared, BacklogParked, EngineStatus, QueueStatus, RateLimiterStatus,
    SubmitJobRequest,
};
use crate::app::services::AppServices;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/status", get(status))
        .route(
            "/backlog",
            get(list_backlog).post(park_job).delete(clear_backlog),
        )
        .route("/backlog/admit", post(admit_backlog))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /queue/status - Engine metrics, backlog length, pool and limiter state
pub async fn status(Extension(services): Extension<Arc<AppServices>>) -> Json<QueueStatus> {
    let limiter = &services.limiter;
    Json(QueueStatus {
        job_queue: EngineStatus {
            queue_len: services.jobs.queue_len(),
            stopped: services.jobs.is_stopped(),
            metrics: services.jobs.metrics(),
        },
        dispatcher: EngineStatus {
            queue_len: services.dispatcher.queue_len(),
            stopped: services.dispatcher.is_closed(),
            metrics: services.dispatcher.metrics(),
        },
        backlog_len: services.backlog.len(),
        pool: services.pool.stats(),
        rate_limiter: RateLimiterStatus {
            rate_per_sec: limiter.rate(),
            capacity: limiter.capacity(),
            available: limiter.available(),
        },
    })
}

/// GET /queue/backlog - Parked jobs in serving order
pub async fn list_backlog(Extension(services): Extension<Arc<AppServices>>) -> Json<Vec<Job>> {
    Json(services.backlog.get_all())
}

/// POST /queue/backlog - Park a job without taking a queue slot
pub async fn park_job(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<SubmitJobRequest>,
) -> axum::response::Response {
    let job = match body.into_job() {
        Ok(job) => job,
        Err(resp) => return resp,
    };
    let job_id = job.id;
    services.backlog.push(job);

    (
        StatusCode::ACCEPTED,
        Json(BacklogParked {
            job_id,
            backlog_len: services.backlog.len(),
        }),
    )
        .into_response()
}

/// DELETE /queue/backlog - Discard every parked job
pub async fn clear_backlog(
    Extension(services): Extension<Arc<AppServices>>,
) -> Json<BacklogCleared> {
    let removed = services.backlog.clear();
    info!(removed, "backlog cleared");
    Json(BacklogCleared { removed })
}

/// POST /queue/backlog/admit - Move parked jobs into the job queue
pub async fn admit_backlog(
    Extension(services): Extension<Arc<AppServices>>,
) -> Json<BacklogAdmitted> {
    let admitted = services.jobs.admit_backlog(&services.backlog);
    Json(BacklogAdmitted {
        admitted,
        remaining: services.backlog.len(),
    })
}
