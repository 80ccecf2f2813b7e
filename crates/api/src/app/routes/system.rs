use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use tracklane_runtime::{HealthReport, PoolStats};

use crate::app::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub fn pool_router() -> Router {
    Router::new()
        .route("/stats", get(pool_stats))
        .route("/health-check", post(pool_health_check))
}

/// GET /pool/stats
pub async fn pool_stats(Extension(services): Extension<Arc<AppServices>>) -> Json<PoolStats> {
    Json(services.pool.stats())
}

/// POST /pool/health-check - Run one health cycle now
pub async fn pool_health_check(
    Extension(services): Extension<Arc<AppServices>>,
) -> Json<HealthReport> {
    Json(services.pool.health_check().await)
}
