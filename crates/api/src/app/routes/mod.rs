use axum::Router;

pub mod jobs;
pub mod operations;
pub mod queue;
pub mod system;

/// Router for the admin endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/queue", queue::router())
        .nest("/pool", system::pool_router())
        .merge(jobs::router())
        .merge(operations::router())
}
