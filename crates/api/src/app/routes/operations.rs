use std::sync::Arc;

use axum::{
    extract::Extension, http::StatusCode, response::IntoResponse, routing::post, Json, Router,
};
use serde_json::{json, Value};

use tracklane_tracker::OperationRequest;

use crate::app::dto::OperationOutcome;
use crate::app::{errors, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/operations", post(execute))
        .route("/operations/batch", post(execute_batch))
}

/// POST /operations - Run one tagged operation and wait for its outcome
pub async fn execute(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<Value>,
) -> axum::response::Response {
    let request = match OperationRequest::from_json(body) {
        Ok(request) => request,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_operation", e.to_string());
        }
    };

    match services.dispatcher.execute(request).await {
        Ok(result) => Json(json!({ "result": result })).into_response(),
        Err(e) => errors::task_error_to_response(e),
    }
}

/// POST /operations/batch - Run several operations; outcomes keep input order
pub async fn execute_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<Vec<Value>>,
) -> axum::response::Response {
    let mut requests = Vec::with_capacity(body.len());
    for (index, raw) in body.into_iter().enumerate() {
        match OperationRequest::from_json(raw) {
            Ok(request) => requests.push(request),
            Err(e) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_operation",
                    format!("operation {index}: {e}"),
                );
            }
        }
    }

    let outcomes: Vec<OperationOutcome> = services
        .dispatcher
        .submit_batch(requests)
        .await
        .into_iter()
        .map(OperationOutcome::from)
        .collect();
    Json(outcomes).into_response()
}
