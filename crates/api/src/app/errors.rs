use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use tracklane_core::TaskError;
use tracklane_runtime::QueueError;

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    match err {
        QueueError::Full => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "queue_full",
            "queue is full, try again later",
        ),
        QueueError::Closed => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "shut_down",
            "queue is shutting down",
        ),
        QueueError::NoResult => StatusCode::NO_CONTENT.into_response(),
    }
}

pub fn task_error_to_response(err: TaskError) -> axum::response::Response {
    match err {
        TaskError::Unavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg)
        }
        TaskError::ShutDown => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "shut_down",
            "dispatcher is shutting down",
        ),
        TaskError::Timeout => json_error(
            StatusCode::GATEWAY_TIMEOUT,
            "upstream_timeout",
            "upstream did not answer in time",
        ),
        other => {
            let status = other.status_code();
            (
                StatusCode::BAD_GATEWAY,
                axum::Json(json!({
                    "error": "upstream_error",
                    "message": other.to_string(),
                    "upstream_status": status,
                    "detail": other,
                })),
            )
                .into_response()
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
