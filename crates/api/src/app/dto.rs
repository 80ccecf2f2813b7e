use serde::{Deserialize, Serialize};
use serde_json::Value;

use tracklane_core::{JobId, TaskError};
use tracklane_runtime::{EngineMetrics, Job, JobType, PoolStats};
use tracklane_tracker::OperationRequest;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub job_type: JobType,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub priority: i32,
}

impl SubmitJobRequest {
    /// Build the job, rejecting payloads the tracker handler could never run.
    pub fn into_job(self) -> Result<Job, axum::response::Response> {
        let job = Job::new(self.job_type, self.payload).with_priority(self.priority);
        match OperationRequest::from_job(&job) {
            Ok(_) => Ok(job),
            Err(e) => Err(errors::json_error(
                axum::http::StatusCode::BAD_REQUEST,
                "invalid_job",
                e.to_string(),
            )),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ResultsQuery {
    pub timeout_ms: Option<u64>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
pub struct EngineStatus {
    pub queue_len: usize,
    pub stopped: bool,
    pub metrics: EngineMetrics,
}

#[derive(Debug, Serialize)]
pub struct RateLimiterStatus {
    pub rate_per_sec: f64,
    pub capacity: f64,
    pub available: f64,
}

#[derive(Debug, Serialize)]
pub struct QueueStatus {
    pub job_queue: EngineStatus,
    pub dispatcher: EngineStatus,
    pub backlog_len: usize,
    pub pool: PoolStats,
    pub rate_limiter: RateLimiterStatus,
}

#[derive(Debug, Serialize)]
pub struct BacklogParked {
    pub job_id: JobId,
    pub backlog_len: usize,
}

#[derive(Debug, Serialize)]
pub struct BacklogAdmitted {
    pub admitted: usize,
    pub remaining: usize,
}

#[derive(Debug, Serialize)]
pub struct BacklogCleared {
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct OperationOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl From<Result<Value, TaskError>> for OperationOutcome {
    fn from(outcome: Result<Value, TaskError>) -> Self {
        match outcome {
            Ok(value) => Self {
                success: true,
                result: Some(value),
                error: None,
            },
            Err(err) => Self {
                success: false,
                result: None,
                error: Some(err),
            },
        }
    }
}
