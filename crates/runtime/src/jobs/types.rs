//! Core job types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tracklane_core::{JobId, TaskError};

use crate::engine::Task;
use crate::priority_queue::Prioritized;

/// Job type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    FetchIssue,
    UpdateIssue,
    SearchIssues,
    CreateIssue,
    AddComment,
    TransitionIssue,
    /// Bulk refresh of cached issue data
    SyncProject,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::FetchIssue => "fetch_issue",
            JobType::UpdateIssue => "update_issue",
            JobType::SearchIssues => "search_issues",
            JobType::CreateIssue => "create_issue",
            JobType::AddComment => "add_comment",
            JobType::TransitionIssue => "transition_issue",
            JobType::SyncProject => "sync_project",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work for the [`JobQueue`](super::JobQueue).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    /// Advisory inside the admission queue; honoured by the backlog.
    pub priority: i32,
    pub payload: Value,
    /// Attempts already made.
    pub retries: u32,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_type: JobType, payload: Value) -> Self {
        Self {
            id: JobId::new(),
            job_type,
            priority: 0,
            payload,
            retries: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Task for Job {
    type Id = JobId;

    fn id(&self) -> JobId {
        self.id
    }

    fn attempt(&self) -> u32 {
        self.retries
    }

    fn next_attempt(&mut self) {
        self.retries += 1;
    }
}

impl Prioritized for Job {
    type Key = JobId;

    fn key(&self) -> &JobId {
        &self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// Terminal outcome of a job, delivered at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub job_type: JobType,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    /// Attempts made, the last one included.
    pub attempts: u32,
    pub duration_ms: u64,
}

impl JobResult {
    pub(crate) fn new(job: &Job, outcome: Result<Value, TaskError>, elapsed: Duration) -> Self {
        // A job resolved by shutdown never started its pending attempt.
        let attempts = match &outcome {
            Err(TaskError::ShutDown) => job.retries,
            _ => job.retries + 1,
        };
        let (success, result, error) = match outcome {
            Ok(value) => (true, Some(value), None),
            Err(err) => (false, None, Some(err)),
        };
        Self {
            job_id: job.id,
            job_type: job.job_type,
            success,
            result,
            error,
            attempts,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn into_result(self) -> Result<Value, TaskError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}
