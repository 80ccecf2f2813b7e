//! Typed remote operations and their completion callbacks.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use tracklane_core::{OperationId, TaskError};
use tracklane_runtime::{Job, JobType, Task};

use crate::client::TrackerClient;

fn default_max_results() -> u32 {
    50
}

const SYNC_PAGE_SIZE: u32 = 100;

/// JQL string literal for an untrusted value.
fn jql_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// What to do against the tracker. Tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationRequest {
    Fetch {
        issue_key: String,
        #[serde(default)]
        fields: Vec<String>,
    },
    Search {
        jql: String,
        #[serde(default)]
        start_at: u32,
        #[serde(default = "default_max_results")]
        max_results: u32,
    },
    Update {
        issue_key: String,
        fields: Value,
    },
    Create {
        fields: Value,
    },
    Comment {
        issue_key: String,
        body: String,
    },
    Transition {
        issue_key: String,
        transition_id: String,
    },
}

impl OperationRequest {
    /// Parse a tagged request. Unknown tags and malformed payloads are fatal.
    pub fn from_json(value: Value) -> Result<Self, TaskError> {
        serde_json::from_value(value).map_err(|e| TaskError::fatal(format!("invalid operation: {e}")))
    }

    /// Interpret a queued job's payload as a tracker request. The job type
    /// selects the tag; the payload must be an object carrying its fields.
    /// `sync_project` expands to a search over `{"project": KEY}`.
    pub fn from_job(job: &Job) -> Result<Self, TaskError> {
        let Value::Object(fields) = &job.payload else {
            return Err(TaskError::fatal(format!(
                "{} payload must be an object",
                job.job_type
            )));
        };

        let tag = match job.job_type {
            JobType::FetchIssue => "fetch",
            JobType::SearchIssues => "search",
            JobType::UpdateIssue => "update",
            JobType::CreateIssue => "create",
            JobType::AddComment => "comment",
            JobType::TransitionIssue => "transition",
            JobType::SyncProject => {
                let project = fields
                    .get("project")
                    .and_then(Value::as_str)
                    .ok_or_else(|| TaskError::fatal("sync_project requires a project key"))?;
                return Ok(OperationRequest::Search {
                    jql: format!("project = {} ORDER BY updated DESC", jql_quote(project)),
                    start_at: 0,
                    max_results: SYNC_PAGE_SIZE,
                });
            }
        };

        let mut tagged = fields.clone();
        tagged.insert("type".to_string(), Value::String(tag.to_string()));
        Self::from_json(Value::Object(tagged))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OperationRequest::Fetch { .. } => "fetch",
            OperationRequest::Search { .. } => "search",
            OperationRequest::Update { .. } => "update",
            OperationRequest::Create { .. } => "create",
            OperationRequest::Comment { .. } => "comment",
            OperationRequest::Transition { .. } => "transition",
        }
    }

    /// Perform one attempt with `client`. Operations without a response body
    /// yield `Value::Null`.
    pub async fn run<C: TrackerClient + ?Sized>(&self, client: &C) -> Result<Value, TaskError> {
        match self {
            OperationRequest::Fetch { issue_key, fields } => {
                client.fetch_issue(issue_key, fields).await
            }
            OperationRequest::Search {
                jql,
                start_at,
                max_results,
            } => client.search_issues(jql, *start_at, *max_results).await,
            OperationRequest::Update { issue_key, fields } => {
                client.update_issue(issue_key, fields).await?;
                Ok(Value::Null)
            }
            OperationRequest::Create { fields } => client.create_issue(fields).await,
            OperationRequest::Comment { issue_key, body } => {
                client.add_comment(issue_key, body).await
            }
            OperationRequest::Transition {
                issue_key,
                transition_id,
            } => {
                client.transition_issue(issue_key, transition_id).await?;
                Ok(Value::Null)
            }
        }
    }
}

/// Invoked exactly once with the terminal outcome of an operation.
pub type Callback = Box<dyn FnOnce(Result<Value, TaskError>) + Send + 'static>;

/// A queued operation: the request plus its delivery and retry state.
pub struct Operation {
    pub id: OperationId,
    pub request: OperationRequest,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    /// Per-attempt deadline. Exceeding it cancels the remote call and counts
    /// as a retryable timeout.
    pub timeout: Option<Duration>,
    retries: u32,
    cancel: CancellationToken,
    callback: std::sync::Mutex<Option<Callback>>,
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("kind", &self.request.kind())
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Operation {
    pub fn new<F>(request: OperationRequest, callback: F) -> Self
    where
        F: FnOnce(Result<Value, TaskError>) + Send + 'static,
    {
        Self {
            id: OperationId::new(),
            request,
            priority: 0,
            created_at: Utc::now(),
            timeout: None,
            retries: 0,
            cancel: CancellationToken::new(),
            callback: std::sync::Mutex::new(Some(Box::new(callback))),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Tie the operation to a producer-held token. Once cancelled, no further
    /// attempt starts and the callback receives [`TaskError::Cancelled`]. An
    /// attempt already running is not interrupted.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this operation.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Hand the outcome to the callback. Returns `false` if it was already used.
    pub(crate) fn resolve(&mut self, outcome: Result<Value, TaskError>) -> bool {
        let slot = self.callback.get_mut().unwrap_or_else(|e| e.into_inner());
        match slot.take() {
            Some(callback) => {
                callback(outcome);
                true
            }
            None => false,
        }
    }
}

impl Task for Operation {
    type Id = OperationId;

    fn id(&self) -> OperationId {
        self.id
    }

    fn attempt(&self) -> u32 {
        self.retries
    }

    fn next_attempt(&mut self) {
        self.retries += 1;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_tagged_requests_with_defaults() {
        let req = OperationRequest::from_json(json!({ "type": "search", "jql": "project = OPS" }))
            .unwrap();
        assert_eq!(
            req,
            OperationRequest::Search {
                jql: "project = OPS".into(),
                start_at: 0,
                max_results: 50,
            }
        );
        assert_eq!(req.kind(), "search");
    }

    #[test]
    fn unknown_tag_is_fatal() {
        let err = OperationRequest::from_json(json!({ "type": "delete", "issue_key": "OPS-1" }))
            .unwrap_err();
        assert!(matches!(err, TaskError::Fatal(ref m) if m.contains("delete")));
        assert!(!err.is_transient());
    }

    #[test]
    fn missing_fields_are_fatal() {
        let err = OperationRequest::from_json(json!({ "type": "comment", "issue_key": "OPS-1" }))
            .unwrap_err();
        assert!(matches!(err, TaskError::Fatal(_)));
    }

    #[test]
    fn jobs_map_onto_requests() {
        let job = Job::new(
            JobType::AddComment,
            json!({ "issue_key": "OPS-3", "body": "done" }),
        );
        assert_eq!(
            OperationRequest::from_job(&job).unwrap(),
            OperationRequest::Comment {
                issue_key: "OPS-3".into(),
                body: "done".into(),
            }
        );

        let sync = Job::new(JobType::SyncProject, json!({ "project": "OPS" }));
        assert_eq!(
            OperationRequest::from_job(&sync).unwrap(),
            OperationRequest::Search {
                jql: r#"project = "OPS" ORDER BY updated DESC"#.into(),
                start_at: 0,
                max_results: 100,
            }
        );
    }

    #[test]
    fn sync_project_key_cannot_alter_the_query() {
        let job = Job::new(
            JobType::SyncProject,
            json!({ "project": r#"X" OR project = "Y\"# }),
        );
        let OperationRequest::Search { jql, .. } = OperationRequest::from_job(&job).unwrap() else {
            panic!("expected a search");
        };
        assert_eq!(
            jql,
            r#"project = "X\" OR project = \"Y\\" ORDER BY updated DESC"#
        );
    }

    #[test]
    fn job_payload_type_field_is_overridden() {
        let job = Job::new(
            JobType::FetchIssue,
            json!({ "type": "create", "issue_key": "OPS-9" }),
        );
        assert_eq!(
            OperationRequest::from_job(&job).unwrap(),
            OperationRequest::Fetch {
                issue_key: "OPS-9".into(),
                fields: vec![],
            }
        );
    }

    #[test]
    fn bad_job_payloads_are_fatal() {
        let scalar = Job::new(JobType::FetchIssue, json!("OPS-1"));
        assert!(matches!(
            OperationRequest::from_job(&scalar),
            Err(TaskError::Fatal(_))
        ));

        let no_project = Job::new(JobType::SyncProject, json!({}));
        assert!(matches!(
            OperationRequest::from_job(&no_project),
            Err(TaskError::Fatal(_))
        ));
    }

    #[test]
    fn callback_fires_once() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut op = Operation::new(
            OperationRequest::Create { fields: json!({}) },
            move |outcome| tx.send(outcome).unwrap(),
        );

        assert!(op.resolve(Ok(json!(1))));
        assert!(!op.resolve(Ok(json!(2))));
        assert_eq!(rx.try_recv().unwrap(), Ok(json!(1)));
        assert!(rx.try_recv().is_err());
    }
}
