//! Failure taxonomy shared by the execution engines.
//!
//! `TaskError` is a *value*: engines never panic on a single task's failure,
//! they deliver a `TaskError` through the result queue or the operation's
//! callback. Classification into transient vs fatal lives here so the retry
//! policy and every collaborator agree on it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Network-level failure categories observed before a response was received.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorKind {
    ConnectionRefused,
    ConnectionReset,
    /// DNS, TLS, protocol errors and anything else; not retried.
    Other,
}

impl NetworkErrorKind {
    pub fn from_io(kind: std::io::ErrorKind) -> Self {
        use std::io::ErrorKind;
        match kind {
            ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                Self::ConnectionReset
            }
            _ => Self::Other,
        }
    }
}

impl core::fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::ConnectionRefused => "connection refused",
            Self::ConnectionReset => "connection reset",
            Self::Other => "network error",
        };
        f.write_str(s)
    }
}

/// Failure of a unit of work (job or operation).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TaskError {
    /// Transport failure before any response.
    #[error("{kind}: {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    /// The remote service answered with a non-success status.
    #[error("upstream returned status {code}: {message}")]
    Status { code: u16, message: String },

    /// The attempt did not finish within its deadline.
    #[error("operation timed out")]
    Timeout,

    /// A local resource (pooled client, queue slot) was not available in time.
    #[error("resource unavailable: {0}")]
    Unavailable(String),

    /// Non-retryable failure.
    #[error("{0}")]
    Fatal(String),

    /// The retry budget was consumed; `last` is the final underlying failure.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<TaskError> },

    /// The engine was stopped before the work could finish.
    #[error("processor closed")]
    ShutDown,

    /// The work was cancelled by its producer.
    #[error("cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn network(kind: NetworkErrorKind, msg: impl Into<String>) -> Self {
        Self::Network {
            kind,
            message: msg.into(),
        }
    }

    pub fn status(code: u16, msg: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: msg.into(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn exhausted(attempts: u32, last: TaskError) -> Self {
        Self::RetriesExhausted {
            attempts,
            last: Box::new(last),
        }
    }

    /// Transport status code, when the failure carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            Self::RetriesExhausted { last, .. } => last.status_code(),
            _ => None,
        }
    }

    /// Default transient/fatal classification.
    ///
    /// Transient: connection refused/reset, timeouts, local resource
    /// exhaustion, and the status codes accepted by [`is_retryable_status`].
    /// Everything else (including already-exhausted and shut-down failures)
    /// is fatal.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { kind, .. } => !matches!(kind, NetworkErrorKind::Other),
            Self::Status { code, .. } => is_retryable_status(*code),
            Self::Timeout | Self::Unavailable(_) => true,
            Self::Fatal(_) | Self::RetriesExhausted { .. } | Self::ShutDown | Self::Cancelled => {
                false
            }
        }
    }
}

/// Status codes that indicate rate limiting or transient server unavailability.
///
/// 501, 505 and 511 are 5xx answers that will not change on retry.
pub fn is_retryable_status(code: u16) -> bool {
    match code {
        408 | 429 => true,
        501 | 505 | 511 => false,
        500..=599 => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        for code in [408, 429, 500, 502, 503, 504] {
            assert!(TaskError::status(code, "x").is_transient(), "{code}");
        }
    }

    #[test]
    fn client_errors_and_permanent_server_errors_are_fatal() {
        for code in [400, 401, 403, 404, 409, 422, 501, 505, 511] {
            assert!(!TaskError::status(code, "x").is_transient(), "{code}");
        }
    }

    #[test]
    fn network_classification_follows_kind() {
        assert!(TaskError::network(NetworkErrorKind::ConnectionRefused, "down").is_transient());
        assert!(TaskError::network(NetworkErrorKind::ConnectionReset, "reset").is_transient());
        assert!(!TaskError::network(NetworkErrorKind::Other, "tls").is_transient());
        assert!(TaskError::Timeout.is_transient());
    }

    #[test]
    fn terminal_markers_are_never_transient() {
        let exhausted = TaskError::exhausted(3, TaskError::Timeout);
        assert!(!exhausted.is_transient());
        assert!(!TaskError::ShutDown.is_transient());
        assert!(!TaskError::fatal("bad input").is_transient());
    }

    #[test]
    fn exhausted_error_references_last_failure() {
        let err = TaskError::exhausted(4, TaskError::status(503, "maintenance"));
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(
            err.to_string(),
            "retries exhausted after 4 attempts: upstream returned status 503: maintenance"
        );
    }

    #[test]
    fn io_kinds_map_to_network_kinds() {
        use std::io::ErrorKind;
        assert_eq!(
            NetworkErrorKind::from_io(ErrorKind::ConnectionRefused),
            NetworkErrorKind::ConnectionRefused
        );
        assert_eq!(
            NetworkErrorKind::from_io(ErrorKind::BrokenPipe),
            NetworkErrorKind::ConnectionReset
        );
        assert_eq!(NetworkErrorKind::from_io(ErrorKind::NotFound), NetworkErrorKind::Other);
    }

    #[test]
    fn serializes_with_kind_tag() {
        let v = serde_json::to_value(TaskError::status(429, "slow down")).unwrap();
        assert_eq!(v["kind"], "status");
        assert_eq!(v["detail"]["code"], 429);
    }
}
