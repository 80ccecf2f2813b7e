//! `tracklane-core`: shared building blocks for the execution core.
//!
//! This crate contains **no I/O**: identifiers and the failure taxonomy that
//! every engine and collaborator agrees on.

pub mod error;
pub mod id;

pub use error::{NetworkErrorKind, TaskError, is_retryable_status};
pub use id::{ClientId, IdParseError, JobId, OperationId};
