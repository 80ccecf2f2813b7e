//! Job queue with bounded admission, a fixed worker pool, and a bounded
//! result queue.
//!
//! ## Components
//!
//! - `Job`: typed unit of work with an opaque payload
//! - `JobHandler`: caller-supplied execution step (`handler_fn` for closures)
//! - `JobQueue`: submit, collect results, admit from a priority backlog, stop

mod handler;
mod queue;
mod types;

pub use handler::{FnHandler, JobHandler, handler_fn};
pub use queue::{JobQueue, JobQueueConfig};
pub use types::{Job, JobResult, JobType};
