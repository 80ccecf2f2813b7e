//! Issue-tracker side of the execution core: the remote client, its pooled
//! factory, typed operations, the operation dispatcher, and the job handler
//! that feeds queued jobs through the same pool.

pub mod client;
pub mod dispatcher;
pub mod factory;
pub mod jobs;
pub mod operation;

pub use client::{HttpTrackerClient, TrackerClient, TrackerConfig};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use factory::HttpClientFactory;
pub use jobs::TrackerJobHandler;
pub use operation::{Callback, Operation, OperationRequest};
