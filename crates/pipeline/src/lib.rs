//! Node runtime: resolves each node's inputs from the graph and fires it.
//!
//! - [`inputs`]: walking edges to the values a node consumes.
//! - [`jobs`]: the detached work a firing performs (generation calls,
//!   matting on the blocking pool).
//! - [`NodeRuntime`]: in-flight bookkeeping and write-back into the
//!   board hierarchy.

pub mod error;
pub mod inputs;
pub mod jobs;
pub mod runtime;

pub use error::RuntimeError;
pub use jobs::{Job, JobKind, JobOutput};
pub use runtime::{Firing, NodeRuntime};
