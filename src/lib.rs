//! Asynchronous dependency-graph job loader.
//!
//! Batches of named jobs with declared prerequisites are admitted through
//! [`Loader::schedule`] and executed on a bounded pool of worker threads,
//! respecting dependency order and per-job priorities. Cancellation and
//! failures propagate through unfinished dependents, and both foreign threads
//! and job bodies themselves can block on [`Job::wait`].

pub mod error;
pub mod job;
pub mod loader;
pub mod metrics;
pub mod task;

pub use error::{Error, Result};
pub use job::{Job, JobId, JobSet, JobStatus};
pub use loader::{Builder, Loader};
pub use metrics::Gauge;
pub use task::Task;

#[cfg(test)]
pub(crate) mod test_utils;
