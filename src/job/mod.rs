//! Jobs: units of work with a dependency set.
//!
//! A job is created `Pending`, shared via `Arc`, and admitted to a
//! [`Loader`](crate::loader::Loader) through `schedule`. Its body runs at
//! most once, after every dependency reached [`JobStatus::Success`], and the
//! job then settles into exactly one terminal status. Foreign threads (and
//! other job bodies) observe it through [`Job::status`] and [`Job::wait`].

mod id;

use crate::error::Result;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

pub use id::JobId;

/// A set of shared job references, deduplicated by job identity.
pub type JobSet = HashSet<Arc<Job>>;

/// Signature of a job body. The body receives the job itself so it can
/// introspect its own name and effective priority.
pub type JobBody = Box<dyn FnOnce(&Job) -> anyhow::Result<()> + Send + 'static>;

/// Lifecycle status of a job.
///
/// A job leaves `Pending` at most once; `Success` and `Failed` are terminal.
/// Note that a job whose body is currently executing still reads as
/// `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobStatus {
    Pending = 0,
    Success = 1,
    Failed = 2,
}

impl JobStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Success,
            2 => Self::Failed,
            _ => unreachable!("invalid job status discriminant: {raw}"),
        }
    }
}

/// A unit of work with a dependency set.
///
/// Dependencies are declared at construction time and never change
/// afterwards; graphs with cycles are legal to construct and are rejected at
/// `schedule` time.
pub struct Job {
    id: JobId,
    name: String,

    /// Bound exactly once, at construction time.
    deps: OnceLock<JobSet>,

    /// Taken exactly once, at dispatch time.
    body: Mutex<Option<JobBody>>,

    /// Mirrors the terminal outcome so `status()` needs no lock.
    status: AtomicU8,

    /// Effective priority. Raised (never lowered) when the job is referenced
    /// from a higher-priority schedule call.
    priority: AtomicI64,

    /// Number of threads currently blocked in `wait()`.
    waiters: AtomicUsize,

    /// Terminal record, set once, and the condition waiters block on.
    outcome: Mutex<Option<Result<()>>>,
    finished: Condvar,
}

impl Job {
    /// Create a `Pending` job with an immutable dependency set.
    pub fn new<I, F>(name: impl Into<String>, deps: I, body: F) -> Arc<Self>
    where
        I: IntoIterator<Item = Arc<Job>>,
        F: FnOnce(&Job) -> anyhow::Result<()> + Send + 'static,
    {
        let job = Self::new_unbound(name, body);
        job.deps
            .set(deps.into_iter().collect())
            .unwrap_or_else(|_| unreachable!("freshly created job already has dependencies"));
        job
    }

    /// Test-only constructor that leaves the dependency set unbound, so the
    /// test suite can assemble graphs that declaration order makes impossible
    /// (a cycle needs a job to depend on one created after it). Bind with
    /// [`Job::bind_deps_for_test`] before scheduling.
    #[cfg(test)]
    pub(crate) fn new_unbound_for_test<F>(name: impl Into<String>, body: F) -> Arc<Self>
    where
        F: FnOnce(&Job) -> anyhow::Result<()> + Send + 'static,
    {
        Self::new_unbound(name, body)
    }

    #[cfg(test)]
    pub(crate) fn bind_deps_for_test(&self, deps: JobSet) {
        assert!(
            self.deps.set(deps).is_ok(),
            "job dependencies already bound"
        );
    }

    fn new_unbound<F>(name: impl Into<String>, body: F) -> Arc<Self>
    where
        F: FnOnce(&Job) -> anyhow::Result<()> + Send + 'static,
    {
        Arc::new(Self {
            id: JobId::next(),
            name: name.into(),
            deps: OnceLock::new(),
            body: Mutex::new(Some(Box::new(body))),
            status: AtomicU8::new(JobStatus::Pending as u8),
            priority: AtomicI64::new(0),
            waiters: AtomicUsize::new(0),
            outcome: Mutex::new(None),
            finished: Condvar::new(),
        })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Jobs that must reach `Success` before this job may execute.
    pub fn dependencies(&self) -> &JobSet {
        self.deps.get().expect("job dependencies not bound")
    }

    /// Current lifecycle status. Lock-free.
    pub fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Effective priority as seen by the scheduler, observable from inside
    /// the job's own body.
    pub fn priority(&self) -> i64 {
        self.priority.load(Ordering::Relaxed)
    }

    /// Number of threads currently blocked in [`Job::wait`]. Lock-free.
    pub fn waiters_count(&self) -> usize {
        self.waiters.load(Ordering::Relaxed)
    }

    /// The error recorded for a `Failed` job.
    pub fn error(&self) -> Option<crate::error::Error> {
        match self.status() {
            JobStatus::Failed => self
                .outcome
                .lock()
                .as_ref()
                .and_then(|outcome| outcome.as_ref().err().cloned()),
            JobStatus::Pending | JobStatus::Success => None,
        }
    }

    /// Block until the job reaches a terminal status.
    ///
    /// Returns immediately with `Ok(())` if the job already succeeded, or
    /// with the recorded error if it already failed. Otherwise the calling
    /// thread is parked on the job until it terminates. A worker calling this
    /// from inside a body hands its dispatch slot back for the duration of
    /// the wait, so the waited-for job can always be dispatched.
    pub fn wait(&self) -> Result<()> {
        if self.status() != JobStatus::Pending {
            return self.terminal_outcome();
        }

        let _slot = crate::loader::worker::release_slot_during_wait();
        let mut outcome = self.outcome.lock();
        if outcome.is_none() {
            self.waiters.fetch_add(1, Ordering::Release);
            while outcome.is_none() {
                self.finished.wait(&mut outcome);
            }
            self.waiters.fetch_sub(1, Ordering::Release);
        }
        outcome
            .as_ref()
            .expect("woken without a terminal outcome")
            .clone()
    }

    fn terminal_outcome(&self) -> Result<()> {
        self.outcome
            .lock()
            .as_ref()
            .expect("terminal job has an outcome")
            .clone()
    }

    /// Record the terminal outcome and release all waiters. Called by the
    /// scheduler exactly once per job.
    pub(crate) fn finish(&self, result: Result<()>) {
        let status = if result.is_ok() {
            JobStatus::Success
        } else {
            JobStatus::Failed
        };
        let mut outcome = self.outcome.lock();
        debug_assert!(outcome.is_none(), "job '{}' finished twice", self.name);
        *outcome = Some(result);
        self.status.store(status as u8, Ordering::Release);
        self.finished.notify_all();
    }

    pub(crate) fn take_body(&self) -> Option<JobBody> {
        self.body.lock().take()
    }

    pub(crate) fn set_priority(&self, priority: i64) {
        self.priority.store(priority, Ordering::Relaxed);
    }
}

// Identity, equality and hashing of a job is its process-unique id.
impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl Hash for Job {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status())
            .field("priority", &self.priority())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Job: Send, Sync);
    assert_impl_all!(JobStatus: Send, Sync, Copy);

    fn noop(_: &Job) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn fresh_job_is_pending() {
        let job = Job::new("fresh", [], noop);
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.priority(), 0);
        assert_eq!(job.waiters_count(), 0);
        assert!(job.error().is_none());
    }

    #[test]
    fn wait_returns_the_recorded_outcome() {
        let ok = Job::new("ok", [], noop);
        ok.finish(Ok(()));
        assert_eq!(ok.status(), JobStatus::Success);
        assert!(ok.wait().is_ok());

        let failed = Job::new("failed", [], noop);
        failed.finish(Err(Error::Canceled {
            name: "failed".into(),
        }));
        assert_eq!(failed.status(), JobStatus::Failed);
        assert!(matches!(failed.wait(), Err(Error::Canceled { .. })));
        assert!(matches!(failed.error(), Some(Error::Canceled { .. })));
    }

    #[test]
    fn jobs_hash_by_identity_not_name() {
        let a = Job::new("same_name", [], noop);
        let b = Job::new("same_name", [], noop);
        let set: JobSet = [Arc::clone(&a), Arc::clone(&b), Arc::clone(&a)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn dependencies_are_deduplicated() {
        let dep = Job::new("dep", [], noop);
        let job = Job::new("job", [Arc::clone(&dep), Arc::clone(&dep)], noop);
        assert_eq!(job.dependencies().len(), 1);
    }
}
