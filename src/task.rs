use crate::job::JobSet;
use crate::loader::Loader;
use std::fmt;
use std::mem;

/// Owner of the jobs admitted by one `schedule` call.
///
/// The task is the cancellation and lifetime unit exposed to callers:
/// removing it (or dropping it) cancels every owned job that is still pending
/// and waits for owned jobs that are executing to finish naturally.
#[must_use]
pub struct Task {
    loader: Loader,
    jobs: JobSet,
}

impl Task {
    pub(crate) fn new(loader: Loader, jobs: JobSet) -> Self {
        Self { loader, jobs }
    }

    /// Jobs owned by this task.
    pub fn jobs(&self) -> &JobSet {
        &self.jobs
    }

    /// Transfer ownership of `other`'s jobs into this task.
    ///
    /// Afterwards `other` is empty: removing or dropping it is a no-op.
    pub fn merge(&mut self, mut other: Task) {
        debug_assert!(
            self.loader.same_loader(&other.loader),
            "merged tasks must belong to the same loader"
        );
        self.jobs.extend(mem::take(&mut other.jobs));
    }

    /// Cancel every owned job that is still pending and wait until every
    /// owned job has reached a terminal status.
    ///
    /// Jobs that are executing are not interrupted; their natural outcome
    /// stands. Calling this twice is safe, the second call is a no-op.
    pub fn remove(&mut self) {
        let jobs = mem::take(&mut self.jobs);
        if !jobs.is_empty() {
            self.loader.remove_jobs(&jobs);
        }
    }

    /// Give up ownership without cancelling: the jobs stay scheduled and this
    /// task's drop becomes a no-op.
    pub fn detach(&mut self) {
        self.jobs.clear();
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.remove();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("jobs", &self.jobs.len())
            .finish()
    }
}
