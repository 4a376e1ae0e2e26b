//! The loader: admission, scheduling and the worker pool behind it.
//!
//! [`Loader`] is a cheap-to-clone handle over shared state; all clones drive
//! the same scheduler. Construction goes through [`Builder`], which injects
//! the two externally owned metric counters and bounds the pool.

mod queue;
mod scheduler;
pub(crate) mod worker;


use crate::error::{Error, Result};
use crate::job::{Job, JobSet};
use crate::metrics::Gauge;
use crate::task::Task;
use crate::loader::scheduler::Scheduler;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::thread;
use tracing::debug;

/// Configures and builds a [`Loader`].
#[derive(Debug)]
pub struct Builder {
    max_threads: Option<usize>,
    thread_name: String,
    total_threads_metric: Gauge,
    active_threads_metric: Gauge,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            max_threads: None,
            thread_name: "gantry-worker".into(),
            total_threads_metric: Gauge::new(),
            active_threads_metric: Gauge::new(),
        }
    }

    /// Upper bound on concurrently executing job bodies.
    ///
    /// Defaults to [`std::thread::available_parallelism`].
    pub fn max_threads(mut self, val: usize) -> Self {
        self.max_threads = Some(val);
        self
    }

    /// Prefix for worker thread names; workers are named `{prefix}-{n}`.
    ///
    /// The default prefix is `gantry-worker`.
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        self.thread_name = val.into();
        self
    }

    /// Counter kept equal to the current size of the worker pool.
    pub fn total_threads_metric(mut self, gauge: Gauge) -> Self {
        self.total_threads_metric = gauge;
        self
    }

    /// Counter kept equal to the number of workers currently running a body.
    pub fn active_threads_metric(mut self, gauge: Gauge) -> Self {
        self.active_threads_metric = gauge;
        self
    }

    /// Creates the configured `Loader`, initially stopped.
    pub fn try_build(self) -> Result<Loader> {
        let max_threads = match self.max_threads {
            Some(n) => n,
            None => thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        };
        if max_threads == 0 {
            return Err(Error::InvalidConfig {
                message: "max_threads must be greater than 0".into(),
            });
        }
        Ok(Loader(Arc::new(LoaderCore {
            max_threads,
            thread_name: self.thread_name,
            worker_seq: AtomicUsize::new(0),
            total_threads: self.total_threads_metric,
            active_threads: self.active_threads_metric,
            state: Mutex::new(Scheduler::default()),
            idle: Condvar::new(),
        })))
    }
}

pub(crate) struct LoaderCore {
    pub(crate) max_threads: usize,
    pub(crate) thread_name: String,
    pub(crate) worker_seq: AtomicUsize,
    pub(crate) total_threads: Gauge,
    pub(crate) active_threads: Gauge,
    pub(crate) state: Mutex<Scheduler>,
    /// Signaled whenever the last admitted job reaches a terminal status.
    idle: Condvar,
}

/// Asynchronous dependency-graph job loader.
///
/// Jobs admitted through [`schedule`](Loader::schedule) execute on a bounded
/// worker pool once [`start`](Loader::start) is called, each only after all
/// of its dependencies succeeded. Cancellation (via [`Task`]) and failures
/// propagate to unfinished dependents.
#[derive(Clone)]
pub struct Loader(pub(crate) Arc<LoaderCore>);

impl Loader {
    /// Schedule `jobs` and everything reachable through their dependencies at
    /// the default priority.
    pub fn schedule<I>(&self, jobs: I) -> Result<Task>
    where
        I: IntoIterator<Item = Arc<Job>>,
    {
        self.schedule_with_priority(jobs, 0)
    }

    /// Schedule `jobs` at `priority` (larger is more urgent).
    ///
    /// Admission is atomic: if the reachable closure contains a cycle nothing
    /// is admitted, and the error message names the jobs on the cycle. Jobs
    /// referenced here that were admitted by an earlier call are not
    /// re-admitted; their priority is raised to the maximum of old and new,
    /// and the raise propagates through their dependencies.
    ///
    /// The returned [`Task`] owns the newly admitted jobs: dropping it or
    /// calling [`Task::remove`] cancels whichever of them are still pending.
    pub fn schedule_with_priority<I>(&self, jobs: I, priority: i64) -> Result<Task>
    where
        I: IntoIterator<Item = Arc<Job>>,
    {
        let jobs: JobSet = jobs.into_iter().collect();
        let mut state = self.0.state.lock();
        let admitted = state.admit(&jobs, priority)?;
        for job in &jobs {
            if !admitted.contains(job) {
                state.prioritize(job, priority);
            }
        }
        worker::spawn_workers(self, &mut state);
        self.notify_if_idle(&state);
        drop(state);
        Ok(Task::new(self.clone(), admitted))
    }

    /// Start dispatching ready jobs.
    pub fn start(&self) {
        let mut state = self.0.state.lock();
        state.set_running(true);
        debug!("loader started");
        worker::spawn_workers(self, &mut state);
    }

    /// Stop dispatching.
    ///
    /// Executing bodies run to completion; everything else stays admitted and
    /// resumes on the next [`start`](Loader::start).
    pub fn stop(&self) {
        let mut state = self.0.state.lock();
        state.set_running(false);
        debug!("loader stopped");
    }

    /// Block until every currently admitted job has reached a terminal
    /// status.
    ///
    /// If the loader is stopped while jobs are still admitted, this returns
    /// only once someone restarts the loader and the jobs finish, or a task
    /// removes them.
    pub fn wait(&self) {
        let mut state = self.0.state.lock();
        while state.has_admitted_jobs() {
            self.0.idle.wait(&mut state);
        }
    }

    /// Upper bound on concurrently executing job bodies.
    pub fn max_threads(&self) -> usize {
        self.0.max_threads
    }

    /// Worker-side completion: record the outcome and dispatch whatever just
    /// became ready.
    pub(crate) fn finish_job(&self, job: &Arc<Job>, outcome: anyhow::Result<()>) {
        let outcome = outcome.map_err(|cause| Error::Failed {
            name: job.name().to_string(),
            cause: Arc::new(cause),
        });
        let mut state = self.0.state.lock();
        state.worker_finished_job();
        state.finish(job, outcome);
        worker::spawn_workers(self, &mut state);
        self.notify_if_idle(&state);
    }

    /// Cancel the given jobs and wait until all of them are terminal.
    /// Executing jobs are never interrupted; their natural outcome stands.
    pub(crate) fn remove_jobs(&self, jobs: &JobSet) {
        let executing = {
            let mut state = self.0.state.lock();
            let executing = state.cancel(jobs);
            self.notify_if_idle(&state);
            executing
        };
        for job in executing {
            let _ = job.wait();
        }
    }

    pub(crate) fn next_job(&self) -> Option<Arc<Job>> {
        let mut state = self.0.state.lock();
        if state.is_running() {
            if let Some(job) = state.pop_ready() {
                return Some(job);
            }
        }
        state.retire_worker();
        self.0.total_threads.dec();
        None
    }

    pub(crate) fn suspend_worker(&self) {
        let mut state = self.0.state.lock();
        state.suspend_worker();
        // The freed slot may immediately admit a queued job.
        worker::spawn_workers(self, &mut state);
    }

    pub(crate) fn resume_worker(&self) {
        self.0.state.lock().resume_worker();
    }

    pub(crate) fn same_loader(&self, other: &Loader) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn notify_if_idle(&self, state: &Scheduler) {
        if !state.has_admitted_jobs() {
            self.0.idle.notify_all();
        }
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("max_threads", &self.0.max_threads)
            .field("total_threads", &self.0.total_threads)
            .field("active_threads", &self.0.active_threads)
            .finish()
    }
}
