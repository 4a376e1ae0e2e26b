//! Worker threads of the loader pool.
//!
//! Workers are spawned on demand whenever the loader is running and the ready
//! queue holds more jobs than there are idle workers, and they exit as soon
//! as there is nothing left to dispatch. At most `max_threads` workers exist
//! at any instant, plus one replacement for every worker parked in a nested
//! [`Job::wait`](crate::job::Job::wait).

use crate::job::Job;
use crate::loader::scheduler::Scheduler;
use crate::loader::Loader;
use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use tracing::debug;

thread_local! {
    /// The loader this thread is a worker of, set for the duration of the
    /// dispatch loop. `Job::wait` consults it to hand the dispatch slot back
    /// while the worker is parked on another job.
    static WORKER_OF: RefCell<Option<Loader>> = const { RefCell::new(None) };
}

/// Spawn workers until every ready job has one. Requires the scheduler mutex
/// to be held by the caller.
pub(crate) fn spawn_workers(loader: &Loader, state: &mut Scheduler) {
    while state.should_spawn(loader.0.max_threads) {
        state.add_worker();
        loader.0.total_threads.inc();
        let seq = loader.0.worker_seq.fetch_add(1, Ordering::Relaxed);
        let worker = loader.clone();
        thread::Builder::new()
            .name(format!("{}-{}", loader.0.thread_name, seq))
            .spawn(move || worker_loop(worker))
            .expect("failed to spawn worker thread");
    }
}

fn worker_loop(loader: Loader) {
    WORKER_OF.with(|cell| *cell.borrow_mut() = Some(loader.clone()));
    debug!("worker started");

    while let Some(job) = loader.next_job() {
        execute(&loader, job);
    }

    WORKER_OF.with(|cell| cell.borrow_mut().take());
    debug!("worker exiting");
}

fn execute(loader: &Loader, job: Arc<Job>) {
    debug!(job = %job.name(), priority = job.priority(), "job dispatched");
    let body = job.take_body().expect("job body is taken exactly once");
    let result = {
        let _active = loader.0.active_threads.increment_scope();
        panic::catch_unwind(AssertUnwindSafe(|| body(&job))).unwrap_or_else(|payload| {
            Err(anyhow::anyhow!(
                "job body panicked: {}",
                panic_message(payload.as_ref())
            ))
        })
    };
    loader.finish_job(&job, result);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// If the calling thread is one of a loader's workers, release its dispatch
/// slot until the returned guard drops. Foreign threads get `None`.
pub(crate) fn release_slot_during_wait() -> Option<SuspendedWorker> {
    let loader = WORKER_OF.with(|cell| cell.borrow().clone())?;
    loader.suspend_worker();
    Some(SuspendedWorker(loader))
}

/// RAII slot release for a worker parked in a nested `Job::wait`.
pub(crate) struct SuspendedWorker(Loader);

impl Drop for SuspendedWorker {
    fn drop(&mut self) {
        self.0.resume_worker();
    }
}
