use crate::error::{Error, Result};
use crate::job::{Job, JobId, JobSet, JobStatus};
use crate::loader::queue::{ReadyKey, ReadyQueue};
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Scheduler-side bookkeeping for one admitted job.
///
/// Reverse (dependency -> dependent) edges live here rather than on the jobs
/// themselves: jobs hold strong references to their dependencies only, so the
/// object graph stays acyclic, and the registry entry is the scheduler's
/// strong reference for the lifetime of the admission.
#[derive(Debug)]
struct JobInfo {
    job: Arc<Job>,
    /// Effective priority, mirrored into the job for body introspection.
    priority: i64,
    /// Dependencies that have not reached `Success` yet.
    dependencies_left: usize,
    /// `Some` while the job sits in the ready queue, `None` before it is
    /// ready or after a worker popped it. No dependencies left and no seqno
    /// means the body is executing right now.
    ready_seqno: Option<u64>,
    /// Admitted jobs that declared this job as a dependency.
    dependents: HashSet<JobId>,
}

impl JobInfo {
    fn is_executing(&self) -> bool {
        self.dependencies_left == 0 && self.ready_seqno.is_none()
    }
}

/// Mutable scheduler state, guarded by the loader's single mutex.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    is_running: bool,
    /// All admitted, not-yet-terminal jobs.
    scheduled: HashMap<JobId, JobInfo>,
    ready: ReadyQueue,
    /// Live worker threads.
    workers: usize,
    /// Workers currently between popping a job and finishing it.
    busy_workers: usize,
    /// Workers parked in a nested `Job::wait`; each one frees a dispatch slot
    /// while parked.
    suspended_workers: usize,
}

impl Scheduler {
    pub(crate) fn is_running(&self) -> bool {
        self.is_running
    }

    pub(crate) fn set_running(&mut self, running: bool) {
        self.is_running = running;
    }

    pub(crate) fn has_admitted_jobs(&self) -> bool {
        !self.scheduled.is_empty()
    }

    /// Whether an additional worker thread would have work to do right now.
    pub(crate) fn should_spawn(&self, max_threads: usize) -> bool {
        let idle_workers = self.workers - self.busy_workers;
        self.is_running
            && self.workers < max_threads + self.suspended_workers
            && self.ready.len() > idle_workers
    }

    pub(crate) fn add_worker(&mut self) {
        self.workers += 1;
    }

    pub(crate) fn retire_worker(&mut self) {
        self.workers -= 1;
    }

    pub(crate) fn suspend_worker(&mut self) {
        self.suspended_workers += 1;
    }

    pub(crate) fn resume_worker(&mut self) {
        self.suspended_workers -= 1;
    }

    pub(crate) fn worker_finished_job(&mut self) {
        self.busy_workers -= 1;
    }

    /// Pop the next ready job for a worker, marking it executing.
    pub(crate) fn pop_ready(&mut self) -> Option<Arc<Job>> {
        let (key, job) = self.ready.pop()?;
        let info = self
            .scheduled
            .get_mut(&job.id())
            .expect("ready job is admitted");
        debug_assert_eq!(info.ready_seqno, Some(key.seqno));
        info.ready_seqno = None;
        self.busy_workers += 1;
        Some(job)
    }

    /// Admit every not-yet-scheduled job reachable from `jobs` at `priority`,
    /// returning the newly admitted closure.
    ///
    /// Admission is atomic: the closure is gathered and cycle-checked before
    /// any state changes, so a rejected call leaves the scheduler untouched.
    pub(crate) fn admit(&mut self, jobs: &JobSet, priority: i64) -> Result<JobSet> {
        let closure = self.gather_new_jobs(jobs);
        check_cycle(&closure)?;

        // Registry entries first, so reverse edges can be linked in a single
        // pass regardless of iteration order.
        for job in &closure {
            job.set_priority(priority);
            self.scheduled.insert(
                job.id(),
                JobInfo {
                    job: Arc::clone(job),
                    priority,
                    dependencies_left: 0,
                    ready_seqno: None,
                    dependents: HashSet::new(),
                },
            );
        }

        // Link dependencies. A dependency that already failed dooms the new
        // job before it ever becomes ready; one that was admitted earlier at
        // a lower priority is pulled up to this call's priority.
        let mut doomed: Vec<(Arc<Job>, Error)> = Vec::new();
        let mut raised_deps: Vec<Arc<Job>> = Vec::new();
        for job in &closure {
            let mut left = 0;
            for dep in job.dependencies() {
                if let Some(dep_info) = self.scheduled.get_mut(&dep.id()) {
                    dep_info.dependents.insert(job.id());
                    left += 1;
                    if !closure.contains(dep) {
                        raised_deps.push(Arc::clone(dep));
                    }
                } else {
                    match dep.status() {
                        JobStatus::Success => {}
                        JobStatus::Failed => doomed.push((
                            Arc::clone(job),
                            Error::DependencyFailed {
                                name: job.name().to_string(),
                                dependency: dep.name().to_string(),
                            },
                        )),
                        // Every pending dependency is either previously
                        // admitted or part of this closure.
                        JobStatus::Pending => {
                            unreachable!("pending dependency '{}' was not admitted", dep.name())
                        }
                    }
                }
            }
            self.scheduled
                .get_mut(&job.id())
                .expect("closure job was admitted above")
                .dependencies_left = left;
        }

        for dep in raised_deps {
            self.prioritize(&dep, priority);
        }

        // A failed dependency fails the job before `start` ever dispatches
        // it; the cascade only touches blocked jobs, never ready ones.
        for (job, error) in doomed {
            self.finish(&job, Err(error));
        }

        for job in &closure {
            let unblocked = self
                .scheduled
                .get(&job.id())
                .is_some_and(|info| info.dependencies_left == 0);
            if unblocked {
                self.enqueue(job.id());
            }
        }

        debug!(admitted = closure.len(), priority, "job set admitted");
        Ok(closure)
    }

    /// All jobs transitively reachable from `jobs` through dependencies that
    /// are still pending and not yet admitted.
    fn gather_new_jobs(&self, jobs: &JobSet) -> JobSet {
        let mut new_jobs = JobSet::new();
        let mut stack: Vec<Arc<Job>> = jobs.iter().cloned().collect();
        while let Some(job) = stack.pop() {
            if self.scheduled.contains_key(&job.id()) || job.status() != JobStatus::Pending {
                continue;
            }
            if new_jobs.insert(Arc::clone(&job)) {
                stack.extend(job.dependencies().iter().cloned());
            }
        }
        new_jobs
    }

    /// Raise the priority of an already-admitted job and, recursively, of its
    /// dependencies. Priorities are never lowered.
    pub(crate) fn prioritize(&mut self, job: &Arc<Job>, priority: i64) {
        let mut stack: Vec<Arc<Job>> = vec![Arc::clone(job)];
        while let Some(job) = stack.pop() {
            let Some(info) = self.scheduled.get_mut(&job.id()) else {
                continue;
            };
            if info.priority >= priority {
                continue;
            }
            let old_key = info.ready_seqno.map(|seqno| ReadyKey {
                priority: info.priority,
                seqno,
            });
            info.priority = priority;
            job.set_priority(priority);
            if let Some(key) = old_key {
                self.ready.reprioritize(key, priority);
            }
            stack.extend(job.dependencies().iter().cloned());
        }
    }

    /// Cancel every given job that has not started executing. Returns the
    /// jobs that were executing at call time; the caller waits for those
    /// without holding the scheduler mutex.
    pub(crate) fn cancel(&mut self, jobs: &JobSet) -> Vec<Arc<Job>> {
        let mut executing = Vec::new();
        for job in jobs {
            let is_executing = match self.scheduled.get(&job.id()) {
                Some(info) => info.is_executing(),
                None => continue, // already terminal
            };
            if is_executing {
                executing.push(Arc::clone(job));
            } else {
                self.finish(
                    job,
                    Err(Error::Canceled {
                        name: job.name().to_string(),
                    }),
                );
            }
        }
        executing
    }

    /// Record a terminal status for `job`, release its waiters, and propagate
    /// the outcome: a success unblocks dependents, a failure cascades
    /// `DependencyFailed` through every still-pending dependent.
    pub(crate) fn finish(&mut self, job: &Arc<Job>, outcome: Result<()>) {
        let mut pending: Vec<(Arc<Job>, Result<()>)> = vec![(Arc::clone(job), outcome)];

        while let Some((job, outcome)) = pending.pop() {
            let Some(info) = self.scheduled.remove(&job.id()) else {
                continue; // already terminal through another propagation path
            };
            if let Some(seqno) = info.ready_seqno {
                let removed = self.ready.remove(ReadyKey {
                    priority: info.priority,
                    seqno,
                });
                debug_assert!(removed.is_some(), "ready seqno without a queue entry");
            }

            match &outcome {
                Ok(()) => debug!(job = %job.name(), "job finished"),
                Err(Error::Failed { .. }) => warn!(job = %job.name(), "job failed"),
                Err(error) => debug!(job = %job.name(), %error, "job did not run"),
            }
            let failed = outcome.is_err();
            job.finish(outcome);

            if failed {
                // Cascade: every still-admitted dependent fails without
                // running.
                for dep_id in &info.dependents {
                    if let Some(dep_info) = self.scheduled.get(dep_id) {
                        let dependent = Arc::clone(&dep_info.job);
                        let error = Error::DependencyFailed {
                            name: dependent.name().to_string(),
                            dependency: job.name().to_string(),
                        };
                        pending.push((dependent, Err(error)));
                    }
                }
                // This job will never decrement its dependencies' counters;
                // drop the stale reverse edges.
                for dep in job.dependencies() {
                    if let Some(dep_info) = self.scheduled.get_mut(&dep.id()) {
                        dep_info.dependents.remove(&job.id());
                    }
                }
            } else {
                let mut now_ready: SmallVec<[JobId; 8]> = SmallVec::new();
                for dep_id in &info.dependents {
                    let dep_info = self
                        .scheduled
                        .get_mut(dep_id)
                        .expect("dependent of a finishing job is admitted");
                    dep_info.dependencies_left -= 1;
                    if dep_info.dependencies_left == 0 {
                        now_ready.push(*dep_id);
                    }
                }
                for id in now_ready {
                    self.enqueue(id);
                }
            }
        }
    }

    /// Move a job whose dependencies are all satisfied into the ready queue.
    fn enqueue(&mut self, id: JobId) {
        let info = self
            .scheduled
            .get_mut(&id)
            .expect("enqueued job is admitted");
        debug_assert!(info.dependencies_left == 0 && info.ready_seqno.is_none());
        let seqno = self.ready.push(info.priority, Arc::clone(&info.job));
        info.ready_seqno = Some(seqno);
        debug!(job = %info.job.name(), priority = info.priority, "job ready");
    }
}

/// Depth-first search for a back-edge inside a newly gathered closure.
///
/// Previously admitted jobs passed this check when they were scheduled, and
/// dependency sets never change afterwards, so any cycle is confined to the
/// closure.
fn check_cycle(closure: &JobSet) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }

    let mut marks: HashMap<JobId, Mark> = HashMap::with_capacity(closure.len());
    for root in closure {
        if marks.contains_key(&root.id()) {
            continue;
        }
        marks.insert(root.id(), Mark::InProgress);
        // Each frame holds a job plus its not-yet-visited in-closure
        // dependencies.
        let mut path: Vec<(Arc<Job>, Vec<Arc<Job>>)> =
            vec![(Arc::clone(root), in_closure_deps(root, closure))];

        loop {
            let next = match path.last_mut() {
                Some((_, deps)) => deps.pop(),
                None => break,
            };
            match next {
                Some(dep) => match marks.get(&dep.id()) {
                    Some(Mark::InProgress) => {
                        // Back-edge: everything on the path from `dep` up to
                        // the current job lies on one cycle.
                        return Err(Error::ScheduleFailed {
                            message: format!(
                                "job dependency cycle detected: {}",
                                cycle_names(&path, &dep)
                            ),
                        });
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(dep.id(), Mark::InProgress);
                        let dep_deps = in_closure_deps(&dep, closure);
                        path.push((dep, dep_deps));
                    }
                },
                None => {
                    let (job, _) = path.pop().expect("path is non-empty");
                    marks.insert(job.id(), Mark::Done);
                }
            }
        }
    }
    Ok(())
}

fn in_closure_deps(job: &Job, closure: &JobSet) -> Vec<Arc<Job>> {
    job.dependencies()
        .iter()
        .filter(|dep| closure.contains(*dep))
        .cloned()
        .collect()
}

fn cycle_names(path: &[(Arc<Job>, Vec<Arc<Job>>)], back_to: &Arc<Job>) -> String {
    let start = path
        .iter()
        .position(|(job, _)| Arc::ptr_eq(job, back_to))
        .expect("back-edge target is on the DFS path");
    let mut names: Vec<String> = path[start..]
        .iter()
        .map(|(job, _)| format!("'{}'", job.name()))
        .collect();
    names.push(format!("'{}'", back_to.name()));
    names.join(" -> ")
}
