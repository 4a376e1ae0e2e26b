//! Shared helpers for the scenario tests.

use crate::job::{Job, JobSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Build a linear chain `prefix0 <- prefix1 <- ... <- prefix{count-1}`, every
/// job sharing the same body.
pub(crate) fn chain_job_set<F>(count: usize, body: F, prefix: &str) -> Vec<Arc<Job>>
where
    F: Fn(&Job) -> anyhow::Result<()> + Clone + Send + 'static,
{
    let mut jobs: Vec<Arc<Job>> = Vec::with_capacity(count);
    for i in 0..count {
        let deps: JobSet = jobs.last().cloned().into_iter().collect();
        jobs.push(Job::new(format!("{prefix}{i}"), deps, body.clone()));
    }
    jobs
}

/// Build `count` jobs where each one depends on every earlier job with the
/// given probability. Dependencies only point backwards, so the graph is
/// always acyclic.
pub(crate) fn random_job_set<F>(
    count: usize,
    dep_probability_percent: u32,
    body: F,
    prefix: &str,
) -> Vec<Arc<Job>>
where
    F: Fn(&Job) -> anyhow::Result<()> + Clone + Send + 'static,
{
    let mut jobs: Vec<Arc<Job>> = Vec::with_capacity(count);
    for i in 0..count {
        let deps: JobSet = jobs
            .iter()
            .filter(|_| fastrand::u32(0..100) < dep_probability_percent)
            .cloned()
            .collect();
        jobs.push(Job::new(format!("{prefix}{i}"), deps, body.clone()));
    }
    jobs
}

pub(crate) fn random_sleep_us(min_us: u64, max_us: u64, probability_percent: u32) {
    if fastrand::u32(0..100) < probability_percent {
        thread::sleep(Duration::from_micros(fastrand::u64(min_us..=max_us)));
    }
}
