use crate::job::Job;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Key of the ready queue: strict priority order first, admission order
/// within a priority band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReadyKey {
    pub(crate) priority: i64,
    pub(crate) seqno: u64,
}

impl Ord for ReadyKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority pops first, FIFO within the same priority.
        other
            .priority
            .cmp(&self.priority)
            .then(self.seqno.cmp(&other.seqno))
    }
}

impl PartialOrd for ReadyKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority-ordered set of jobs whose dependencies have all succeeded.
#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    entries: BTreeMap<ReadyKey, Arc<Job>>,
    next_seqno: u64,
}

impl ReadyQueue {
    /// Enqueue at `priority`, returning the seqno needed to address the entry
    /// later.
    pub(crate) fn push(&mut self, priority: i64, job: Arc<Job>) -> u64 {
        self.next_seqno += 1;
        let seqno = self.next_seqno;
        self.entries.insert(ReadyKey { priority, seqno }, job);
        seqno
    }

    /// Pop the highest-priority ready job.
    pub(crate) fn pop(&mut self) -> Option<(ReadyKey, Arc<Job>)> {
        self.entries.pop_first()
    }

    pub(crate) fn remove(&mut self, key: ReadyKey) -> Option<Arc<Job>> {
        self.entries.remove(&key)
    }

    /// Move an entry to a new priority, keeping its admission seqno.
    pub(crate) fn reprioritize(&mut self, key: ReadyKey, priority: i64) {
        if let Some(job) = self.entries.remove(&key) {
            self.entries.insert(
                ReadyKey {
                    priority,
                    seqno: key.seqno,
                },
                job,
            );
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(name: &str) -> Arc<Job> {
        Job::new(name, [], |_: &Job| Ok(()))
    }

    #[test]
    fn pops_by_priority_then_admission_order() {
        let mut queue = ReadyQueue::default();
        queue.push(0, job("first_normal"));
        queue.push(-1, job("low"));
        queue.push(0, job("second_normal"));
        queue.push(5, job("urgent"));

        let order: Vec<String> = std::iter::from_fn(|| queue.pop())
            .map(|(_, job)| job.name().to_string())
            .collect();
        assert_eq!(order, ["urgent", "first_normal", "second_normal", "low"]);
    }

    #[test]
    fn reprioritize_keeps_admission_order_within_the_new_band() {
        let mut queue = ReadyQueue::default();
        let seqno_a = queue.push(0, job("a"));
        queue.push(1, job("b"));

        queue.reprioritize(
            ReadyKey {
                priority: 0,
                seqno: seqno_a,
            },
            1,
        );

        // `a` keeps its earlier seqno, so it now pops before `b`.
        let (key, first) = queue.pop().expect("queue is not empty");
        assert_eq!(first.name(), "a");
        assert_eq!(key.priority, 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn remove_by_key() {
        let mut queue = ReadyQueue::default();
        let seqno = queue.push(2, job("target"));
        assert!(queue
            .remove(ReadyKey { priority: 2, seqno })
            .is_some());
        assert_eq!(queue.len(), 0);
    }
}
