use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque ID that uniquely identifies a job within the process.
///
/// IDs are allocated at [`Job::new`] time and never reused, so scheduler maps
/// keyed by `JobId` stay unambiguous even after the job itself is gone.
///
/// [`Job::new`]: crate::job::Job::new
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct JobId(NonZeroU64);

impl JobId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);

        // Safety: this number is unimaginably large. Even at a billion jobs
        // per second it would take centuries to wrap around.
        let Some(id) = NonZeroU64::new(id) else {
            Self::exhausted();
        };

        Self(id)
    }

    #[cold]
    fn exhausted() -> ! {
        panic!("failed to generate unique job ID: bitspace exhausted")
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn job_ids_are_unique() {
        let n = 13;
        let ids: HashSet<JobId> = (0..n).map(|_| JobId::next()).collect();
        assert_eq!(ids.len(), n);
    }
}
