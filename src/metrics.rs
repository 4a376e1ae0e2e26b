//! Injected metric counters.
//!
//! The loader does not own a metrics registry. The embedding application
//! hands it two [`Gauge`] handles at construction time and the loader keeps
//! them up to date: one mirrors the size of the worker pool, the other the
//! number of workers currently inside a job body.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// A shared integer counter handle.
///
/// Cloning a gauge yields another handle to the same counter, so the
/// application keeps one clone for reading and gives the other to the loader.
#[derive(Clone, Default)]
pub struct Gauge(Arc<AtomicI64>);

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of the counter.
    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    /// Increment now, decrement when the returned guard drops. The guard runs
    /// on the unwind path too, so a panicking job body cannot skew the count.
    pub(crate) fn increment_scope(&self) -> GaugeGuard {
        self.inc();
        GaugeGuard(self.clone())
    }
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Gauge").field(&self.value()).finish()
    }
}

#[must_use]
pub(crate) struct GaugeGuard(Gauge);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}
