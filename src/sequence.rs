//! Atomic monotonic sequence counters (spec.md §3, §4.1).

use std::sync::atomic::{AtomicI64, Ordering};

/// Sentinel meaning "the producer has terminated this stream".
pub const TERMINATED: i64 = i64::MAX;

/// The value a freshly constructed sequence starts at (nothing produced/read yet).
pub const INITIAL: i64 = -1;

/// A signed 64-bit monotonic counter, updated atomically.
#[derive(Debug)]
pub struct AtomicSequence(AtomicI64);

impl AtomicSequence {
    pub fn new(initial: i64) -> Self {
        Self(AtomicI64::new(initial))
    }

    #[inline]
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Release);
    }

    #[inline]
    pub fn compare_and_set(&self, current: i64, new: i64) -> bool {
        self.0
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Atomically adds `n` and returns the new value.
    #[inline]
    pub fn increment_by(&self, n: i64) -> i64 {
        self.0.fetch_add(n, Ordering::AcqRel) + n
    }
}

impl Default for AtomicSequence {
    fn default() -> Self {
        Self::new(INITIAL)
    }
}
