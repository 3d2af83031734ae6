//! Barrier: a blocking wait primitive over one producer cursor and zero or
//! more dependent sequences (spec.md §4.1).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::sequence::{AtomicSequence, TERMINATED};
use crate::wait_strategy::WaitStrategy;

/// Blocks until the smallest of (producer cursor, dependent sequences) reaches
/// a target, or until alerted. In the typical topology `dependents` is empty
/// and the barrier directly tracks the producer's cursor.
pub struct Barrier {
    producer: Arc<AtomicSequence>,
    dependents: Vec<Arc<AtomicSequence>>,
    alerted: Arc<AtomicBool>,
    strategy: Arc<dyn WaitStrategy>,
}

impl Barrier {
    pub fn new(
        producer: Arc<AtomicSequence>,
        dependents: Vec<Arc<AtomicSequence>>,
        strategy: Arc<dyn WaitStrategy>,
    ) -> Self {
        Self {
            producer,
            dependents,
            alerted: Arc::new(AtomicBool::new(false)),
            strategy,
        }
    }

    /// Shares the alert flag with another barrier (e.g. all barriers
    /// derived from the same ring buffer should be alerted together).
    pub fn with_shared_alert(mut self, alerted: Arc<AtomicBool>) -> Self {
        self.alerted = alerted;
        self
    }

    pub fn alert_flag(&self) -> Arc<AtomicBool> {
        self.alerted.clone()
    }

    /// The smallest relevant sequence right now.
    fn available(&self) -> i64 {
        let mut min = self.producer.get();
        for dep in &self.dependents {
            min = min.min(dep.get());
        }
        min
    }

    /// Blocks until the smallest relevant sequence >= `target`.
    /// Returns `TERMINATED` if the barrier was alerted while waiting.
    pub fn wait_for(&self, target: i64) -> i64 {
        if self.alerted.load(Ordering::Acquire) {
            return TERMINATED;
        }
        let ready = || self.available() >= target;
        if self.strategy.park(&ready, &self.alerted) {
            self.available()
        } else {
            TERMINATED
        }
    }

    /// As `wait_for`, but gives up after `timeout_us` microseconds and returns
    /// the current (possibly insufficient) available sequence instead of
    /// blocking forever. `timeout_us < 0` means infinite (delegates to
    /// `wait_for`).
    pub fn wait_for_timeout(&self, target: i64, timeout_us: i64) -> i64 {
        if timeout_us < 0 {
            return self.wait_for(target);
        }
        if self.alerted.load(Ordering::Acquire) {
            return TERMINATED;
        }
        let ready = || self.available() >= target;
        let timed_out_or_alerted = !self
            .strategy
            .park_timeout(&ready, &self.alerted, Duration::from_micros(timeout_us as u64));
        if timed_out_or_alerted && self.alerted.load(Ordering::Acquire) {
            return TERMINATED;
        }
        self.available()
    }

    /// Raises the sticky alert flag and wakes all waiters.
    pub fn alert(&self) {
        self.alerted.store(true, Ordering::Release);
        self.strategy.signal_all();
    }

    pub fn is_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }
}
