//! Wait strategies for ring-buffer producers and consumers (spec.md §4.1, §6).
//!
//! Each strategy trades CPU usage for latency. The choice is fixed at
//! output-port configuration time, per the port's `wait_strategy` policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Blocks a caller until a condition it cannot directly observe becomes
/// true, or until it is alerted/times out. Object-safe: callers pass the
/// "is it ready yet" check as a closure rather than as a generic parameter.
pub trait WaitStrategy: Send + Sync {
    /// Blocks until `ready()` returns true or `alerted` is set.
    /// Returns `true` if `ready()` became true, `false` if alerted.
    fn park(&self, ready: &dyn Fn() -> bool, alerted: &AtomicBool) -> bool;

    /// As `park`, but gives up after `timeout` elapses.
    /// Returns `true` only if `ready()` became true within the timeout.
    fn park_timeout(&self, ready: &dyn Fn() -> bool, alerted: &AtomicBool, timeout: Duration) -> bool;

    /// Wakes any callers blocked in `park`/`park_timeout` on a `Blocking` strategy.
    /// A no-op for strategies that never sleep on a condvar.
    fn signal_all(&self);
}

/// Pure spin loop. Lowest latency, highest CPU usage.
#[derive(Default)]
pub struct BusySpinWaitStrategy;

impl WaitStrategy for BusySpinWaitStrategy {
    fn park(&self, ready: &dyn Fn() -> bool, alerted: &AtomicBool) -> bool {
        loop {
            if ready() {
                return true;
            }
            if alerted.load(Ordering::Acquire) {
                return false;
            }
            std::hint::spin_loop();
        }
    }

    fn park_timeout(&self, ready: &dyn Fn() -> bool, alerted: &AtomicBool, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if ready() {
                return true;
            }
            if alerted.load(Ordering::Acquire) || start.elapsed() >= timeout {
                return false;
            }
            std::hint::spin_loop();
        }
    }

    fn signal_all(&self) {}
}

/// Spins briefly, then yields the CPU to other threads. Moderate latency and CPU usage.
pub struct YieldingWaitStrategy {
    spin_tries: u32,
}

impl YieldingWaitStrategy {
    pub fn new() -> Self {
        Self { spin_tries: 100 }
    }
}

impl Default for YieldingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for YieldingWaitStrategy {
    fn park(&self, ready: &dyn Fn() -> bool, alerted: &AtomicBool) -> bool {
        let mut spins = 0u32;
        loop {
            if ready() {
                return true;
            }
            if alerted.load(Ordering::Acquire) {
                return false;
            }
            if spins < self.spin_tries {
                std::hint::spin_loop();
                spins += 1;
            } else {
                thread::yield_now();
            }
        }
    }

    fn park_timeout(&self, ready: &dyn Fn() -> bool, alerted: &AtomicBool, timeout: Duration) -> bool {
        let start = Instant::now();
        let mut spins = 0u32;
        loop {
            if ready() {
                return true;
            }
            if alerted.load(Ordering::Acquire) || start.elapsed() >= timeout {
                return false;
            }
            if spins < self.spin_tries {
                std::hint::spin_loop();
                spins += 1;
            } else {
                thread::yield_now();
            }
        }
    }

    fn signal_all(&self) {}
}

/// Sleeps for a fixed duration between checks. Lowest CPU usage, highest latency.
pub struct SleepingWaitStrategy {
    sleep_duration: Duration,
}

impl SleepingWaitStrategy {
    pub fn new(sleep_duration: Duration) -> Self {
        Self { sleep_duration }
    }
}

impl Default for SleepingWaitStrategy {
    fn default() -> Self {
        Self::new(Duration::from_micros(50))
    }
}

impl WaitStrategy for SleepingWaitStrategy {
    fn park(&self, ready: &dyn Fn() -> bool, alerted: &AtomicBool) -> bool {
        loop {
            if ready() {
                return true;
            }
            if alerted.load(Ordering::Acquire) {
                return false;
            }
            thread::sleep(self.sleep_duration);
        }
    }

    fn park_timeout(&self, ready: &dyn Fn() -> bool, alerted: &AtomicBool, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if ready() {
                return true;
            }
            if alerted.load(Ordering::Acquire) || start.elapsed() >= timeout {
                return false;
            }
            thread::sleep(self.sleep_duration.min(timeout));
        }
    }

    fn signal_all(&self) {}
}

/// Parks on a condition variable, woken by `signal_all`. Balanced latency and CPU usage.
pub struct BlockingWaitStrategy {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl BlockingWaitStrategy {
    pub fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }
}

impl Default for BlockingWaitStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitStrategy for BlockingWaitStrategy {
    fn park(&self, ready: &dyn Fn() -> bool, alerted: &AtomicBool) -> bool {
        loop {
            if ready() {
                return true;
            }
            if alerted.load(Ordering::Acquire) {
                return false;
            }
            let mut guard = self.mutex.lock();
            // Re-check after acquiring the lock: publish/alert may have raced us here.
            if ready() {
                return true;
            }
            if alerted.load(Ordering::Acquire) {
                return false;
            }
            self.condvar.wait_for(&mut guard, Duration::from_millis(5));
        }
    }

    fn park_timeout(&self, ready: &dyn Fn() -> bool, alerted: &AtomicBool, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            if ready() {
                return true;
            }
            if alerted.load(Ordering::Acquire) {
                return false;
            }
            let remaining = timeout.checked_sub(start.elapsed());
            let Some(remaining) = remaining else {
                return false;
            };
            let mut guard = self.mutex.lock();
            if ready() {
                return true;
            }
            if alerted.load(Ordering::Acquire) {
                return false;
            }
            self.condvar.wait_for(&mut guard, remaining.min(Duration::from_millis(5)));
        }
    }

    fn signal_all(&self) {
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;
    use std::sync::Arc;

    #[test]
    fn busy_spin_observes_alert() {
        let strategy = BusySpinWaitStrategy;
        let alerted = AtomicBool::new(true);
        assert!(!strategy.park(&|| false, &alerted));
    }

    #[test]
    fn busy_spin_unblocks_when_ready() {
        let strategy = BusySpinWaitStrategy;
        let alerted = AtomicBool::new(false);
        let n = AtomicI64::new(0);
        assert!(strategy.park(
            &|| {
                n.fetch_add(1, Ordering::Relaxed);
                n.load(Ordering::Relaxed) > 5
            },
            &alerted
        ));
    }

    #[test]
    fn timeout_returns_false_without_alert() {
        let strategy = SleepingWaitStrategy::new(Duration::from_micros(100));
        let alerted = AtomicBool::new(false);
        let ok = strategy.park_timeout(&|| false, &alerted, Duration::from_millis(2));
        assert!(!ok);
    }

    #[test]
    fn blocking_wakes_on_signal() {
        let strategy = Arc::new(BlockingWaitStrategy::new());
        let alerted = Arc::new(AtomicBool::new(false));
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let s = strategy.clone();
        let f = flag.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            f.store(true, Ordering::Release);
            s.signal_all();
        });

        let ok = strategy.park(&|| flag.load(Ordering::Acquire), &alerted);
        assert!(ok);
        handle.join().unwrap();
    }
}
