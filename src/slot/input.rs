//! The consumer side of a connection: tracks an independent read cursor over
//! a shared ring buffer, with optional one-deep caching and a bounded wait
//! (spec.md §4.3, §8 scenario 3).
//!
//! Grounded on the original's `ISlotIn` (`retrieve`/`release`/`getStatus`)
//! and the teacher's SPSC consumer (`kaos/src/disruptor/spsc/consumer.rs`).
//! Interior mutability uses atomics/`parking_lot::Mutex` rather than
//! `Cell`/`RefCell`: an `InputSlot` is shared (via `Arc`) between the
//! orchestration thread and the owning processor's worker thread, and must
//! therefore be `Sync`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::barrier::Barrier;
use crate::constants::{HIGH_WATER_FRACTION, MAX_N_MESSAGES};
use crate::data::{Datatype, RingItem};
use crate::ring_buffer::RingBuffer;
use crate::sequence::{AtomicSequence, INITIAL, TERMINATED};
use crate::stream_info::UpstreamStreamInfo;

#[cfg(test)]
use crate::constants::TIME_OUT_INFINITE;

/// Snapshot returned alongside (or in lieu of) retrieved data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrieveStatus {
    /// `false` once the upstream producer has terminated the stream.
    pub alive: bool,
    /// Items handed back by the call that produced this status.
    pub read: u64,
    /// Published-but-not-yet-retrieved items still waiting behind this slot.
    pub backlog: i64,
}

impl Default for RetrieveStatus {
    fn default() -> Self {
        Self {
            alive: true,
            read: 0,
            backlog: 0,
        }
    }
}

pub struct InputSlot<T: RingItem> {
    ring: Arc<RingBuffer<T>>,
    read_sequence: Arc<AtomicSequence>,
    barrier: Barrier,
    upstream_info: Option<Arc<dyn UpstreamStreamInfo>>,
    pending: AtomicU64,
    cache: Mutex<Option<T>>,
    cache_enabled: bool,
    time_out_us: i64,
    last_status: Mutex<RetrieveStatus>,
    warn_counter: AtomicU64,
}

impl<T: RingItem> InputSlot<T> {
    /// Attaches a new consumer to `ring`, registering its read cursor as a
    /// gating sequence so the producer cannot overwrite what this slot has
    /// not yet retrieved. `upstream_info` lets this slot's owning processor
    /// inspect the producer's negotiated `StreamInfo` during
    /// `complete_stream_info` (spec.md §4.4); `None` is only legal for
    /// synthetic/test rings not backed by a real `OutputSlot`.
    pub fn connect(
        ring: Arc<RingBuffer<T>>,
        upstream_info: Option<Arc<dyn UpstreamStreamInfo>>,
        cache_enabled: bool,
        time_out_us: i64,
    ) -> Self {
        let read_sequence = Arc::new(AtomicSequence::new(INITIAL));
        ring.add_gating_sequence(read_sequence.clone());
        let barrier = Barrier::new(ring.cursor_handle(), vec![], ring.wait_strategy()).with_shared_alert(ring.shutdown_handle());
        Self {
            ring,
            read_sequence,
            barrier,
            upstream_info,
            pending: AtomicU64::new(0),
            cache: Mutex::new(None),
            cache_enabled,
            time_out_us,
            last_status: Mutex::new(RetrieveStatus::default()),
            warn_counter: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> RetrieveStatus {
        *self.last_status.lock()
    }

    /// Whether the upstream output slot has finalized its `StreamInfo`.
    pub fn upstream_finalized(&self) -> bool {
        self.upstream_info.as_ref().is_some_and(|u| u.is_finalized())
    }

    pub fn upstream_datatype(&self) -> Option<Arc<dyn Datatype>> {
        self.upstream_info.as_ref().and_then(|u| u.datatype())
    }

    pub fn upstream_stream_rate(&self) -> f64 {
        self.upstream_info.as_ref().map(|u| u.stream_rate()).unwrap_or(0.0)
    }

    fn next_unseen(&self) -> i64 {
        self.read_sequence.get() + self.pending.load(Ordering::Relaxed) as i64 + 1
    }

    fn record_status(&self, alive: bool, read: u64) {
        let backlog = if alive {
            (self.ring.cursor() - self.next_unseen() + 1).max(0)
        } else {
            0
        };
        *self.last_status.lock() = RetrieveStatus { alive, read, backlog };

        if alive && backlog as f64 > HIGH_WATER_FRACTION * self.ring.capacity() as f64 {
            let warned = self.warn_counter.fetch_add(1, Ordering::Relaxed);
            if warned % MAX_N_MESSAGES == 0 {
                warn!(backlog, capacity = self.ring.capacity(), "input slot backlog above high-water mark");
            }
        }
    }

    /// Retrieves the next item, waiting up to `time_out_us` microseconds
    /// (this slot's configured timeout) for it to appear. If the timeout
    /// elapses and caching is enabled, re-hands the previously retrieved
    /// item instead of blocking further; `release` still advances the
    /// cursor only once across any number of such repeats.
    pub fn retrieve_one(&self) -> Option<T> {
        let target = self.next_unseen();
        let available = self.barrier.wait_for_timeout(target, self.time_out_us);

        if available == TERMINATED {
            self.record_status(false, 0);
            return None;
        }

        if available >= target {
            // SAFETY: `target` has been published (available >= target) and
            // this slot is the only reader of its own read cursor's frontier.
            let item = unsafe { self.ring.get(target) }.clone();
            if self.cache_enabled {
                *self.cache.lock() = Some(item.clone());
            }
            self.pending.fetch_add(1, Ordering::Relaxed);
            self.record_status(true, 1);
            return Some(item);
        }

        // Timed out before `target` was published.
        if self.cache_enabled {
            if let Some(cached) = self.cache.lock().clone() {
                self.record_status(true, 1);
                return Some(cached);
            }
        }
        self.record_status(true, 0);
        None
    }

    /// Retrieves up to `n` items, waiting up to `time_out_us` for the full
    /// count. Returns fewer than `n` only if the timeout elapsed with some
    /// (possibly zero) items already available; caching never applies here.
    pub fn retrieve_n(&self, n: usize) -> Vec<T> {
        debug_assert!(n > 0, "retrieve_n requires n > 0");
        let base = self.next_unseen();
        let target = base + n as i64 - 1;
        let available = self.barrier.wait_for_timeout(target, self.time_out_us);

        if available == TERMINATED {
            self.record_status(false, 0);
            return Vec::new();
        }

        let last = available.min(target);
        if last < base {
            self.record_status(true, 0);
            return Vec::new();
        }
        let items = self.read_range(base, last);
        self.pending.fetch_add(items.len() as u64, Ordering::Relaxed);
        self.record_status(true, items.len() as u64);
        items
    }

    /// Retrieves every item published since the last retrieve/release,
    /// without waiting.
    pub fn retrieve_all(&self) -> Vec<T> {
        let cursor = self.ring.cursor();
        if cursor == TERMINATED {
            self.record_status(false, 0);
            return Vec::new();
        }
        let base = self.next_unseen();
        if cursor < base {
            self.record_status(true, 0);
            return Vec::new();
        }
        let items = self.read_range(base, cursor);
        self.pending.fetch_add(items.len() as u64, Ordering::Relaxed);
        self.record_status(true, items.len() as u64);
        items
    }

    fn read_range(&self, from: i64, to: i64) -> Vec<T> {
        (from..=to)
            // SAFETY: every sequence in `from..=to` is <= the barrier's
            // observed available sequence, i.e. already published.
            .map(|seq| unsafe { self.ring.get(seq) }.clone())
            .collect()
    }

    /// Advances this slot's read cursor past every item retrieved since the
    /// last `release`, freeing the corresponding ring slots for the producer.
    /// A no-op if nothing is pending.
    pub fn release(&self) {
        let n = self.pending.swap(0, Ordering::AcqRel);
        if n == 0 {
            return;
        }
        let current = self.read_sequence.get();
        let advanced = current.checked_add(n as i64).unwrap_or(i64::MAX);
        self.read_sequence.set(advanced);
    }

    /// Forcibly advances this slot's read cursor to `TERMINATED`, releasing
    /// whatever backpressure it was exerting on its producer without going
    /// through the normal retrieve/release accounting (spec.md §4.6
    /// `StopProcessing`: every input slot is force-released during shutdown
    /// so a still-running upstream processor is not left stalled).
    pub fn force_release(&self) {
        self.pending.store(0, Ordering::Relaxed);
        self.read_sequence.set(TERMINATED);
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    pub fn time_out_us(&self) -> i64 {
        self.time_out_us
    }
}
