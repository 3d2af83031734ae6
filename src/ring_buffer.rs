//! Lock-free, fixed-capacity ring buffer (spec.md §4.2).
//!
//! One producer claims and publishes contiguous ranges; many consumers track
//! independent read cursors registered back on the buffer as gating
//! sequences, which hold the producer back from overwriting unread items.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::data::RingItem;
use crate::error::{AxonError, Result};
use crate::sequence::{AtomicSequence, INITIAL, TERMINATED};
use crate::wait_strategy::WaitStrategy;

/// Marker returned when a wait was cut short by shutdown rather than success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terminated;

/// A contiguous range of sequences reserved by `claim`, to be filled in and
/// handed to `publish`.
#[derive(Debug, Clone, Copy)]
pub struct ClaimedRange {
    pub start: i64,
    pub end: i64,
}

impl ClaimedRange {
    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

pub struct RingBuffer<T: RingItem> {
    cells: Box<[UnsafeCell<T>]>,
    mask: i64,
    capacity: usize,
    cursor: Arc<AtomicSequence>,
    gating: RwLock<Vec<Arc<AtomicSequence>>>,
    wait_strategy: Arc<dyn WaitStrategy>,
    shutdown: Arc<AtomicBool>,
}

// SAFETY: access to `cells` is only ever performed through sequence-gated
// `claim`/`get`/`publish`, which guarantee exclusive producer access while
// `seq > cursor` and shared read-only access to consumers thereafter.
unsafe impl<T: RingItem> Send for RingBuffer<T> {}
unsafe impl<T: RingItem> Sync for RingBuffer<T> {}

impl<T: RingItem> RingBuffer<T> {
    /// `capacity` must be a power of two >= 2. `factory` constructs each
    /// long-lived cell once (factory-preallocated object pool design note).
    pub fn new(capacity: usize, wait_strategy: Arc<dyn WaitStrategy>, factory: impl Fn() -> T) -> Result<Self> {
        if capacity < 2 || !capacity.is_power_of_two() {
            return Err(AxonError::config(format!(
                "ring buffer capacity must be a power of two >= 2, got {capacity}"
            )));
        }
        let cells: Box<[UnsafeCell<T>]> = (0..capacity).map(|_| UnsafeCell::new(factory())).collect();
        Ok(Self {
            cells,
            mask: (capacity - 1) as i64,
            capacity,
            cursor: Arc::new(AtomicSequence::new(INITIAL)),
            gating: RwLock::new(Vec::new()),
            wait_strategy,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The producer's cursor, shared so a `Barrier` can track it directly.
    pub fn cursor_handle(&self) -> Arc<AtomicSequence> {
        self.cursor.clone()
    }

    pub fn cursor(&self) -> i64 {
        self.cursor.get()
    }

    /// Registers the downstream read sequences that hold the producer back.
    /// Per design note, the gating set is treated as immutable once the ring
    /// has started taking claims for a run; callers should only add slots
    /// during graph construction, before `PrepareProcessing`.
    pub fn set_gating_sequences(&self, sequences: Vec<Arc<AtomicSequence>>) {
        *self.gating.write() = sequences;
    }

    pub fn add_gating_sequence(&self, sequence: Arc<AtomicSequence>) {
        self.gating.write().push(sequence);
    }

    fn min_gating(&self) -> i64 {
        self.gating
            .read()
            .iter()
            .map(|s| s.get())
            .min()
            .unwrap_or(INITIAL)
    }

    #[inline]
    fn index_of(&self, seq: i64) -> usize {
        (seq & self.mask) as usize
    }

    /// Reserves `n` contiguous sequences beyond the current cursor. Blocks
    /// (per the output port's wait strategy) until the gating constraint
    /// relaxes, or returns `Err(Terminated)` if `force_publish`/shutdown
    /// raced us while waiting.
    pub fn claim(&self, n: i64) -> std::result::Result<ClaimedRange, Terminated> {
        debug_assert!(n > 0);
        let current = self.cursor.get();
        let start = current + 1;
        let end = current + n;
        let wrap_point = end - self.capacity as i64;

        let ready = || wrap_point <= self.min_gating();
        if !self.wait_strategy.park(&ready, &self.shutdown) {
            return Err(Terminated);
        }
        Ok(ClaimedRange { start, end })
    }

    /// Returns the cell for `seq`. Mutable to the producer while
    /// `seq > cursor`, read-only to consumers after `publish`.
    ///
    /// # Safety
    /// The caller must only call this for a sequence it has exclusively
    /// claimed (producer) or that has already been published (consumer).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get(&self, seq: i64) -> &mut T {
        &mut *self.cells[self.index_of(seq)].get()
    }

    /// Stores `batch.end` into the producer cursor with release ordering
    /// and wakes any parked waiters.
    pub fn publish(&self, batch: ClaimedRange) {
        self.cursor.set(batch.end);
        self.wait_strategy.signal_all();
    }

    /// Unconditionally sets the cursor (used for shutdown, to push
    /// `TERMINATED` so blocked consumers see `alive = false`).
    pub fn force_publish(&self, seq: i64) {
        self.cursor.set(seq);
        self.shutdown.store(true, Ordering::Release);
        self.wait_strategy.signal_all();
    }

    pub fn shutdown_flag(&self) -> &AtomicBool {
        &self.shutdown
    }

    /// A shared handle to the shutdown flag, so a consumer's `Barrier` can be
    /// alerted by the same event that unblocks the producer (design note:
    /// shutdown is carried by the ring, not re-derived per slot).
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn wait_strategy(&self) -> Arc<dyn WaitStrategy> {
        self.wait_strategy.clone()
    }
}
