//! The producer side of a connection: claims cells from the backing ring
//! buffer, stamps them, and publishes (spec.md §4.3).
//!
//! Grounded on the original's `ISlotOut`/claim-fill-publish cycle and the
//! teacher's SPSC producer (`kaos/src/disruptor/spsc/producer.rs`). Interior
//! mutability uses atomics/`parking_lot::Mutex` rather than `Cell`/`RefCell`
//! since an `OutputSlot` is shared (via `Arc`) between the orchestration
//! thread that builds the graph and the processor's own worker thread, and
//! must therefore be `Sync`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::data::{Datatype, RingItem};
use crate::ring_buffer::{ClaimedRange, RingBuffer, Terminated};
use crate::stream_info::{StreamInfo, UpstreamStreamInfo};

/// One output slot of one output port. Owns the ring buffer it produces
/// into; `InputSlot`s attach to the same ring via `Arc` clones.
pub struct OutputSlot<T: RingItem, D: Datatype> {
    ring: Arc<RingBuffer<T>>,
    producer_serial: AtomicU64,
    pending_claim: Mutex<Option<ClaimedRange>>,
    stream_info: parking_lot::RwLock<StreamInfo<D>>,
    connections: AtomicUsize,
}

impl<T: RingItem, D: Datatype> OutputSlot<T, D> {
    pub fn new(ring: Arc<RingBuffer<T>>) -> Self {
        Self {
            ring,
            producer_serial: AtomicU64::new(0),
            pending_claim: Mutex::new(None),
            stream_info: parking_lot::RwLock::new(StreamInfo::new()),
            connections: AtomicUsize::new(0),
        }
    }

    pub fn ring(&self) -> Arc<RingBuffer<T>> {
        self.ring.clone()
    }

    pub fn is_finalized(&self) -> bool {
        self.stream_info.read().is_finalized()
    }

    pub fn datatype(&self) -> Option<Arc<D>> {
        self.stream_info.read().datatype_arc()
    }

    pub fn stream_rate(&self) -> f64 {
        self.stream_info.read().stream_rate()
    }

    /// Commits this slot's downstream contract. Called from the owning
    /// processor's `complete_stream_info` (spec.md §4.4), never concurrently
    /// with `datatype`/`stream_rate` reads from a downstream input slot since
    /// those only happen after this processor has finished its own
    /// `CompleteStreamInfo` call (graph builder's producer-before-consumer
    /// ordering).
    pub fn finalize_stream_info(&self, datatype: D, stream_rate: f64) -> crate::error::Result<()> {
        self.stream_info.write().finalize(datatype, stream_rate)
    }

    /// Tracked purely for introspection (`Retrieve` queries, diagnostics);
    /// does not affect claim/publish behavior.
    pub fn register_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Claims one cell, clears it if `clear` is set, and stamps a fresh
    /// serial. Must be followed by exactly one `publish` before the next
    /// `claim_one`/`claim_many` call.
    pub fn claim_one(&self, clear: bool) -> Result<&mut T, Terminated> {
        let mut items = self.claim_many(1, clear)?;
        Ok(items.pop().expect("claim_many(1, ..) returns exactly one item"))
    }

    /// Claims `n` contiguous cells. Each is cleared (if `clear`) and stamped
    /// with a distinct, monotonically increasing serial before being handed
    /// back for the caller to fill in.
    pub fn claim_many(&self, n: usize, clear: bool) -> Result<Vec<&mut T>, Terminated> {
        debug_assert!(n > 0, "claim_many requires n > 0");
        let batch = self.ring.claim(n as i64)?;
        *self.pending_claim.lock() = Some(batch);

        let mut items = Vec::with_capacity(n);
        for seq in batch.start..=batch.end {
            // SAFETY: `seq` falls within the range this call just claimed
            // exclusively; each sequence in the batch is distinct.
            let item = unsafe { self.ring.get(seq) };
            if clear {
                item.clear_data();
            }
            let serial = self.producer_serial.fetch_add(1, Ordering::Relaxed);
            item.set_serial(serial);
            items.push(item);
        }
        Ok(items)
    }

    /// Publishes the pending claim, making it visible to consumers.
    ///
    /// # Panics
    /// Panics if there is no pending claim (a `claim_one`/`claim_many` call
    /// that has not yet been published).
    pub fn publish(&self) {
        let batch = self.pending_claim.lock().take().expect("publish called with no pending claim");
        self.ring.publish(batch);
    }

    /// Force-terminates the stream: advances the cursor to `TERMINATED` and
    /// wakes every blocked consumer with `alive = false` (spec.md §4.6
    /// `StopProcessing`).
    pub fn force_publish_terminated(&self) {
        self.ring.force_publish(crate::sequence::TERMINATED);
    }
}

impl<T: RingItem, D: Datatype + 'static> UpstreamStreamInfo for OutputSlot<T, D> {
    fn is_finalized(&self) -> bool {
        OutputSlot::is_finalized(self)
    }

    fn datatype(&self) -> Option<Arc<dyn Datatype>> {
        OutputSlot::datatype(self).map(|d| d as Arc<dyn Datatype>)
    }

    fn stream_rate(&self) -> f64 {
        OutputSlot::stream_rate(self)
    }
}
