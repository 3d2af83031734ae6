//! Output ports: the producer-facing half of a connection point. One port
//! may carry several independent output slots (e.g. several identically
//! typed streams out of one processor); each slot owns its own ring buffer
//! and may fan out to any number of downstream input slots.

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::data::{Datatype, RingItem};
use crate::error::{AxonError, Result};
use crate::port::policy::{round_up_capacity, OutputPortPolicy};
use crate::ring_buffer::RingBuffer;
use crate::slot::OutputSlot;
use crate::stream_info::UpstreamStreamInfo;

/// Object-safe view of an output port, used by the graph/connection layer
/// without needing to know the concrete payload type `T`.
pub trait AnyOutputPort: Send + Sync {
    fn name(&self) -> &str;
    fn slot_count(&self) -> usize;
    fn max_slots(&self) -> i32;
    fn min_slots(&self) -> i32;

    /// Reserves a slot index: `requested < 0` auto-assigns the next free
    /// index, otherwise reserves exactly that index (spec.md §4.3 reserve
    /// rule table). Returns the reserved index.
    fn reserve_slot(&self, requested: i32) -> Result<usize>;

    /// The reserved slot's backing ring buffer, type-erased so the input
    /// side of a connection can downcast it back to `Arc<RingBuffer<T>>`.
    fn ring_any(&self, slot: usize) -> Option<Arc<dyn Any + Send + Sync>>;

    /// The slot's negotiated datatype, available only after
    /// `CompleteStreamInfo` has run.
    fn datatype_any(&self, slot: usize) -> Option<Arc<dyn Datatype>>;

    /// A type-erased handle to the slot's `StreamInfo`, handed to the
    /// downstream input slot at connect time so its owning processor can
    /// inspect datatype/rate during its own `complete_stream_info`.
    fn upstream_info(&self, slot: usize) -> Option<Arc<dyn UpstreamStreamInfo>>;

    fn register_connection(&self, slot: usize);

    /// Force-terminates every slot this port owns (spec.md §4.6
    /// `StopProcessing`), independent of which ones ever got a consumer.
    fn force_terminate_all(&self);

    /// This port's declared datatype descriptor, set once at construction
    /// time in `create_ports` and independent of any slot's negotiated
    /// `StreamInfo`. Compared against a connecting input port's own
    /// declared datatype at connect time (spec.md §4.6 step 4).
    fn declared_datatype(&self) -> Arc<dyn Datatype>;

    /// Overrides this port's ring-buffer capacity, e.g. from the graph's
    /// per-port `advanced.buffer_sizes` config (spec.md §6). Must be called
    /// before any slot on this port is reserved; has no effect on slots
    /// already allocated.
    fn override_buffer_size(&self, size: usize);
}

pub struct OutputPort<T: RingItem, D: Datatype> {
    name: String,
    policy: OutputPortPolicy,
    datatype: Arc<D>,
    buffer_size_override: RwLock<Option<usize>>,
    slots: RwLock<Vec<Arc<OutputSlot<T, D>>>>,
}

impl<T: RingItem, D: Datatype> OutputPort<T, D> {
    pub fn new(name: impl Into<String>, policy: OutputPortPolicy, datatype: D) -> Self {
        Self {
            name: name.into(),
            policy,
            datatype: Arc::new(datatype),
            buffer_size_override: RwLock::new(None),
            slots: RwLock::new(Vec::new()),
        }
    }

    pub fn policy(&self) -> &OutputPortPolicy {
        &self.policy
    }

    pub fn datatype(&self) -> &Arc<D> {
        &self.datatype
    }

    pub fn slot(&self, idx: usize) -> Option<Arc<OutputSlot<T, D>>> {
        self.slots.read().get(idx).cloned()
    }

    pub fn slots(&self) -> Vec<Arc<OutputSlot<T, D>>> {
        self.slots.read().clone()
    }

    fn effective_buffer_size(&self) -> usize {
        self.buffer_size_override.read().map_or_else(|| self.policy.effective_buffer_size(), round_up_capacity)
    }

    fn allocate_slot(&self) -> Arc<OutputSlot<T, D>> {
        let ring = Arc::new(
            RingBuffer::new(self.effective_buffer_size(), self.policy.wait_strategy.build(), T::default)
                .expect("buffer_size rounded to a valid power of two"),
        );
        Arc::new(OutputSlot::new(ring))
    }
}

impl<T: RingItem, D: Datatype + 'static> AnyOutputPort for OutputPort<T, D> {
    fn name(&self) -> &str {
        &self.name
    }

    fn slot_count(&self) -> usize {
        self.slots.read().len()
    }

    fn max_slots(&self) -> i32 {
        self.policy.max_slots
    }

    fn min_slots(&self) -> i32 {
        self.policy.min_slots
    }

    fn reserve_slot(&self, requested: i32) -> Result<usize> {
        let mut slots = self.slots.write();
        let idx = if requested < 0 {
            slots.len()
        } else {
            requested as usize
        };
        if idx as i32 >= self.policy.max_slots {
            return Err(AxonError::invalid_graph(format!(
                "output port `{}` slot {idx} exceeds max_slots ({})",
                self.name, self.policy.max_slots
            )));
        }
        while slots.len() <= idx {
            let slot = self.allocate_slot();
            slots.push(slot);
        }
        Ok(idx)
    }

    fn ring_any(&self, slot: usize) -> Option<Arc<dyn Any + Send + Sync>> {
        self.slots.read().get(slot).map(|s| s.ring() as Arc<dyn Any + Send + Sync>)
    }

    fn datatype_any(&self, slot: usize) -> Option<Arc<dyn Datatype>> {
        self.slots.read().get(slot).and_then(|s| s.datatype()).map(|d| d as Arc<dyn Datatype>)
    }

    fn upstream_info(&self, slot: usize) -> Option<Arc<dyn UpstreamStreamInfo>> {
        self.slots.read().get(slot).map(|s| s.clone() as Arc<dyn UpstreamStreamInfo>)
    }

    fn register_connection(&self, slot: usize) {
        if let Some(s) = self.slots.read().get(slot) {
            s.register_connection();
        }
    }

    fn force_terminate_all(&self) {
        for slot in self.slots.read().iter() {
            slot.force_publish_terminated();
        }
    }

    fn declared_datatype(&self) -> Arc<dyn Datatype> {
        self.datatype.clone() as Arc<dyn Datatype>
    }

    fn override_buffer_size(&self, size: usize) {
        *self.buffer_size_override.write() = Some(size);
    }
}
