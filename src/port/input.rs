//! Input ports: the consumer-facing half of a connection point. Each input
//! slot attaches, at connect time, to exactly one upstream output slot's
//! ring buffer.

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::data::{Datatype, RingItem};
use crate::error::{AxonError, Result};
use crate::port::policy::InputPortPolicy;
use crate::ring_buffer::RingBuffer;
use crate::slot::InputSlot;
use crate::stream_info::UpstreamStreamInfo;

/// Object-safe view of an input port, used by the graph/connection layer
/// without needing to know the concrete payload type `T`.
pub trait AnyInputPort: Send + Sync {
    fn name(&self) -> &str;
    fn slot_count(&self) -> usize;
    fn max_slots(&self) -> i32;
    fn min_slots(&self) -> i32;

    /// Reserves a slot index without attaching it to anything yet
    /// (spec.md §4.3 reserve rule table).
    fn reserve_slot(&self, requested: i32) -> Result<usize>;

    /// Attaches the previously reserved `slot` to an upstream ring,
    /// type-erased; the concrete `InputPort<T>` downcasts it back to
    /// `Arc<RingBuffer<T>>`. Fails if the types don't match. `upstream_info`
    /// is carried alongside so the new `InputSlot` can expose the producer's
    /// negotiated `StreamInfo`.
    fn connect_slot(
        &self,
        slot: usize,
        ring_any: Arc<dyn Any + Send + Sync>,
        upstream_info: Option<Arc<dyn UpstreamStreamInfo>>,
    ) -> Result<()>;

    fn is_connected(&self, slot: usize) -> bool;

    /// Force-releases every connected slot (spec.md §4.6 `StopProcessing`),
    /// unblocking any upstream producer this port was exerting backpressure on.
    fn force_release_all(&self);

    /// This port's declared datatype descriptor, set once at construction
    /// time in `create_ports`. Compared against a connecting output port's
    /// own declared datatype at connect time (spec.md §4.6 step 4).
    fn declared_datatype(&self) -> Arc<dyn Datatype>;
}

struct ReservedSlot<T: RingItem> {
    slot: Option<Arc<InputSlot<T>>>,
}

pub struct InputPort<T: RingItem, D: Datatype> {
    name: String,
    policy: InputPortPolicy,
    datatype: Arc<D>,
    slots: RwLock<Vec<ReservedSlot<T>>>,
}

impl<T: RingItem, D: Datatype> InputPort<T, D> {
    pub fn new(name: impl Into<String>, policy: InputPortPolicy, datatype: D) -> Self {
        Self {
            name: name.into(),
            policy,
            datatype: Arc::new(datatype),
            slots: RwLock::new(Vec::new()),
        }
    }

    pub fn policy(&self) -> &InputPortPolicy {
        &self.policy
    }

    pub fn datatype(&self) -> &Arc<D> {
        &self.datatype
    }

    pub fn slot(&self, idx: usize) -> Option<Arc<InputSlot<T>>> {
        self.slots.read().get(idx).and_then(|r| r.slot.clone())
    }

    pub fn slots(&self) -> Vec<Arc<InputSlot<T>>> {
        self.slots.read().iter().filter_map(|r| r.slot.clone()).collect()
    }
}

impl<T: RingItem, D: Datatype + 'static> AnyInputPort for InputPort<T, D> {
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
        let idx = if requested < 0 { slots.len() } else { requested as usize };
        if idx as i32 >= self.policy.max_slots {
            return Err(AxonError::invalid_graph(format!(
                "input port `{}` slot {idx} exceeds max_slots ({})",
                self.name, self.policy.max_slots
            )));
        }
        // Unlike an output slot (which may fan out to many connections), an
        // input slot accepts exactly one upstream: reconnecting an
        // already-connected index is forbidden (spec.md §4.3 reserve table).
        if let Some(existing) = slots.get(idx) {
            if existing.slot.is_some() {
                return Err(AxonError::invalid_graph(format!(
                    "input port `{}` slot {idx} is already connected",
                    self.name
                )));
            }
        }
        while slots.len() <= idx {
            slots.push(ReservedSlot { slot: None });
        }
        Ok(idx)
    }

    fn connect_slot(
        &self,
        slot: usize,
        ring_any: Arc<dyn Any + Send + Sync>,
        upstream_info: Option<Arc<dyn UpstreamStreamInfo>>,
    ) -> Result<()> {
        let ring = ring_any.downcast::<RingBuffer<T>>().map_err(|_| {
            AxonError::invalid_graph(format!("input port `{}` slot {slot}: datatype mismatch on connect", self.name))
        })?;
        let mut slots = self.slots.write();
        let entry = slots.get_mut(slot).ok_or_else(|| {
            AxonError::invalid_graph(format!("input port `{}` slot {slot} was never reserved", self.name))
        })?;
        entry.slot = Some(Arc::new(InputSlot::connect(
            ring,
            upstream_info,
            self.policy.cache_enabled,
            self.policy.time_out_us,
        )));
        Ok(())
    }

    fn is_connected(&self, slot: usize) -> bool {
        self.slots.read().get(slot).is_some_and(|r| r.slot.is_some())
    }

    fn force_release_all(&self) {
        for reserved in self.slots.read().iter() {
            if let Some(slot) = &reserved.slot {
                slot.force_release();
            }
        }
    }

    fn declared_datatype(&self) -> Arc<dyn Datatype> {
        self.datatype.clone() as Arc<dyn Datatype>
    }
}
