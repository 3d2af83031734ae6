//! Slots: the per-connection read/write handles layered over a shared
//! `RingBuffer` (spec.md §4.3). One `OutputSlot` is the single producer for
//! a ring; any number of `InputSlot`s may attach as independent consumers,
//! each with its own read cursor and cache/timeout policy.

mod input;
mod output;

pub use input::{InputSlot, RetrieveStatus};
pub use output::OutputSlot;
