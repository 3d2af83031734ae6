//! Port policy: the configuration knobs set once at `CreatePorts` time and
//! held fixed for the lifetime of a run (spec.md §4.3, §6).

use std::sync::Arc;

use serde::Deserialize;

use crate::constants::{DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE, TIME_OUT_INFINITE};
use crate::wait_strategy::{BlockingWaitStrategy, BusySpinWaitStrategy, SleepingWaitStrategy, WaitStrategy, YieldingWaitStrategy};

/// Names the wait strategy an output port's ring buffer uses, both for the
/// producer's own backpressure wait and for every consumer `Barrier` it
/// spawns (one strategy instance is shared by both sides of a connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategyKind {
    BusySpin,
    Yielding,
    Sleeping,
    Blocking,
}

impl Default for WaitStrategyKind {
    fn default() -> Self {
        WaitStrategyKind::Blocking
    }
}

impl WaitStrategyKind {
    pub fn build(self) -> Arc<dyn WaitStrategy> {
        match self {
            WaitStrategyKind::BusySpin => Arc::new(BusySpinWaitStrategy),
            WaitStrategyKind::Yielding => Arc::new(YieldingWaitStrategy::new()),
            WaitStrategyKind::Sleeping => Arc::new(SleepingWaitStrategy::default()),
            WaitStrategyKind::Blocking => Arc::new(BlockingWaitStrategy::new()),
        }
    }
}

/// Rounds `n` up to the next power of two, floored at `MIN_BUFFER_SIZE`.
pub fn round_up_capacity(n: usize) -> usize {
    n.max(MIN_BUFFER_SIZE).next_power_of_two()
}

/// An output port's fixed configuration: how many output slots it may carry
/// and what backing ring buffer each gets.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputPortPolicy {
    pub min_slots: i32,
    pub max_slots: i32,
    pub buffer_size: usize,
    pub wait_strategy: WaitStrategyKind,
}

impl Default for OutputPortPolicy {
    fn default() -> Self {
        Self {
            min_slots: 1,
            max_slots: 1,
            buffer_size: DEFAULT_BUFFER_SIZE,
            wait_strategy: WaitStrategyKind::default(),
        }
    }
}

impl OutputPortPolicy {
    pub fn effective_buffer_size(&self) -> usize {
        round_up_capacity(self.buffer_size)
    }
}

/// An input port's fixed configuration: how many input slots it may carry
/// and how each one reads from whatever it is connected to.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct InputPortPolicy {
    pub min_slots: i32,
    pub max_slots: i32,
    pub cache_enabled: bool,
    pub time_out_us: i64,
}

impl Default for InputPortPolicy {
    fn default() -> Self {
        Self {
            min_slots: 1,
            max_slots: 1,
            cache_enabled: false,
            time_out_us: TIME_OUT_INFINITE,
        }
    }
}
