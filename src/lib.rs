//! A lock-free, real-time processing-graph runtime for closed-loop
//! neuroscience experiments: processors exchange typed messages over
//! disruptor-style ring buffers under the control of a graph build/run
//! state machine.

pub mod address;
pub mod barrier;
pub mod config;
pub mod constants;
pub mod context;
pub mod data;
pub mod engine;
pub mod error;
pub mod graph;
pub mod port;
pub mod processor;
pub mod ring_buffer;
pub mod sequence;
pub mod shared_state;
pub mod slot;
pub mod stream_info;
pub mod wait_strategy;
pub mod wire;

pub use error::{AxonError, GraphState, Result};
