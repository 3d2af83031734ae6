//! Processor: the user-supplied unit of work (spec.md §4.4).
//!
//! Grounded on the original `IProcessor` (configure/createPorts/
//! completeStreamInfo/prepare/preprocess/process/postprocess/unprepare) and
//! the design note "exposed methods and shared states ... two hash maps
//! keyed by `&str`" (§9).

use std::collections::HashMap;
use std::sync::Arc;

use crate::constants::PRIORITY_NONE;
use crate::context::{GlobalContext, ProcessingContext};
use crate::error::Result;
use crate::port::{AnyInputPort, AnyOutputPort};
use crate::shared_state::AnySharedState;

/// An exposed method: callable from the control plane on the caller's own
/// thread, so implementations must rely on shared-state atomics or explicit
/// synchronization rather than mutable processor state (spec.md §4.4).
pub type ExposedMethod = Box<dyn Fn(&serde_yaml::Value) -> Result<serde_yaml::Value> + Send + Sync>;

/// The registrations a processor builds up during `create_ports`: its named
/// ports, shared states, and exposed methods. Kept as a plain struct rather
/// than trait methods per port/state so the graph builder can iterate all
/// three uniformly without downcasting the processor itself.
#[derive(Default)]
pub struct ProcessorPorts {
    inputs: HashMap<String, Arc<dyn AnyInputPort>>,
    outputs: HashMap<String, Arc<dyn AnyOutputPort>>,
    shared_states: HashMap<String, Arc<dyn AnySharedState>>,
    exposed_methods: HashMap<String, ExposedMethod>,
}

impl ProcessorPorts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input_port(&mut self, name: impl Into<String>, port: Arc<dyn AnyInputPort>) {
        self.inputs.insert(name.into(), port);
    }

    pub fn add_output_port(&mut self, name: impl Into<String>, port: Arc<dyn AnyOutputPort>) {
        self.outputs.insert(name.into(), port);
    }

    pub fn add_shared_state(&mut self, name: impl Into<String>, state: Arc<dyn AnySharedState>) {
        self.shared_states.insert(name.into(), state);
    }

    pub fn add_exposed_method(&mut self, name: impl Into<String>, method: ExposedMethod) {
        self.exposed_methods.insert(name.into(), method);
    }

    pub fn input_port(&self, name: &str) -> Option<&Arc<dyn AnyInputPort>> {
        self.inputs.get(name)
    }

    pub fn output_port(&self, name: &str) -> Option<&Arc<dyn AnyOutputPort>> {
        self.outputs.get(name)
    }

    pub fn input_ports(&self) -> &HashMap<String, Arc<dyn AnyInputPort>> {
        &self.inputs
    }

    pub fn output_ports(&self) -> &HashMap<String, Arc<dyn AnyOutputPort>> {
        &self.outputs
    }

    pub fn shared_states(&self) -> &HashMap<String, Arc<dyn AnySharedState>> {
        &self.shared_states
    }

    pub fn shared_state(&self, name: &str) -> Option<&Arc<dyn AnySharedState>> {
        self.shared_states.get(name)
    }

    pub fn exposed_method(&self, name: &str) -> Option<&ExposedMethod> {
        self.exposed_methods.get(name)
    }
}

/// The lifecycle surface a domain processor implements (spec.md §4.4). The
/// runtime calls these, in order, from a single thread per processor, except
/// that `configure`/`create_ports`/`complete_stream_info`/`prepare` may run
/// on an orchestration thread before processing begins.
pub trait Processor: Send {
    /// Reads options from the config tree. Must not allocate ring buffers.
    fn configure(&mut self, options: &serde_yaml::Value, ctx: &GlobalContext) -> Result<()> {
        let _ = (options, ctx);
        Ok(())
    }

    /// Declares input/output ports, shared states, and exposed methods via
    /// `self.ports_mut()`. No I/O.
    fn create_ports(&mut self) -> Result<()>;

    /// Called once every upstream output slot feeding this processor has
    /// been finalized. Inspects `input_port.slot(i).stream_info()` and calls
    /// `finalize(...)` on each of this processor's own output stream infos.
    fn complete_stream_info(&mut self) -> Result<()> {
        Ok(())
    }

    /// One-time resource acquisition (open files, size filter state by the
    /// now-known channel counts).
    fn prepare(&mut self, ctx: &GlobalContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Per-run setup: counters reset, output files opened under the run
    /// storage context.
    fn preprocess(&mut self, ctx: &ProcessingContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// The main loop. Must loop while `!ctx.terminated()`, must drain at
    /// least one input-retrieve -> output-publish round per iteration, and
    /// must `release()` every retrieved batch.
    fn process(&mut self, ctx: &ProcessingContext) -> Result<()>;

    /// Per-run teardown.
    fn postprocess(&mut self, ctx: &ProcessingContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Releases resources acquired in `prepare`.
    fn unprepare(&mut self, ctx: &GlobalContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// A processor-requested default real-time priority (`0..100`, or
    /// `PRIORITY_NONE` to defer entirely to the graph's `advanced:`
    /// configuration). Mirrors `IProcessor::default_thread_priority` in the
    /// original source.
    fn default_thread_priority(&self) -> i16 {
        PRIORITY_NONE
    }

    fn ports(&self) -> &ProcessorPorts;
    fn ports_mut(&mut self) -> &mut ProcessorPorts;
}
