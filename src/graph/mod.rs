//! Graph: the build/run state machine tying processors, connections, and
//! shared-state groups together (spec.md §4.6).
//!
//! Grounded on the original's graph-builder `Build`/`StartProcessing`/
//! `StopProcessing` sequence; reworked around the crate's object-safe
//! `AnyOutputPort`/`AnyInputPort`/`AnySharedState` traits so the builder never
//! needs to know a processor's concrete payload types.

pub mod registry;

pub use registry::{ProcessorFactory, ProcessorRegistry};

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::address::{expand_name_pattern, parse_address};
use crate::config::{ConnectionRule, GraphConfig};
use crate::context::{GlobalContext, RunContext};
use crate::data::Datatype;
use crate::engine::{Observer, ProcessorEngine};
use crate::error::{AxonError, GraphState, Result};
use crate::processor::Processor;
use crate::shared_state::{link_group_dyn, AnySharedState};

struct ProcessorEntry {
    processor: Arc<Mutex<dyn Processor>>,
    thread_priority: i16,
    thread_core: i32,
}

/// A built, runnable processing graph. Owns every processor instance, their
/// `ProcessorEngine` thread hosts, and the graph-level state machine
/// (NOGRAPH is represented by the absence of a `Graph`; once built, a graph
/// starts in READY and is never reconstructed in place).
pub struct Graph {
    state: Mutex<GraphState>,
    global_ctx: GlobalContext,
    processors: HashMap<String, ProcessorEntry>,
    engines: HashMap<String, ProcessorEngine>,
    run: Mutex<Option<Arc<RunContext>>>,
}

impl Graph {
    pub fn state(&self) -> GraphState {
        *self.state.lock()
    }

    /// Runs `Build` steps 1-8 of spec.md §4.6: instantiate + configure +
    /// create_ports, wire connections, link shared-state groups, negotiate
    /// `CompleteStreamInfo` in producer-before-consumer order, then `Prepare`
    /// every processor. Leaves the graph in READY, or returns the first
    /// error encountered (the graph never reaches NOGRAPH-to-READY
    /// partially built).
    pub fn build(
        config: GraphConfig,
        registry: &ProcessorRegistry,
        global_ctx: GlobalContext,
        observer: Option<Arc<dyn Observer>>,
    ) -> Result<Self> {
        let mut processors: HashMap<String, ProcessorEntry> = HashMap::new();
        let mut depends_on: HashMap<String, HashSet<String>> = HashMap::new();

        for (name_pattern, proc_config) in &config.processors {
            for name in expand_name_pattern(name_pattern)? {
                let mut processor = registry.create(&proc_config.class)?;
                processor
                    .configure(&proc_config.options, &global_ctx)
                    .map_err(|e| AxonError::ConfigureError { processor: name.clone(), message: e.to_string() })?;
                processor
                    .create_ports()
                    .map_err(|e| AxonError::CreatePortsError { processor: name.clone(), message: e.to_string() })?;

                // Per-port ring-buffer capacity overrides (spec.md §6
                // `advanced.buffer_sizes`), applied before any connection
                // allocates a port's ring buffer.
                for (port_name, size) in &proc_config.advanced.buffer_sizes {
                    let port = processor.ports().output_port(port_name).ok_or_else(|| {
                        AxonError::invalid_graph(format!(
                            "processor `{name}` advanced.buffer_sizes names unknown output port `{port_name}`"
                        ))
                    })?;
                    port.override_buffer_size(*size);
                }

                processors.insert(
                    name,
                    ProcessorEntry {
                        processor: Arc::new(Mutex::new(processor)),
                        thread_priority: proc_config.advanced.threadpriority,
                        thread_core: proc_config.advanced.threadcore,
                    },
                );
            }
        }

        for rule in &config.connections {
            Self::connect(&processors, rule, &mut depends_on)?;
        }

        for group in &config.states {
            let states = group
                .iter()
                .map(|addr| Self::resolve_state(&processors, addr))
                .collect::<Result<Vec<_>>>()?;
            link_group_dyn(&states)?;
        }

        Self::complete_stream_info_all(&processors, &depends_on)?;

        // Prepare in a deterministic (lexical) order so a failure partway
        // through rolls back a reproducible prefix rather than whatever
        // order the processor map happens to iterate in.
        let mut names: Vec<&String> = processors.keys().collect();
        names.sort();

        let mut prepared: Vec<&String> = Vec::new();
        for name in names {
            let entry = &processors[name];
            if let Err(e) = entry.processor.lock().prepare(&global_ctx) {
                let err = AxonError::prepare(name, "Prepare", e.to_string());
                // Roll back every processor that already returned from
                // `Prepare` before surfacing the error (spec.md §8 scenario
                // 6: a partial failure must not leak resources acquired by
                // processors that succeeded before the failing one).
                for prepared_name in prepared {
                    if let Err(unprepare_err) = processors[prepared_name].processor.lock().unprepare(&global_ctx) {
                        tracing::warn!(processor = %prepared_name, error = %unprepare_err, "Unprepare failed during build rollback");
                    }
                }
                return Err(err);
            }
            prepared.push(name);
        }

        let engines = processors
            .iter()
            .map(|(name, entry)| {
                (
                    name.clone(),
                    ProcessorEngine::new(name.clone(), entry.processor.clone(), entry.thread_priority, entry.thread_core, observer.clone()),
                )
            })
            .collect();

        Ok(Self {
            state: Mutex::new(GraphState::Ready),
            global_ctx,
            processors,
            engines,
            run: Mutex::new(None),
        })
    }

    /// Resolves one `<out-address> = <in-address>` rule, expanding name-range
    /// patterns on either side and pairing them 1:1 (equal-length expansions)
    /// or broadcasting a single side across the other's expansion.
    fn connect(
        processors: &HashMap<String, ProcessorEntry>,
        rule: &ConnectionRule,
        depends_on: &mut HashMap<String, HashSet<String>>,
    ) -> Result<()> {
        let out_addr = parse_address(&rule.output)?;
        let in_addr = parse_address(&rule.input)?;
        let out_names = expand_name_pattern(&out_addr.processor)?;
        let in_names = expand_name_pattern(&in_addr.processor)?;

        let pairs: Vec<(String, String)> = if out_names.len() == in_names.len() {
            out_names.into_iter().zip(in_names).collect()
        } else if out_names.len() == 1 {
            in_names.into_iter().map(|i| (out_names[0].clone(), i)).collect()
        } else if in_names.len() == 1 {
            out_names.into_iter().map(|o| (o, in_names[0].clone())).collect()
        } else {
            return Err(AxonError::invalid_graph(format!(
                "connection `{} = {}` has mismatched name-range expansions ({} vs {})",
                rule.output,
                rule.input,
                out_names.len(),
                in_names.len()
            )));
        };

        for (out_name, in_name) in pairs {
            let out_entry = processors
                .get(&out_name)
                .ok_or_else(|| AxonError::invalid_graph(format!("unknown processor `{out_name}` in connection `{}`", rule.output)))?;
            let in_entry = processors
                .get(&in_name)
                .ok_or_else(|| AxonError::invalid_graph(format!("unknown processor `{in_name}` in connection `{}`", rule.input)))?;

            let out_port = {
                let guard = out_entry.processor.lock();
                Self::resolve_output_port(&*guard, out_addr.port.as_deref(), &out_name)?
            };
            let in_port = {
                let guard = in_entry.processor.lock();
                Self::resolve_input_port(&*guard, in_addr.port.as_deref(), &in_name)?
            };

            let out_slot = out_port.reserve_slot(out_addr.slot.unwrap_or(-1))?;
            let in_slot = in_port.reserve_slot(in_addr.slot.unwrap_or(-1))?;

            let out_datatype = out_port.declared_datatype();
            let in_datatype = in_port.declared_datatype();
            if !out_datatype.is_compatible(in_datatype.as_ref()) {
                return Err(AxonError::invalid_graph(format!(
                    "connection `{} = {}`: output datatype `{}` is not compatible with input datatype `{}`",
                    rule.output,
                    rule.input,
                    out_datatype.name(),
                    in_datatype.name()
                )));
            }

            let ring = out_port.ring_any(out_slot).expect("slot was just reserved");
            let upstream_info = out_port.upstream_info(out_slot);
            in_port.connect_slot(in_slot, ring, upstream_info)?;
            out_port.register_connection(out_slot);

            depends_on.entry(in_name).or_default().insert(out_name);
        }
        Ok(())
    }

    fn resolve_output_port(processor: &dyn Processor, port_name: Option<&str>, processor_name: &str) -> Result<Arc<dyn crate::port::AnyOutputPort>> {
        let ports = processor.ports();
        match port_name {
            Some(name) => ports
                .output_port(name)
                .cloned()
                .ok_or_else(|| AxonError::invalid_graph(format!("processor `{processor_name}` has no output port `{name}`"))),
            None => {
                let all = ports.output_ports();
                if all.len() == 1 {
                    Ok(all.values().next().expect("len == 1").clone())
                } else {
                    Err(AxonError::invalid_graph(format!(
                        "processor `{processor_name}` has {} output ports; specify one by name",
                        all.len()
                    )))
                }
            }
        }
    }

    fn resolve_input_port(processor: &dyn Processor, port_name: Option<&str>, processor_name: &str) -> Result<Arc<dyn crate::port::AnyInputPort>> {
        let ports = processor.ports();
        match port_name {
            Some(name) => ports
                .input_port(name)
                .cloned()
                .ok_or_else(|| AxonError::invalid_graph(format!("processor `{processor_name}` has no input port `{name}`"))),
            None => {
                let all = ports.input_ports();
                if all.len() == 1 {
                    Ok(all.values().next().expect("len == 1").clone())
                } else {
                    Err(AxonError::invalid_graph(format!(
                        "processor `{processor_name}` has {} input ports; specify one by name",
                        all.len()
                    )))
                }
            }
        }
    }

    fn resolve_state(processors: &HashMap<String, ProcessorEntry>, addr: &str) -> Result<Arc<dyn AnySharedState>> {
        let parsed = parse_address(addr)?;
        let entry = processors
            .get(&parsed.processor)
            .ok_or_else(|| AxonError::invalid_graph(format!("unknown processor `{}` in states group", parsed.processor)))?;
        let state_name = parsed
            .port
            .as_deref()
            .ok_or_else(|| AxonError::invalid_graph(format!("state reference `{addr}` is missing a state name")))?;
        entry
            .processor
            .lock()
            .ports()
            .shared_state(state_name)
            .cloned()
            .ok_or_else(|| AxonError::invalid_graph(format!("processor `{}` has no shared state `{state_name}`", parsed.processor)))
    }

    /// Calls `complete_stream_info` on every processor in an order where a
    /// processor only runs once every processor feeding it already has
    /// (spec.md §4.6 step 6). A cycle in the stream-info dependency graph
    /// (distinct from a cycle in the dataflow graph itself, which is
    /// otherwise permitted) is reported as an error since no ordering can
    /// satisfy it.
    fn complete_stream_info_all(processors: &HashMap<String, ProcessorEntry>, depends_on: &HashMap<String, HashSet<String>>) -> Result<()> {
        let mut done: HashSet<String> = HashSet::new();
        let mut remaining: Vec<String> = processors.keys().cloned().collect();

        while !remaining.is_empty() {
            let mut next_remaining = Vec::new();
            let mut progressed = false;

            for name in remaining {
                let ready = depends_on.get(&name).is_none_or(|deps| deps.iter().all(|dep| done.contains(dep)));
                if ready {
                    processors[&name]
                        .processor
                        .lock()
                        .complete_stream_info()
                        .map_err(|e| AxonError::StreamInfoError { processor: name.clone(), message: e.to_string() })?;
                    done.insert(name);
                    progressed = true;
                } else {
                    next_remaining.push(name);
                }
            }

            if !progressed {
                return Err(AxonError::invalid_graph(format!(
                    "CompleteStreamInfo ordering cannot be resolved for: {}",
                    next_remaining.join(", ")
                )));
            }
            remaining = next_remaining;
        }
        Ok(())
    }

    /// Starts a new run: opens the run's storage context, launches every
    /// processor's worker thread, waits for all of them to finish
    /// `Preprocess`, then releases the shared go signal (spec.md §4.6
    /// `StartProcessing` steps 1-5). Rolls the graph back to READY and
    /// returns the first processor error if any thread fails before going live.
    pub fn start_processing(
        &self,
        storage_root: &Path,
        run_group_id: impl Into<String>,
        run_id: impl Into<String>,
        template_id: Option<String>,
        test: bool,
    ) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != GraphState::Ready {
                return Err(AxonError::InvalidState { expected: "READY".into(), found: *state });
            }
            *state = GraphState::Starting;
        }

        let run_ctx = Arc::new(RunContext::new(storage_root, run_group_id, run_id, template_id, test)?);
        *self.run.lock() = Some(run_ctx.clone());

        for engine in self.engines.values() {
            engine.start(run_ctx.clone());
        }

        while !run_ctx.terminated() && !self.engines.values().all(|e| e.running()) {
            std::thread::sleep(Duration::from_millis(5));
        }

        if run_ctx.terminated() {
            for engine in self.engines.values() {
                engine.stop();
            }
            *self.run.lock() = None;
            *self.state.lock() = GraphState::Ready;
            return Err(run_ctx
                .first_error_typed()
                .unwrap_or_else(|| AxonError::invalid_graph("processor failed during startup")));
        }

        run_ctx.broadcast_go();
        *self.state.lock() = GraphState::Processing;
        info!(run_id = run_ctx.run_id(), "graph processing started");
        Ok(())
    }

    /// Stops the active run: raises termination, force-publishes/releases
    /// every slot so no processor is left blocked on its peers, joins every
    /// worker thread, and returns the graph to READY (spec.md §4.6
    /// `StopProcessing`).
    pub fn stop_processing(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != GraphState::Processing {
                return Err(AxonError::InvalidState { expected: "PROCESSING".into(), found: *state });
            }
            *state = GraphState::Stopping;
        }

        let run_ctx = self.run.lock().take().ok_or_else(|| AxonError::invalid_graph("no active run to stop"))?;
        // Captured before the shutdown-request call below, which only fills
        // the slot if a real processor failure has not already claimed it.
        let recorded_error = run_ctx.first_error_typed();
        run_ctx.terminate_with_error("graph", "StopProcessing", "stop requested");

        for entry in self.processors.values() {
            let guard = entry.processor.lock();
            for port in guard.ports().output_ports().values() {
                port.force_terminate_all();
            }
            for port in guard.ports().input_ports().values() {
                port.force_release_all();
            }
        }

        for engine in self.engines.values() {
            engine.stop();
        }

        *self.state.lock() = GraphState::Ready;
        match recorded_error {
            Some(e) => {
                warn!(run_id = run_ctx.run_id(), error = %e, "graph processing stopped with a recorded processor error");
                Err(e)
            }
            None => {
                info!(run_id = run_ctx.run_id(), "graph processing stopped");
                Ok(())
            }
        }
    }

    /// Control-plane `Update`: parses `proc.state`, pushes `value` into that
    /// shared state via its generic string coercion.
    pub fn update(&self, address: &str, value: &str) -> Result<()> {
        let state = self.resolve_control_state(address)?;
        if state.set_string(value) {
            Ok(())
        } else {
            Err(AxonError::UpdateStateError {
                entry: address.to_string(),
                reason: format!("value `{value}` could not be parsed"),
            })
        }
    }

    /// Control-plane `Retrieve`: reads back a shared state's current value.
    pub fn retrieve(&self, address: &str) -> Result<String> {
        Ok(self.resolve_control_state(address)?.get_string())
    }

    fn resolve_control_state(&self, address: &str) -> Result<Arc<dyn AnySharedState>> {
        Self::resolve_state(&self.processors, address)
    }

    /// Control-plane `Apply`: invokes a processor's exposed method by
    /// `proc.method` address.
    pub fn apply(&self, address: &str, arg: &serde_yaml::Value) -> Result<serde_yaml::Value> {
        let parsed = parse_address(address)?;
        let entry = self
            .processors
            .get(&parsed.processor)
            .ok_or_else(|| AxonError::invalid_graph(format!("unknown processor `{}` in apply address", parsed.processor)))?;
        let method_name = parsed
            .port
            .as_deref()
            .ok_or_else(|| AxonError::invalid_graph(format!("apply address `{address}` is missing a method name")))?;

        let guard = entry.processor.lock();
        let method = guard
            .ports()
            .exposed_method(method_name)
            .ok_or_else(|| AxonError::invalid_graph(format!("processor `{}` has no exposed method `{method_name}`", parsed.processor)))?;
        method(arg)
    }
}

impl Drop for Graph {
    /// Releases every processor's `Prepare`-acquired resources
    /// (spec.md §4.4 `Unprepare`) when the graph itself is torn down.
    fn drop(&mut self) {
        for (name, entry) in &self.processors {
            if let Err(e) = entry.processor.lock().unprepare(&self.global_ctx) {
                tracing::warn!(processor = %name, error = %e, "Unprepare failed during graph destroy");
            }
        }
    }
}
