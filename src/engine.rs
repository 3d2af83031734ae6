//! Processor engine: the thread host around one processor (spec.md §4.5).
//!
//! Grounded on the original `processorengine.cpp` lifecycle order
//! (`PrepareProcessing -> TestPrepare -> Preprocess -> running=true ->
//! wait go_signal -> Process -> Postprocess -> TestFinalize ->
//! running=false`) and the teacher's real-time scheduling setup via `nix`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::constants::PRIORITY_NONE;
use crate::context::{ProcessingContext, RunContext};
use crate::processor::Processor;

/// Hook for test/latency instrumentation, kept off the `Processor` trait per
/// the Open Question resolution in spec.md §9 ("a separate concern, e.g. a
/// pluggable observer on the engine, not fields on `IProcessor`").
pub trait Observer: Send + Sync {
    fn on_lifecycle_event(&self, processor: &str, step: &str) {
        let _ = (processor, step);
    }
    fn on_error(&self, processor: &str, step: &str, message: &str) {
        let _ = (processor, step, message);
    }
}

/// Default observer: does nothing, so wiring one up is opt-in.
pub struct NoopObserver;
impl Observer for NoopObserver {}

/// Falls back to the processor's own `default_thread_priority()` when the
/// graph's YAML left `thread_priority` at `PRIORITY_NONE` (SPEC_FULL §4.4).
fn resolve_priority(thread_priority: i16, processor_default: i16) -> i16 {
    if thread_priority != PRIORITY_NONE {
        thread_priority
    } else {
        processor_default
    }
}

/// Maps a `0..100` priority percentage onto the OS's `SCHED_FIFO` priority
/// range (spec.md §6 scheduling). `< 0` means "inherit" and is a no-op.
fn apply_thread_priority(priority: i16) {
    if priority < 0 {
        return;
    }
    let priority = priority.clamp(0, 100) as i32;
    // SAFETY: `sched_get_priority_min/max` and `sched_setscheduler` are
    // plain syscalls with no preconditions beyond a valid policy constant.
    unsafe {
        let min = libc::sched_get_priority_min(libc::SCHED_FIFO);
        let max = libc::sched_get_priority_max(libc::SCHED_FIFO);
        let os_priority = min + ((max - min) * priority) / 100;
        let param = libc::sched_param { sched_priority: os_priority };
        if libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) != 0 {
            warn!(os_priority, "failed to set SCHED_FIFO priority (requires elevated privileges)");
        }
    }
}

/// Pins the calling thread to `core` (spec.md §6 scheduling). `< 0` means
/// "unpinned" and is a no-op.
fn apply_core_affinity(core: i32) {
    if core < 0 {
        return;
    }
    let mut set = nix::sched::CpuSet::new();
    if set.set(core as usize).is_err() {
        warn!(core, "invalid CPU index for affinity pinning");
        return;
    }
    if let Err(e) = nix::sched::sched_setaffinity(nix::unistd::Pid::from_raw(0), &set) {
        warn!(core, error = %e, "failed to set CPU affinity");
    }
}

/// Owns the worker thread for one processor: applies its scheduling
/// attributes, drives `Preprocess -> (wait go_signal) -> Process ->
/// Postprocess`, and reports `running`/errors back to the run context.
pub struct ProcessorEngine {
    name: String,
    processor: Arc<Mutex<dyn Processor>>,
    thread_priority: i16,
    thread_core: i32,
    observer: Arc<dyn Observer>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessorEngine {
    pub fn new(
        name: impl Into<String>,
        processor: Arc<Mutex<dyn Processor>>,
        thread_priority: i16,
        thread_core: i32,
        observer: Option<Arc<dyn Observer>>,
    ) -> Self {
        Self {
            name: name.into(),
            processor,
            thread_priority,
            thread_core,
            observer: observer.unwrap_or_else(|| Arc::new(NoopObserver)),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn effective_thread_priority(&self, processor_default: i16) -> i16 {
        resolve_priority(self.thread_priority, processor_default)
    }

    /// Launches the worker thread. Returns immediately; the caller should
    /// poll `running()` (or `run_context.terminated()`) before broadcasting
    /// `go_signal` (spec.md §4.6 `StartProcessing` steps 3-5).
    pub fn start(&self, run_context: Arc<RunContext>) {
        let name = self.name.clone();
        let processor = self.processor.clone();
        let priority = self.thread_priority;
        let core = self.thread_core;
        let observer = self.observer.clone();
        let running = self.running.clone();

        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let processor_default = processor.lock().default_thread_priority();
                apply_thread_priority(resolve_priority(priority, processor_default));
                apply_core_affinity(core);

                let processing_ctx = ProcessingContext::new(run_context.clone(), name.clone());

                observer.on_lifecycle_event(&name, "TestPrepare");
                if let Err(e) = processor.lock().preprocess(&processing_ctx) {
                    run_context.terminate_with_error(&name, "Preprocess", &e.to_string());
                    observer.on_error(&name, "Preprocess", &e.to_string());
                    return;
                }

                running.store(true, Ordering::Release);
                info!(processor = %name, "processor running, waiting for go signal");
                run_context.wait_go_signal();

                if !run_context.terminated() {
                    if let Err(e) = processor.lock().process(&processing_ctx) {
                        run_context.terminate_with_error(&name, "Process", &e.to_string());
                        observer.on_error(&name, "Process", &e.to_string());
                    }
                }

                if let Err(e) = processor.lock().postprocess(&processing_ctx) {
                    run_context.terminate_with_error(&name, "Postprocess", &e.to_string());
                    observer.on_error(&name, "Postprocess", &e.to_string());
                }
                observer.on_lifecycle_event(&name, "TestFinalize");
                running.store(false, Ordering::Release);
            })
            .expect("failed to spawn processor thread");

        *self.handle.lock() = Some(handle);
    }

    /// Joins the worker thread. A no-op if the engine was never started (or
    /// has already been stopped).
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                error!(processor = %self.name, "processor thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::processor::ProcessorPorts;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingProcessor {
        ports: ProcessorPorts,
        iterations: Arc<AtomicUsize>,
    }

    impl Processor for CountingProcessor {
        fn create_ports(&mut self) -> Result<()> {
            Ok(())
        }

        fn process(&mut self, ctx: &ProcessingContext) -> Result<()> {
            while !ctx.terminated() {
                self.iterations.fetch_add(1, Ordering::Relaxed);
                std::thread::sleep(Duration::from_millis(2));
            }
            Ok(())
        }

        fn ports(&self) -> &ProcessorPorts {
            &self.ports
        }

        fn ports_mut(&mut self) -> &mut ProcessorPorts {
            &mut self.ports
        }
    }

    fn run_context() -> Arc<RunContext> {
        let dir = std::env::temp_dir().join(format!("axon-engine-test-{}-{:?}", std::process::id(), std::thread::current().id()));
        let _ = std::fs::remove_dir_all(&dir);
        Arc::new(RunContext::new(&dir, "group", "run", None, false).unwrap())
    }

    #[test]
    fn effective_thread_priority_falls_back_to_processor_default() {
        let engine = ProcessorEngine::new(
            "counter",
            Arc::new(Mutex::new(CountingProcessor { ports: ProcessorPorts::new(), iterations: Arc::new(AtomicUsize::new(0)) })),
            PRIORITY_NONE,
            -1,
            None,
        );
        assert_eq!(engine.effective_thread_priority(42), 42);

        let engine = ProcessorEngine::new(
            "counter",
            Arc::new(Mutex::new(CountingProcessor { ports: ProcessorPorts::new(), iterations: Arc::new(AtomicUsize::new(0)) })),
            80,
            -1,
            None,
        );
        assert_eq!(engine.effective_thread_priority(42), 80);
    }

    #[test]
    fn engine_runs_until_terminated_and_joins() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let processor = Arc::new(Mutex::new(CountingProcessor {
            ports: ProcessorPorts::new(),
            iterations: iterations.clone(),
        }));
        let engine = ProcessorEngine::new("counter", processor, PRIORITY_NONE, -1, None);
        let run_ctx = run_context();

        engine.start(run_ctx.clone());
        while !engine.running() {
            std::thread::sleep(Duration::from_millis(1));
        }
        run_ctx.broadcast_go();
        std::thread::sleep(Duration::from_millis(20));
        run_ctx.terminate_with_error("counter", "Process", "shutdown requested");
        engine.stop();

        assert!(!engine.running());
        assert!(iterations.load(Ordering::Relaxed) > 0);
    }
}
