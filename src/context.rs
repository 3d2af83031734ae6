//! Contexts: the read-only and per-run state a processor's lifecycle hooks
//! are handed (spec.md §4.4, §4.6, §6).
//!
//! Grounded on the original's `runinfo.hpp`/`context.hpp` storage-context map
//! and termination/error bookkeeping, reworked around `Arc<AtomicBool>` +
//! `parking_lot::Mutex`/`Condvar` per the concurrency model in spec.md §5.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{AxonError, Result};

/// Read-only state available to every processor across the whole graph
/// lifetime (Configure through Unprepare), independent of any particular run.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    root: serde_yaml::Value,
}

impl GlobalContext {
    pub fn new(root: serde_yaml::Value) -> Self {
        Self { root }
    }

    /// The full parsed graph document, for processors that need to
    /// cross-reference sibling configuration outside their own `options:`.
    pub fn root(&self) -> &serde_yaml::Value {
        &self.root
    }
}

/// A map of logical storage-context names to filesystem paths, resolving
/// `context://name/relative/path` URIs (spec.md §6).
#[derive(Debug, Clone, Default)]
pub struct StorageContext {
    contexts: HashMap<String, PathBuf>,
}

impl StorageContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, path: PathBuf) {
        self.contexts.insert(name.into(), path);
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.contexts.get(name).map(PathBuf::as_path)
    }

    pub fn resolve(&self, uri: &str) -> Result<PathBuf> {
        let rest = uri
            .strip_prefix("context://")
            .ok_or_else(|| AxonError::config(format!("not a context URI: `{uri}`")))?;
        let (name, relative) = rest.split_once('/').unwrap_or((rest, ""));
        let base = self
            .contexts
            .get(name)
            .ok_or_else(|| AxonError::config(format!("unknown storage context `{name}`")))?;
        Ok(if relative.is_empty() { base.clone() } else { base.join(relative) })
    }
}

/// (Re)creates `link` as a symlink to `target`, atomically via a temp file
/// plus rename, so a reader never observes a missing or half-written link
/// (spec.md §6: "Symlinks ... are (re)created atomically at each run").
fn relink(link: &Path, target: &Path) -> Result<()> {
    let tmp = link.with_extension("tmp-symlink");
    let _ = std::fs::remove_file(&tmp);
    std::os::unix::fs::symlink(target, &tmp)?;
    std::fs::rename(&tmp, link)?;
    Ok(())
}

/// Per-run state: termination flag, first recorded error, the start
/// barrier's `go_signal`, and the storage-context map for this run
/// (spec.md §4.6 `StartProcessing` step 1, §5 cancellation semantics).
pub struct RunContext {
    run_group_id: String,
    run_id: String,
    template_id: Option<String>,
    test: bool,
    terminated: Arc<AtomicBool>,
    first_error: Mutex<Option<(String, String, String)>>,
    go_signal: Mutex<bool>,
    go_condvar: Condvar,
    storage: StorageContext,
}

impl RunContext {
    /// Creates `<root>/<run_group_id>/<run_id>` (failing if it already
    /// exists) and refreshes the `_last_run_group`/`_last_run` symlinks.
    pub fn new(
        root: &Path,
        run_group_id: impl Into<String>,
        run_id: impl Into<String>,
        template_id: Option<String>,
        test: bool,
    ) -> Result<Self> {
        let run_group_id = run_group_id.into();
        let run_id = run_id.into();
        let runroot = root.to_path_buf();
        let rungroup = runroot.join(&run_group_id);
        let runbase = rungroup.join(&run_id);

        std::fs::create_dir_all(&rungroup)?;
        std::fs::create_dir(&runbase).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                AxonError::config(format!("run directory already exists: {}", runbase.display()))
            } else {
                AxonError::Io(e)
            }
        })?;

        let last_run_group_link = runroot.join("_last_run_group");
        let last_run_link = rungroup.join("_last_run");
        relink(&last_run_group_link, &rungroup)?;
        relink(&last_run_link, &runbase)?;

        let mut storage = StorageContext::new();
        storage.insert("runroot", runroot.clone());
        storage.insert("rungroup", rungroup.clone());
        storage.insert("runbase", runbase);
        storage.insert("lastrungroup", last_run_group_link);
        storage.insert("lastrunbase", last_run_link.clone());
        storage.insert("lastrun", last_run_link);
        if let Some(tid) = &template_id {
            let templatebase = runroot.join("templates").join(tid);
            storage.insert("templatebase", templatebase.clone());
            storage.insert("template", templatebase.clone());
            storage.insert("templatetest", templatebase.join("test"));
        }

        Ok(Self {
            run_group_id,
            run_id,
            template_id,
            test,
            terminated: Arc::new(AtomicBool::new(false)),
            first_error: Mutex::new(None),
            go_signal: Mutex::new(false),
            go_condvar: Condvar::new(),
            storage,
        })
    }

    pub fn run_group_id(&self) -> &str {
        &self.run_group_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn template_id(&self) -> Option<&str> {
        self.template_id.as_deref()
    }

    pub fn test(&self) -> bool {
        self.test
    }

    pub fn storage(&self) -> &StorageContext {
        &self.storage
    }

    /// A shared handle other components (barriers, engines) can poll or be
    /// alerted by directly, without going through `RunContext` itself.
    pub fn terminated_flag(&self) -> Arc<AtomicBool> {
        self.terminated.clone()
    }

    pub fn terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Stores the first error atomically (subsequent calls are dropped) and
    /// raises the cooperative termination flag (spec.md §7).
    pub fn terminate_with_error(&self, processor: &str, step: &str, message: &str) {
        let mut slot = self.first_error.lock();
        if slot.is_none() {
            *slot = Some((processor.to_string(), step.to_string(), message.to_string()));
        }
        self.terminated.store(true, Ordering::Release);
    }

    pub fn first_error(&self) -> Option<String> {
        self.first_error.lock().as_ref().map(|(processor, step, message)| format!("Processor `{processor}` failed in `{step}`: {message}"))
    }

    /// Reconstructs the typed error recorded for this run (spec.md §7): a
    /// failure during `Prepare`/`Preprocess` surfaces as `PrepareError`, one
    /// during `Process`/`Postprocess` as `ProcessingError`. Any other step
    /// name (e.g. the `StopProcessing` call uses this same mechanism to
    /// request a clean shutdown) falls back to a generic `InvalidGraph`.
    pub fn first_error_typed(&self) -> Option<AxonError> {
        self.first_error.lock().as_ref().map(|(processor, step, message)| match step.as_str() {
            "Prepare" | "Preprocess" => AxonError::PrepareError {
                processor: processor.clone(),
                step: step.clone(),
                message: message.clone(),
            },
            "Process" | "Postprocess" => AxonError::ProcessingError {
                processor: processor.clone(),
                message: message.clone(),
            },
            _ => AxonError::invalid_graph(format!("Processor `{processor}` failed in `{step}`: {message}")),
        })
    }

    /// Blocks until `broadcast_go` has been called or the run has already
    /// terminated (so a processor that errors out during its own startup
    /// doesn't wedge the others waiting on the barrier).
    pub fn wait_go_signal(&self) {
        let mut guard = self.go_signal.lock();
        while !*guard && !self.terminated() {
            self.go_condvar.wait_for(&mut guard, Duration::from_millis(50));
        }
    }

    /// Releases every processor blocked in `wait_go_signal` (spec.md §4.6
    /// `StartProcessing` step 5).
    pub fn broadcast_go(&self) {
        *self.go_signal.lock() = true;
        self.go_condvar.notify_all();
    }
}

/// Per-processor, per-run context: `RunContext` plus a storage-context map
/// rewritten with this processor's name appended under `run`/`test`/
/// `lastrun`/`lasttest`/`template`/`templatetest` (spec.md §6).
pub struct ProcessingContext {
    run: Arc<RunContext>,
    processor_name: String,
    storage: StorageContext,
}

impl ProcessingContext {
    pub fn new(run: Arc<RunContext>, processor_name: impl Into<String>) -> Self {
        let processor_name = processor_name.into();
        let mut storage = run.storage().clone();

        if let Some(runbase) = run.storage().get("runbase") {
            storage.insert("run", runbase.join(&processor_name));
        }
        if let Some(runbase) = run.storage().get("runbase") {
            storage.insert("test", runbase.join(&processor_name).join("test"));
        }
        if let Some(lastrun) = run.storage().get("lastrun") {
            storage.insert("lastrun", lastrun.join(&processor_name));
            storage.insert("lasttest", lastrun.join(&processor_name).join("test"));
        }
        if let Some(templatebase) = run.storage().get("templatebase") {
            storage.insert("template", templatebase.join(&processor_name));
            storage.insert("templatetest", templatebase.join(&processor_name).join("test"));
        }

        Self { run, processor_name, storage }
    }

    pub fn processor_name(&self) -> &str {
        &self.processor_name
    }

    pub fn run_context(&self) -> &RunContext {
        &self.run
    }

    pub fn storage(&self) -> &StorageContext {
        &self.storage
    }

    pub fn terminated(&self) -> bool {
        self.run.terminated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_context_uri_with_relative_path() {
        let mut storage = StorageContext::new();
        storage.insert("run", PathBuf::from("/data/run1"));
        assert_eq!(storage.resolve("context://run/spikes.bin").unwrap(), PathBuf::from("/data/run1/spikes.bin"));
        assert_eq!(storage.resolve("context://run").unwrap(), PathBuf::from("/data/run1"));
    }

    #[test]
    fn resolve_rejects_unknown_context() {
        let storage = StorageContext::new();
        assert!(storage.resolve("context://nope/x").is_err());
    }

    #[test]
    fn run_context_rejects_duplicate_run_directory() {
        let dir = std::env::temp_dir().join(format!("axon-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let _first = RunContext::new(&dir, "group1", "run1", None, false).unwrap();
        let second = RunContext::new(&dir, "group1", "run1", None, false);
        assert!(second.is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn terminate_with_error_keeps_first_message() {
        let dir = std::env::temp_dir().join(format!("axon-test-err-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let ctx = RunContext::new(&dir, "group1", "run1", None, false).unwrap();
        ctx.terminate_with_error("B", "Prepare", "disk full");
        ctx.terminate_with_error("C", "Process", "ignored, already terminated");
        assert_eq!(ctx.first_error().unwrap(), "Processor `B` failed in `Prepare`: disk full");
        assert!(ctx.terminated());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
