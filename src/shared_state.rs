//! Shared state: a typed atomic cell with a self/peers/external permission
//! matrix, optionally linked across processors to one master cell
//! (spec.md §4.7).

use std::any::Any;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{AxonError, Result};

/// Read/write permission one party holds over a shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    None,
    Read,
    Write,
}

/// `(self, peers, external)` permission triple.
#[derive(Debug, Clone, Copy)]
pub struct Permissions {
    pub self_: Permission,
    pub peers: Permission,
    pub external: Permission,
}

impl Permissions {
    pub fn new(self_: Permission, peers: Permission, external: Permission) -> Self {
        Self { self_, peers, external }
    }

    /// Two states are linkable iff both have `peers != None` and, for each
    /// ordered pair `(x, y)`, `x.peers == Read` implies `y.self == Read`,
    /// and `x.self != Read` implies `y.peers != Read` (spec.md §4.7/§9.7).
    pub fn is_compatible(&self, other: &Permissions) -> bool {
        if self.peers == Permission::None || other.peers == Permission::None {
            return false;
        }
        let violates = |x: &Permissions, y: &Permissions| {
            (x.peers == Permission::Read && y.self_ != Permission::Read)
                || (x.self_ != Permission::Read && y.peers == Permission::Read)
        };
        !violates(self, other) && !violates(other, self)
    }
}

/// A typed atomic cell whose reads/writes can be redirected to a master
/// cell shared with other processors.
pub struct SharedState<T: Copy + Send + Sync + 'static> {
    permissions: Permissions,
    name: String,
    units: String,
    description: String,
    local: Arc<Mutex<T>>,
    target: Mutex<Arc<Mutex<T>>>,
    is_master: AtomicBool,
}

impl<T: Copy + Send + Sync + 'static> SharedState<T> {
    pub fn new(name: impl Into<String>, default: T, permissions: Permissions) -> Self {
        let local = Arc::new(Mutex::new(default));
        Self {
            permissions,
            name: name.into(),
            units: String::new(),
            description: String::new(),
            target: Mutex::new(local.clone()),
            local,
            is_master: AtomicBool::new(false),
        }
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn is_compatible(&self, other: &SharedState<T>) -> bool {
        self.permissions.is_compatible(&other.permissions)
    }

    pub fn set_master(&self) {
        self.is_master.store(true, Ordering::Release);
    }

    pub fn is_master(&self) -> bool {
        self.is_master.load(Ordering::Acquire)
    }

    /// Points this state's cell at `master`'s backing cell. Forbidden on a
    /// state already flagged as master.
    pub fn share(&self, master: &SharedState<T>) {
        assert!(!self.is_master(), "cannot re-share a state already designated master");
        *self.target.lock() = master.local.clone();
    }

    /// Reverts to this state's own local cell.
    pub fn unshare(&self) {
        *self.target.lock() = self.local.clone();
    }

    pub fn get(&self) -> T {
        *self.target.lock().lock()
    }

    pub fn set(&self, value: T) {
        *self.target.lock().lock() = value;
    }

    pub fn exchange(&self, value: T) -> T {
        std::mem::replace(&mut *self.target.lock().lock(), value)
    }
}

impl<T> SharedState<T>
where
    T: Copy + Send + Sync + 'static + Display + FromStr,
{
    /// Generic string coercion for external-plane control (Retrieve).
    pub fn get_string(&self) -> String {
        self.get().to_string()
    }

    /// Generic string coercion for external-plane control (Update).
    /// Returns `false` (without mutating state) if `value` fails to parse.
    pub fn set_string(&self, value: &str) -> bool {
        match value.trim().parse::<T>() {
            Ok(parsed) => {
                self.set(parsed);
                true
            }
            Err(_) => false,
        }
    }
}

/// Links a group of shared states declared under one `states:` YAML entry:
/// verifies pairwise compatibility, selects the first state whose `self` is
/// not `Write` as master, and points all others at it (spec.md §4.6 step 5).
pub fn link_group<T>(states: &[&SharedState<T>]) -> crate::error::Result<()>
where
    T: Copy + Send + Sync + 'static,
{
    for i in 0..states.len() {
        for j in (i + 1)..states.len() {
            if !states[i].is_compatible(states[j]) {
                return Err(crate::error::AxonError::invalid_graph(format!(
                    "shared states `{}` and `{}` have incompatible permissions",
                    states[i].name(),
                    states[j].name()
                )));
            }
        }
    }

    let master_idx = states
        .iter()
        .position(|s| s.permissions().self_ != Permission::Write)
        .ok_or_else(|| {
            crate::error::AxonError::invalid_graph("no eligible master (self != Write) in shared-state group")
        })?;

    states[master_idx].set_master();
    for (idx, state) in states.iter().enumerate() {
        if idx != master_idx {
            state.share(states[master_idx]);
        }
    }
    Ok(())
}

/// Object-safe view of a `SharedState<T>`, used by the processor/graph layer
/// to register and link states without knowing each one's concrete `T`
/// (design note "exposed methods and shared states ... two hash maps").
pub trait AnySharedState: Send + Sync {
    fn name(&self) -> &str;
    fn permissions(&self) -> Permissions;
    fn is_master(&self) -> bool;
    fn set_master(&self);
    fn get_string(&self) -> String;
    fn set_string(&self, value: &str) -> bool;
    fn as_any(&self) -> &dyn Any;

    /// Points this state at `master`, downcasting internally. Returns
    /// `false` (without mutating anything) if the concrete types differ.
    fn share_dyn(&self, master: &dyn AnySharedState) -> bool;
}

impl<T> AnySharedState for SharedState<T>
where
    T: Copy + Send + Sync + 'static + Display + FromStr,
{
    fn name(&self) -> &str {
        self.name()
    }

    fn permissions(&self) -> Permissions {
        self.permissions()
    }

    fn is_master(&self) -> bool {
        self.is_master()
    }

    fn set_master(&self) {
        self.set_master()
    }

    fn get_string(&self) -> String {
        self.get_string()
    }

    fn set_string(&self, value: &str) -> bool {
        self.set_string(value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn share_dyn(&self, master: &dyn AnySharedState) -> bool {
        match master.as_any().downcast_ref::<SharedState<T>>() {
            Some(master) => {
                self.share(master);
                true
            }
            None => false,
        }
    }
}

/// Type-erased counterpart of [`link_group`], used by the graph builder when
/// linking a `states:` group parsed from YAML, where each member's concrete
/// scalar type is known only at each processor's own registration site.
pub fn link_group_dyn(states: &[Arc<dyn AnySharedState>]) -> Result<()> {
    for i in 0..states.len() {
        for j in (i + 1)..states.len() {
            if !states[i].permissions().is_compatible(&states[j].permissions()) {
                return Err(AxonError::invalid_graph(format!(
                    "shared states `{}` and `{}` have incompatible permissions",
                    states[i].name(),
                    states[j].name()
                )));
            }
        }
    }

    let master_idx = states
        .iter()
        .position(|s| s.permissions().self_ != Permission::Write)
        .ok_or_else(|| AxonError::invalid_graph("no eligible master (self != Write) in shared-state group"))?;

    states[master_idx].set_master();
    for (idx, state) in states.iter().enumerate() {
        if idx != master_idx && !state.share_dyn(states[master_idx].as_ref()) {
            return Err(AxonError::invalid_graph(format!(
                "shared states `{}` and `{}` have mismatched underlying types",
                state.name(),
                states[master_idx].name()
            )));
        }
    }
    Ok(())
}
