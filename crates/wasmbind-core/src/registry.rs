//! Process-wide host function registry.
//!
//! The engine cannot carry a typed Rust closure through its call path, so
//! every host function installed in a VM captures only a numeric
//! [`FunctionId`]. When guest code calls the function, the trampoline
//! resolves the id here to obtain the closure and the owning import object's
//! shared context.
//!
//! A single mutex guards the whole table. [`register`], [`lookup`], and
//! [`revoke`] are mutually exclusive system-wide; the lock is never held
//! while a host function body runs, so bodies may themselves build or drop
//! import objects.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use wasmbind_common::{HostFunctionError, RegistryError};

use crate::value::WasmValue;
use crate::import::CallingFrame;

/// Host data shared by every host function of one import object.
pub type SharedContext = Arc<dyn Any + Send + Sync>;

/// Signature of a host function body.
pub type HostFn = dyn for<'c> Fn(&mut CallingFrame<'c>, &[WasmValue]) -> Result<Vec<WasmValue>, HostFunctionError>
    + Send
    + Sync;

/// Identifier of a registered host function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionId(u64);

impl FunctionId {
    /// The raw numeric id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the trampoline needs to run a host function.
#[derive(Clone)]
pub struct RegistryEntry {
    /// The host function body.
    pub function: Arc<HostFn>,
    /// Shared context copied from the owning import object.
    pub context: Option<SharedContext>,
}

struct Registry {
    next_id: u64,
    entries: BTreeMap<FunctionId, RegistryEntry>,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    next_id: 1,
    entries: BTreeMap::new(),
});

/// Register a host function and its shared context, returning a fresh id.
pub fn register(function: Arc<HostFn>, context: Option<SharedContext>) -> FunctionId {
    let mut registry = REGISTRY.lock();
    let id = FunctionId(registry.next_id);
    registry.next_id += 1;
    registry.entries.insert(id, RegistryEntry { function, context });
    trace!(id = id.0, "Host function registered");
    id
}

/// Resolve an id for a call from the engine.
///
/// # Errors
///
/// Returns [`RegistryError::UnknownHostFunction`] if the id was never
/// registered or has been revoked.
pub fn lookup(id: FunctionId) -> Result<RegistryEntry, RegistryError> {
    REGISTRY
        .lock()
        .entries
        .get(&id)
        .cloned()
        .ok_or(RegistryError::UnknownHostFunction { id: id.0 })
}

/// Remove an id. Returns `false` if it was not registered.
pub fn revoke(id: FunctionId) -> bool {
    let removed = REGISTRY.lock().entries.remove(&id).is_some();
    trace!(id = id.0, removed, "Host function revoked");
    removed
}

/// Returns `true` if the id is currently registered.
pub fn contains(id: FunctionId) -> bool {
    REGISTRY.lock().entries.contains_key(&id)
}

/// Count live entries whose shared context is `context`.
pub fn context_references(context: &SharedContext) -> usize {
    REGISTRY
        .lock()
        .entries
        .values()
        .filter(|entry| {
            entry
                .context
                .as_ref()
                .is_some_and(|c| Arc::ptr_eq(c, context))
        })
        .count()
}
