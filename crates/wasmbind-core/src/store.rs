//! Per-VM store state and store inspection.
//!
//! This module provides:
//! - [`VmContext`]: State owned by a VM's engine store, reachable from host functions
//! - [`LogEntry`] and [`LogLevel`]: Structured logging from guest code
//! - [`VmStore`]: Read-only view of a VM's registered and active modules

use std::time::Instant;

use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;

/// State owned by a VM's engine store.
///
/// Host functions reach it through
/// [`CallingFrame::vm_context_mut`](crate::CallingFrame::vm_context_mut).
pub struct VmContext {
    /// WASI context, rebuilt from the WASI environment on every instantiation.
    pub(crate) wasi: WasiP1Ctx,

    /// Resource limits enforced on memories and tables.
    pub(crate) limits: StoreLimits,

    /// Logs collected from guest code.
    logs: Vec<LogEntry>,

    /// Exit code of the last WASI `proc_exit`.
    pub(crate) exit_code: Option<i32>,
}

/// A single log entry from guest code.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Log level (debug, info, warn, error).
    pub level: LogLevel,

    /// Log message content.
    pub message: String,

    /// Timestamp when the log was recorded.
    pub timestamp: Instant,
}

/// Log level for guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug-level messages.
    Debug,
    /// Informational messages.
    Info,
    /// Warning messages.
    Warn,
    /// Error messages.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl VmContext {
    /// Create a context with an empty WASI environment.
    pub(crate) fn new(limits: StoreLimits) -> Self {
        Self {
            wasi: WasiCtxBuilder::new().build_p1(),
            limits,
            logs: Vec::new(),
            exit_code: None,
        }
    }

    /// Add a log entry.
    pub fn log(&mut self, level: LogLevel, message: String) {
        self.logs.push(LogEntry {
            level,
            message,
            timestamp: Instant::now(),
        });
    }

    /// Logs collected so far.
    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    /// Take the collected logs, leaving none behind.
    pub fn take_logs(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.logs)
    }

    /// Exit code passed to the last WASI `proc_exit`, if any.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Take over the logs and exit code of the context a rebuilt store
    /// replaces.
    pub(crate) fn inherit(&mut self, previous: VmContext) {
        self.logs = previous.logs;
        self.exit_code = previous.exit_code;
    }
}

/// Create a new engine store for a VM.
///
/// Memory growth is capped when the engine configuration sets
/// `max_memory_pages`. Fuel is assigned per call by the VM.
pub(crate) fn create_store(engine: &WasmEngine) -> Store<VmContext> {
    let mut limits = StoreLimitsBuilder::new();
    if let Some(bytes) = engine.config().engine.max_memory_bytes() {
        limits = limits.memory_size(bytes);
    }

    let mut store = Store::new(engine.inner(), VmContext::new(limits.build()));
    store.limiter(|ctx| &mut ctx.limits);
    store
}

/// Read-only view of a VM's module registry.
///
/// Obtained from [`Vm::store`](crate::Vm::store); borrowing it transfers no
/// ownership.
#[derive(Clone, Copy)]
pub struct VmStore<'a> {
    pub(crate) registered: &'a crate::vm::Registry,
    pub(crate) active: Option<&'a wasmtime::Module>,
}

impl std::fmt::Debug for VmStore<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmStore")
            .field("modules", &self.module_names())
            .field("active", &self.active.is_some())
            .finish()
    }
}

impl VmStore<'_> {
    /// Names of the registered modules and import objects, sorted.
    pub fn module_names(&self) -> Vec<String> {
        self.registered.keys().cloned().collect()
    }

    /// Number of registered modules and import objects.
    pub fn module_count(&self) -> usize {
        self.registered.len()
    }

    /// Exported function names of the active instance, sorted.
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .active
            .map(|module| {
                module
                    .exports()
                    .filter(|export| export.ty().func().is_some())
                    .map(|export| export.name().to_string())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Function names exported by a registered module, sorted.
    ///
    /// Empty if no module is registered under `module`.
    pub fn registered_function_names(&self, module: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .registered
            .get(module)
            .map(|entry| entry.functions().into_iter().map(|(name, _)| name).collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}
