//! Error types for wasmbind.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`RuntimeError`]: Top-level errors for every embedding operation
//! - [`ExecutionError`]: Failures while calling into a guest function
//! - [`ValueError`]: Value marshalling failures at call boundaries
//! - [`LinkError`]: Import object and link environment failures
//! - [`RegistryError`]: Host function registry violations
//! - [`HostFunctionError`]: Errors raised by host function bodies
//! - [`WasiError`]: WASI-related errors

use std::io;

use thiserror::Error;

use crate::types::ValueKind;

/// Top-level runtime errors.
///
/// Every fallible engine call is translated into one of these variants at the
/// boundary, so callers never see raw engine errors.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Module bytes were missing, truncated, or malformed.
    #[error("Load failed: {reason}")]
    Load {
        /// Description of the load failure.
        reason: String,
    },

    /// The module violated the engine's structural or type rules.
    #[error("Validation failed: {diagnostic}")]
    Validation {
        /// Diagnostic reported by the engine validator.
        diagnostic: String,
    },

    /// Instantiation failed (unresolved import, trapping start function).
    #[error("Instantiation failed: {reason}")]
    Instantiation {
        /// Description of the instantiation failure.
        reason: String,
    },

    /// Calling a guest function failed.
    #[error("Execution failed: {0}")]
    Execution(#[from] ExecutionError),

    /// Building or linking an import object failed.
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// The host function registry was used incorrectly.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// WASI operation failed.
    #[error("WASI error: {0}")]
    Wasi(#[from] WasiError),

    /// An operation was invoked in a VM state that does not allow it.
    #[error("Wrong VM workflow: cannot {operation} while {state}")]
    WrongWorkflow {
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the VM was in.
        state: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// Errors raised while executing a guest function.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// No module has been instantiated yet.
    #[error("No module instantiated")]
    NotInstantiated,

    /// The requested export does not exist or is not a function.
    #[error("Function not found: {name}")]
    FunctionNotFound {
        /// Qualified name of the missing function.
        name: String,
    },

    /// Arguments or results did not match the function signature.
    #[error(transparent)]
    Value(#[from] ValueError),

    /// A WebAssembly trap occurred during execution.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
        /// Trap code if available.
        code: Option<String>,
    },

    /// The configured cost limit was exhausted.
    #[error("Cost limit exceeded")]
    CostLimitExceeded,

    /// A host function returned an error.
    #[error("Host function error: {0}")]
    HostFunction(#[from] HostFunctionError),
}

/// Value marshalling errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The number of values differs from the signature.
    #[error("Arity mismatch: expected {expected} values, got {actual}")]
    ArityMismatch {
        /// Number of values the signature declares.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },

    /// A value's kind differs from the signature.
    #[error("Type mismatch at position {index}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Position of the offending value.
        index: usize,
        /// Kind declared by the signature.
        expected: ValueKind,
        /// Kind actually supplied.
        actual: ValueKind,
    },

    /// The engine produced a type this layer cannot represent.
    #[error("Unsupported value type: {ty}")]
    UnsupportedType {
        /// Engine description of the type.
        ty: String,
    },

    /// An external reference carried data not created by this layer.
    #[error("External reference was not created by the host")]
    ForeignReference,
}

/// Import object and linking errors.
#[derive(Error, Debug)]
pub enum LinkError {
    /// A symbol name was added twice to one import object.
    #[error("Duplicate import name: {module}.{name}")]
    DuplicateImportName {
        /// Module namespace of the import object.
        module: String,
        /// The duplicated symbol name.
        name: String,
    },

    /// A module name was registered twice in one VM.
    #[error("Module already registered: {module}")]
    DuplicateModule {
        /// The duplicated module name.
        module: String,
    },

    /// Module names must not be empty.
    #[error("Module name must not be empty")]
    EmptyModuleName,

    /// The import object was already deleted.
    #[error("Import object '{module}' was deleted")]
    ImportObjectDeleted {
        /// Module namespace of the deleted import object.
        module: String,
    },

    /// A host table, memory, or global definition is invalid.
    #[error("Invalid definition: {reason}")]
    InvalidDefinition {
        /// Description of the problem.
        reason: String,
    },

    /// The engine rejected a symbol while linking.
    #[error("Incompatible import {module}.{name}: {reason}")]
    Incompatible {
        /// Module namespace of the symbol.
        module: String,
        /// Symbol name.
        name: String,
        /// Engine diagnostic.
        reason: String,
    },
}

/// Host function registry violations.
///
/// Under correct usage these never occur; they are reported instead of
/// continuing with stale host state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The function id was never registered or has been revoked.
    #[error("Unknown host function: id {id}")]
    UnknownHostFunction {
        /// The id the engine asked for.
        id: u64,
    },
}

/// Errors from host function implementations.
///
/// Host function bodies return these; the VM surfaces them as
/// [`ExecutionError::HostFunction`], except [`HostFunctionError::Terminate`]
/// which ends guest execution successfully.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostFunctionError {
    /// The host function failed.
    #[error("Host function failed: {reason}")]
    Failed {
        /// Description of the failure.
        reason: String,
    },

    /// Invalid argument was passed to a host function.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Description of why the argument was invalid.
        reason: String,
    },

    /// Guest memory could not be accessed.
    #[error("Memory access failed: {reason}")]
    MemoryAccess {
        /// Description of the access failure.
        reason: String,
    },

    /// Stop guest execution without reporting an error.
    #[error("Execution terminated by host")]
    Terminate,
}

/// WASI-related errors.
#[derive(Error, Debug)]
pub enum WasiError {
    /// Failed to initialize WASI context.
    #[error("WASI initialization failed: {reason}")]
    InitializationFailed {
        /// Description of the initialization failure.
        reason: String,
    },

    /// A WASI filesystem operation failed.
    #[error("WASI filesystem error: {operation}")]
    FilesystemError {
        /// The filesystem operation that failed.
        operation: String,
    },

    /// WASI environment configuration error.
    #[error("WASI environment error: {reason}")]
    EnvironmentError {
        /// Description of the environment error.
        reason: String,
    },

    /// The VM was created without the WASI host registration.
    #[error("WASI is not enabled for this VM")]
    NotEnabled,
}

impl RuntimeError {
    /// Create a new `Load` error.
    pub fn load(reason: impl Into<String>) -> Self {
        Self::Load {
            reason: reason.into(),
        }
    }

    /// Create a new `Validation` error.
    pub fn validation(diagnostic: impl Into<String>) -> Self {
        Self::Validation {
            diagnostic: diagnostic.into(),
        }
    }

    /// Create a new `Instantiation` error.
    pub fn instantiation(reason: impl Into<String>) -> Self {
        Self::Instantiation {
            reason: reason.into(),
        }
    }

    /// Create a new `WrongWorkflow` error.
    pub fn wrong_workflow(operation: &'static str, state: impl Into<String>) -> Self {
        Self::WrongWorkflow {
            operation,
            state: state.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error came from loading module bytes.
    pub fn is_load(&self) -> bool {
        matches!(self, Self::Load { .. } | Self::Io(_))
    }

    /// Returns `true` if this error came from validation.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Returns `true` if this error came from instantiation.
    pub fn is_instantiation(&self) -> bool {
        matches!(self, Self::Instantiation { .. })
    }

    /// Returns `true` if this error came from executing a guest function.
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns `true` if this error is a WebAssembly trap.
    pub fn is_trap(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::Trap { .. }))
    }
}

impl From<ValueError> for RuntimeError {
    fn from(err: ValueError) -> Self {
        Self::Execution(ExecutionError::Value(err))
    }
}

impl From<HostFunctionError> for RuntimeError {
    fn from(err: HostFunctionError) -> Self {
        Self::Execution(ExecutionError::HostFunction(err))
    }
}
