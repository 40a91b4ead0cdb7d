//! Core embedding layer for wasmbind.
//!
//! This crate lets a host program drive a Wasmtime engine through a staged,
//! explicitly checked pipeline:
//! - [`WasmEngine`]: Configured Wasmtime engine, shared between VMs
//! - [`ModuleHandle`]: Parsed module bytes, with import/export introspection
//! - [`Validator`]: Stateless module validation
//! - [`ImportObject`]: Named host functions, tables, memories, and globals
//! - [`registry`]: Process-wide host function registry
//! - [`Vm`]: The load → validate → instantiate → execute state machine
//! - [`WasmValue`] with [`encode`](value::encode)/[`decode`](value::decode):
//!   values at call boundaries
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (Shared across VMs, thread-safe)                       │
//! │  - Compilation settings and proposals                   │
//! │  - Fuel metering for statistics and cost limits         │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Vm                               │
//! │  (One per calling thread)                               │
//! │  - Store<VmContext> + Linker                            │
//! │  - Registered modules and import objects                │
//! │  - Main module state machine                            │
//! └─────────────────────────────────────────────────────────┘
//!                            │ host calls by id
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │               Host function registry                    │
//! │  (Process-wide, one mutex)                              │
//! │  - Closure + shared context per id                      │
//! │  - Ids revoked when their import object is deleted      │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod import;
pub mod module;
pub mod registry;
pub mod statistics;
pub mod store;
pub mod validator;
pub mod value;
pub mod vm;
pub mod wasi;

pub use engine::WasmEngine;
pub use import::{
    CallingFrame, HostFunction, HostGlobal, HostMemory, HostTable, ImportObject, Mutability,
};
pub use module::{ExportDescriptor, ExternKind, ImportDescriptor, ModuleHandle};
pub use registry::{FunctionId, SharedContext};
pub use statistics::Statistics;
pub use store::{LogEntry, LogLevel, VmContext, VmStore};
pub use validator::Validator;
pub use value::{ExternRef, FuncRef, FunctionType, WasmValue};
pub use vm::{HostRegistration, Vm, VmState, WasmSource};
pub use wasi::{Preopen, WASI_MODULE_NAME, WasiEnvironment};
