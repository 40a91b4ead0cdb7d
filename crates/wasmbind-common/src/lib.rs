//! Common types, errors, and configuration for wasmbind.
//!
//! This crate provides shared functionality used across the wasmbind workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for VM and engine settings
//! - Value kinds shared by signatures and the value codec

pub mod config;
pub mod config_file;
pub mod error;
pub mod types;

pub use config::{
    EngineConfig, HostRegistrations, OptLevel, StatisticsConfig, VmConfig, WASM_PAGE_SIZE,
};
pub use config_file::{ConfigFile, ConfigFileError, WasiSection};
pub use error::{
    ExecutionError, HostFunctionError, LinkError, RegistryError, RuntimeError, ValueError,
    WasiError,
};
pub use types::ValueKind;
