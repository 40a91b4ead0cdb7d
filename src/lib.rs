//! wasmbind: drive WebAssembly modules from Rust.
//!
//! This facade re-exports the workspace crates:
//!
//! - [`wasmbind_common`]: Configuration and error types
//! - [`wasmbind_core`]: The VM, import objects, and the host function registry
//! - [`wasmbind_host`]: Guest logging and WASI data staging
//!
//! ```no_run
//! use wasmbind::{Vm, VmConfig, WasmValue};
//!
//! # fn main() -> Result<(), wasmbind::RuntimeError> {
//! wasmbind::init_tracing();
//! let mut vm = Vm::new(&VmConfig::default())?;
//! let result = vm.run_wasm(
//!     std::path::Path::new("add.wasm"),
//!     "add",
//!     &[WasmValue::I32(2), WasmValue::I32(3)],
//! )?;
//! assert_eq!(result, vec![WasmValue::I32(5)]);
//! # Ok(())
//! # }
//! ```

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use wasmbind_common;
pub use wasmbind_core;
pub use wasmbind_host;

pub use wasmbind_common::{ConfigFile, RuntimeError, VmConfig};
pub use wasmbind_core::{
    FunctionType, HostFunction, ImportObject, ModuleHandle, Vm, VmState, WasmValue,
};

/// Install a `tracing` subscriber writing to stderr.
///
/// The filter comes from `RUST_LOG`, defaulting to `info,wasmbind=debug`.
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wasmbind=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("Tracing initialized");
    }
    installed
}
