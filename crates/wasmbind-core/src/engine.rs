//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] is the compilation and execution backend behind every
//! [`Vm`](crate::Vm) and [`Validator`](crate::Validator). It is:
//! - Cheap to clone and safe to share between threads
//! - Synchronous: host functions run on the thread that called `execute`
//! - Set up with fuel metering only when statistics or a cost limit need it

use std::sync::Arc;

use tracing::info;
use wasmtime::{Config, Engine};

use wasmbind_common::{OptLevel, RuntimeError, VmConfig};

/// Thread-safe WebAssembly engine wrapper.
///
/// # Example
///
/// ```ignore
/// use wasmbind_common::VmConfig;
/// use wasmbind_core::WasmEngine;
///
/// let engine = WasmEngine::new(&VmConfig::default())?;
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: VmConfig,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the Wasmtime configuration is invalid, for example
    /// when a disabled proposal is required by an enabled one.
    pub fn new(config: &VmConfig) -> Result<Self, RuntimeError> {
        let mut wasmtime_config = Config::new();
        let engine_config = &config.engine;

        // Host functions are invoked re-entrantly on the calling thread
        wasmtime_config.async_support(false);

        if config.metering_enabled() {
            wasmtime_config.consume_fuel(true);
        }

        wasmtime_config.cranelift_opt_level(match engine_config.opt_level {
            OptLevel::None => wasmtime::OptLevel::None,
            OptLevel::Speed => wasmtime::OptLevel::Speed,
            OptLevel::SpeedAndSize => wasmtime::OptLevel::SpeedAndSize,
        });

        wasmtime_config.wasm_simd(engine_config.simd);
        if !engine_config.simd {
            // Relaxed SIMD builds on SIMD
            wasmtime_config.wasm_relaxed_simd(false);
        }
        wasmtime_config.wasm_bulk_memory(engine_config.bulk_memory);
        wasmtime_config.wasm_reference_types(engine_config.reference_types);
        wasmtime_config.wasm_multi_value(engine_config.multi_value);

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(
            opt_level = ?engine_config.opt_level,
            fuel_metering = config.metering_enabled(),
            "Wasmtime engine initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
        })
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the configuration the engine was built from.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Check if fuel metering is enabled.
    pub fn is_metering_enabled(&self) -> bool {
        self.config.metering_enabled()
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("opt_level", &self.config.engine.opt_level)
            .field("fuel_metering", &self.config.metering_enabled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmbind_common::StatisticsConfig;

    #[test]
    fn test_engine_creation_default() {
        let engine = WasmEngine::new(&VmConfig::default());

        assert!(engine.is_ok());
        let engine = engine.unwrap();
        assert!(!engine.is_metering_enabled());
    }

    #[test]
    fn test_engine_creation_with_metering() {
        let config = VmConfig {
            statistics: StatisticsConfig::all(),
            ..Default::default()
        };
        let engine = WasmEngine::new(&config).unwrap();

        assert!(engine.is_metering_enabled());
    }

    #[test]
    fn test_engine_creation_without_simd() {
        let mut config = VmConfig::default();
        config.engine.simd = false;
        config.engine.opt_level = OptLevel::None;

        assert!(WasmEngine::new(&config).is_ok());
    }

    #[test]
    fn test_engine_debug() {
        let engine = WasmEngine::new(&VmConfig::default()).unwrap();

        let debug_str = format!("{engine:?}");
        assert!(debug_str.contains("WasmEngine"));
        assert!(debug_str.contains("fuel_metering"));
    }
}
