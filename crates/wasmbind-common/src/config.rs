//! Configuration structures for wasmbind.
//!
//! This module defines configuration options for various components:
//! - [`VmConfig`]: Top-level configuration for a VM
//! - [`EngineConfig`]: Wasmtime engine settings (optimization, proposals, memory)
//! - [`HostRegistrations`]: Built-in host modules the VM registers itself
//! - [`StatisticsConfig`]: What the VM's statistics sink measures

use serde::{Deserialize, Serialize};

/// Top-level VM configuration.
///
/// It can be loaded from files (TOML, JSON) or built in code.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VmConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Built-in host modules.
    #[serde(default)]
    pub host_registrations: HostRegistrations,

    /// Statistics collection.
    #[serde(default)]
    pub statistics: StatisticsConfig,

    /// Cumulative cost (fuel) budget for all executions of the VM.
    #[serde(default)]
    pub cost_limit: Option<u64>,
}

impl VmConfig {
    /// Create a configuration with the WASI host registration enabled.
    pub fn with_wasi() -> Self {
        Self {
            host_registrations: HostRegistrations { wasi: true },
            ..Default::default()
        }
    }

    /// Returns `true` if the engine must meter fuel for this configuration.
    pub fn metering_enabled(&self) -> bool {
        self.statistics.instruction_counting
            || self.statistics.cost_measuring
            || self.cost_limit.is_some()
    }
}

/// Cranelift optimization level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    /// No optimizations.
    None,
    /// Optimize for speed.
    #[default]
    Speed,
    /// Optimize for speed and code size.
    SpeedAndSize,
}

/// Wasmtime engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Code generation optimization level.
    #[serde(default)]
    pub opt_level: OptLevel,

    /// Enable the SIMD proposal.
    #[serde(default = "defaults::enabled")]
    pub simd: bool,

    /// Enable the bulk memory proposal.
    #[serde(default = "defaults::enabled")]
    pub bulk_memory: bool,

    /// Enable the reference types proposal.
    #[serde(default = "defaults::enabled")]
    pub reference_types: bool,

    /// Enable the multi-value proposal.
    #[serde(default = "defaults::enabled")]
    pub multi_value: bool,

    /// Maximum linear memory pages (64 KiB each) per memory.
    ///
    /// `None` leaves growth bounded only by the module's own limits.
    #[serde(default)]
    pub max_memory_pages: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::default(),
            simd: defaults::enabled(),
            bulk_memory: defaults::enabled(),
            reference_types: defaults::enabled(),
            multi_value: defaults::enabled(),
            max_memory_pages: None,
        }
    }
}

impl EngineConfig {
    /// Maximum linear memory in bytes, if limited.
    pub fn max_memory_bytes(&self) -> Option<usize> {
        self.max_memory_pages
            .map(|pages| (pages as usize).saturating_mul(WASM_PAGE_SIZE))
    }
}

/// Size of one WebAssembly linear memory page.
pub const WASM_PAGE_SIZE: usize = 64 * 1024;

/// Built-in host modules a VM registers on creation.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HostRegistrations {
    /// Register a WASI preview1 import object.
    #[serde(default)]
    pub wasi: bool,
}

/// Statistics collection switches.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StatisticsConfig {
    /// Count executed instructions (approximated by fuel).
    #[serde(default)]
    pub instruction_counting: bool,

    /// Accumulate execution cost.
    #[serde(default)]
    pub cost_measuring: bool,

    /// Measure wall-clock execution time.
    #[serde(default)]
    pub time_measuring: bool,
}

impl StatisticsConfig {
    /// Enable every measurement.
    pub fn all() -> Self {
        Self {
            instruction_counting: true,
            cost_measuring: true,
            time_measuring: true,
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn enabled() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VmConfig::default();

        assert_eq!(config.engine.opt_level, OptLevel::Speed);
        assert!(config.engine.simd);
        assert!(config.engine.bulk_memory);
        assert!(config.engine.reference_types);
        assert!(config.engine.multi_value);
        assert!(config.engine.max_memory_pages.is_none());
        assert!(!config.host_registrations.wasi);
        assert!(!config.statistics.instruction_counting);
        assert!(config.cost_limit.is_none());
        assert!(!config.metering_enabled());
    }

    #[test]
    fn test_config_serialization() {
        let config = VmConfig::with_wasi();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: VmConfig = serde_json::from_str(&json).unwrap();

        assert!(deserialized.host_registrations.wasi);
        assert_eq!(config.engine.opt_level, deserialized.engine.opt_level);
    }

    #[test]
    fn test_metering_enabled() {
        let config = VmConfig {
            cost_limit: Some(1_000),
            ..Default::default()
        };
        assert!(config.metering_enabled());

        let config = VmConfig {
            statistics: StatisticsConfig {
                time_measuring: true,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(!config.metering_enabled());

        let config = VmConfig {
            statistics: StatisticsConfig::all(),
            ..Default::default()
        };
        assert!(config.metering_enabled());
    }

    #[test]
    fn test_max_memory_bytes() {
        let config = EngineConfig {
            max_memory_pages: Some(2),
            ..Default::default()
        };
        assert_eq!(config.max_memory_bytes(), Some(2 * 65536));
        assert_eq!(EngineConfig::default().max_memory_bytes(), None);
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"engine": {"opt_level": "speed_and_size", "simd": false}}"#;
        let config: VmConfig = serde_json::from_str(json).unwrap();

        // Explicitly set values
        assert_eq!(config.engine.opt_level, OptLevel::SpeedAndSize);
        assert!(!config.engine.simd);
        // Default values for unspecified fields
        assert!(config.engine.bulk_memory);
        assert!(!config.host_registrations.wasi);
    }
}
