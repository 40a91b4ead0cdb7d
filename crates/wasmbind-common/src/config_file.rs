//! Configuration file structures for wasmbind.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`WasiSection`]: Initial WASI environment for the built-in WASI module

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::VmConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [vm]
/// cost_limit = 5_000_000
///
/// [vm.engine]
/// opt_level = "speed"
/// max_memory_pages = 256
///
/// [vm.host_registrations]
/// wasi = true
///
/// [vm.statistics]
/// instruction_counting = true
///
/// [wasi]
/// args = ["main.wasm", "--verbose"]
/// envs = ["RUST_LOG=debug"]
/// preopens = ["./data:/data"]
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// VM configuration.
    #[serde(default)]
    pub vm: VmConfig,

    /// Initial WASI environment.
    #[serde(default)]
    pub wasi: WasiSection,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        let config = Self::from_toml(&content)?;
        debug!(path = %path.display(), "Configuration file loaded");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// WASI environment from config file.
///
/// Environment entries use `KEY=VALUE`; preopens use `host:guest` or a
/// single path mapped to itself.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WasiSection {
    /// Guest command-line arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Guest environment variables.
    #[serde(default)]
    pub envs: Vec<String>,

    /// Preopened directories.
    #[serde(default)]
    pub preopens: Vec<String>,
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}
