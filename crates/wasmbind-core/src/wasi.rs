//! WASI environment for preview1 import objects.
//!
//! A [`WasiEnvironment`] keeps the ordered argument, `KEY=VALUE` environment,
//! and preopened directory lists a WASI import object was created with. The
//! engine's WASI context is built from it on every instantiation, so
//! reinitializing the environment takes effect on the next instantiate.

use std::path::{Path, PathBuf};

use tracing::debug;
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use wasmbind_common::WasiError;

/// Module name WASI preview1 guests import from.
pub const WASI_MODULE_NAME: &str = "wasi_snapshot_preview1";

/// A preopened directory mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preopen {
    /// Directory on the host.
    pub host: PathBuf,
    /// Path the guest sees.
    pub guest: String,
}

impl Preopen {
    /// Parse `hostPath:guestPath`, or `path` meaning the identity mapping.
    ///
    /// A leading drive prefix such as `C:\` is part of the host path, not a
    /// separator.
    ///
    /// # Errors
    ///
    /// Returns [`WasiError::EnvironmentError`] if either side is empty.
    pub fn parse(mapping: &str) -> Result<Self, WasiError> {
        let (host, guest) = split_mapping(mapping).unwrap_or((mapping, mapping));
        if host.is_empty() || guest.is_empty() {
            return Err(WasiError::EnvironmentError {
                reason: format!("Invalid preopen '{mapping}'"),
            });
        }
        Ok(Self {
            host: PathBuf::from(host),
            guest: guest.to_string(),
        })
    }
}

/// Split at the first `:` that is not part of a drive prefix.
fn split_mapping(mapping: &str) -> Option<(&str, &str)> {
    let bytes = mapping.as_bytes();
    let drive = bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && matches!(bytes[2], b'\\' | b'/');
    let skip = if drive { 2 } else { 0 };
    let at = skip + mapping[skip..].find(':')?;
    Some((&mapping[..at], &mapping[at + 1..]))
}

/// Arguments, environment, and preopens of a WASI import object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WasiEnvironment {
    args: Vec<String>,
    envs: Vec<String>,
    preopens: Vec<Preopen>,
}

impl WasiEnvironment {
    /// Build an environment from caller-supplied sequences.
    ///
    /// The inputs are copied; the caller's sequences are never modified.
    ///
    /// # Errors
    ///
    /// Returns [`WasiError::EnvironmentError`] for an environment string
    /// without `=` or an empty key, or a malformed preopen.
    pub fn new(
        args: &[impl AsRef<str>],
        envs: &[impl AsRef<str>],
        preopens: &[impl AsRef<str>],
    ) -> Result<Self, WasiError> {
        let envs: Vec<String> = envs.iter().map(|e| e.as_ref().to_string()).collect();
        for env in &envs {
            match env.split_once('=') {
                Some((key, _)) if !key.is_empty() => {}
                _ => {
                    return Err(WasiError::EnvironmentError {
                        reason: format!("Expected KEY=VALUE, got '{env}'"),
                    });
                }
            }
        }

        Ok(Self {
            args: args.iter().map(|a| a.as_ref().to_string()).collect(),
            envs,
            preopens: preopens
                .iter()
                .map(|p| Preopen::parse(p.as_ref()))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Program arguments, in order.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// `KEY=VALUE` environment strings, in order.
    pub fn envs(&self) -> &[String] {
        &self.envs
    }

    /// Value of an environment variable, if set.
    pub fn env(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .filter_map(|e| e.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    /// Preopened directories, in order.
    pub fn preopens(&self) -> &[Preopen] {
        &self.preopens
    }

    /// Append a preopened directory.
    pub fn push_preopen(&mut self, preopen: Preopen) {
        self.preopens.push(preopen);
    }

    /// Build a fresh engine WASI context from this environment.
    ///
    /// Standard streams are inherited from the host process.
    ///
    /// # Errors
    ///
    /// Returns [`WasiError::FilesystemError`] if a preopened directory
    /// cannot be opened.
    pub(crate) fn build(&self) -> Result<WasiP1Ctx, WasiError> {
        let mut builder = WasiCtxBuilder::new();
        builder.inherit_stdio().args(&self.args);

        for env in &self.envs {
            if let Some((key, value)) = env.split_once('=') {
                builder.env(key, value);
            }
        }

        for preopen in &self.preopens {
            open_dir(&mut builder, &preopen.host, &preopen.guest)?;
        }

        debug!(
            args = self.args.len(),
            envs = self.envs.len(),
            preopens = self.preopens.len(),
            "WASI context built"
        );
        Ok(builder.build_p1())
    }
}

fn open_dir(builder: &mut WasiCtxBuilder, host: &Path, guest: &str) -> Result<(), WasiError> {
    builder
        .preopened_dir(host, guest, DirPerms::all(), FilePerms::all())
        .map_err(|e| WasiError::FilesystemError {
            operation: format!("preopen {} as {guest}: {e}", host.display()),
        })?;
    Ok(())
}
