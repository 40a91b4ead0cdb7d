//! Staging host data for WASI guests.
//!
//! [`run_with_data_and_wasi`] hands a byte buffer to a guest through the
//! filesystem: the bytes go to a uniquely named temporary file, whose path is
//! published in the guest environment as [`DATA_ENV_KEY`] and whose directory
//! is preopened under its host path.

use std::io::Write;
use std::path::Path;

use tracing::{debug, instrument, warn};

use wasmbind_common::{RuntimeError, WasiError};
use wasmbind_core::{HostRegistration, Preopen, Vm, WasiEnvironment, WasmSource, WasmValue};

/// Environment variable carrying the staged file path.
pub const DATA_ENV_KEY: &str = "WasmEdge_DATA_TO_CALLEE";

/// Stage `data` in a temporary file, then load and run `function`.
///
/// The VM's built-in WASI import object is reinitialized from copies of
/// `args`, `envs`, and `preopens`, with `WasmEdge_DATA_TO_CALLEE=<file>`
/// appended to the environment and the file's directory appended to the
/// preopens under its host path.
/// The temporary file is removed before returning, whether the run
/// succeeded or not.
///
/// # Errors
///
/// Returns [`WasiError::NotEnabled`] if the VM has no WASI registration,
/// [`RuntimeError::Io`] if the file cannot be staged, and otherwise the
/// error of the failing stage of [`Vm::run_wasm`].
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(function = function, data_len = data.len()))]
pub fn run_with_data_and_wasi(
    vm: &mut Vm,
    source: impl Into<WasmSource>,
    function: &str,
    data: &[u8],
    args: &[String],
    envs: &[String],
    preopens: &[String],
    params: &[WasmValue],
) -> Result<Vec<WasmValue>, RuntimeError> {
    if vm.import_object(HostRegistration::Wasi).is_none() {
        return Err(WasiError::NotEnabled.into());
    }

    let mut file = tempfile::Builder::new()
        .prefix("tmp.")
        .suffix(".bin")
        .tempfile()?;
    file.write_all(data)?;
    file.flush()?;

    let result = stage_and_run(vm, source, function, file.path(), args, envs, preopens, params);

    let path = file.path().to_path_buf();
    if let Err(e) = file.close() {
        warn!(path = %path.display(), error = %e, "Failed to remove staged data file");
    } else {
        debug!(path = %path.display(), "Staged data file removed");
    }

    result
}

#[allow(clippy::too_many_arguments)]
fn stage_and_run(
    vm: &mut Vm,
    source: impl Into<WasmSource>,
    function: &str,
    path: &Path,
    args: &[String],
    envs: &[String],
    preopens: &[String],
    params: &[WasmValue],
) -> Result<Vec<WasmValue>, RuntimeError> {
    let dir = path.parent().ok_or_else(|| WasiError::FilesystemError {
        operation: format!("locate directory of {}", path.display()),
    })?;

    let mut envs = envs.to_vec();
    envs.push(format!("{DATA_ENV_KEY}={}", path.display()));

    // Pushed as a mapping, since the host path may itself contain `:`
    let mut environment = WasiEnvironment::new(args, envs.as_slice(), preopens)?;
    environment.push_preopen(Preopen {
        host: dir.to_path_buf(),
        guest: dir.display().to_string(),
    });

    vm.import_object_mut(HostRegistration::Wasi)
        .ok_or(WasiError::NotEnabled)?
        .set_wasi_environment(environment)?;
    debug!(path = %path.display(), "Data staged");

    vm.run_wasm(source, function, params)
}
