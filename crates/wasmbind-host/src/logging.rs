//! Guest logging host module.
//!
//! This module provides an `env` import object exposing
//! `log(level: i32, ptr: i32, len: i32)`, allowing guest modules to emit
//! structured logs that are captured by the VM.

use tracing::{debug, error, info, warn};

use wasmbind_common::{HostFunctionError, LinkError, ValueKind};
use wasmbind_core::{
    CallingFrame, FunctionType, HostFunction, ImportObject, LogLevel, VmContext, WasmValue,
};

/// Module name the logging functions are imported from.
pub const LOGGING_MODULE: &str = "env";

/// Host implementation for guest logging.
///
/// Logs are both:
/// 1. Stored in the [`VmContext`] for later retrieval
/// 2. Emitted via the `tracing` crate for observability
pub struct LoggingHost;

impl LoggingHost {
    /// Log a message at the specified level.
    pub fn log(ctx: &mut VmContext, level: LogLevel, message: &str) {
        ctx.log(level, message.to_string());

        match level {
            LogLevel::Debug => debug!(guest_log = true, "{}", message),
            LogLevel::Info => info!(guest_log = true, "{}", message),
            LogLevel::Warn => warn!(guest_log = true, "{}", message),
            LogLevel::Error => error!(guest_log = true, "{}", message),
        }
    }
}

/// Build the `env` import object with the `log` function.
///
/// # Memory Protocol
///
/// The guest passes:
/// - `level`: Log level (0=debug, 1=info, 2=warn, 3=error)
/// - `ptr`: Pointer to the message string in the guest's exported `memory`
/// - `len`: Length of the message in bytes (UTF-8)
///
/// Invalid pointers are logged on the host and otherwise ignored.
///
/// # Errors
///
/// Returns an error if the function cannot be added.
pub fn logging_import_object() -> Result<ImportObject, LinkError> {
    let mut imports = ImportObject::new(LOGGING_MODULE)?;
    imports.add_function(
        "log",
        HostFunction::new(
            FunctionType::new(
                [ValueKind::I32, ValueKind::I32, ValueKind::I32],
                Vec::new(),
            ),
            guest_log,
        ),
    )?;
    Ok(imports)
}

fn guest_log(
    frame: &mut CallingFrame<'_>,
    args: &[WasmValue],
) -> Result<Vec<WasmValue>, HostFunctionError> {
    let [level, ptr, len] = [0, 1, 2].map(|i| args.get(i).and_then(WasmValue::as_i32));
    let (Some(level), Some(ptr), Some(len)) = (level, ptr, len) else {
        warn!("Malformed log call");
        return Ok(Vec::new());
    };

    // Validate pointer and length are non-negative
    let (Ok(offset), Ok(length)) = (u32::try_from(ptr), u32::try_from(len)) else {
        warn!(
            ptr = ptr,
            len = len,
            "Invalid pointer or length (negative value)"
        );
        return Ok(Vec::new());
    };

    let bytes = match frame.read_memory(offset, length) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(ptr = ptr, len = len, error = %e, "Memory access out of bounds");
            return Ok(Vec::new());
        }
    };
    let message = String::from_utf8(bytes).unwrap_or_else(|_| "<invalid utf8>".to_string());

    LoggingHost::log(frame.vm_context_mut(), level_from_i32(level), &message);
    Ok(Vec::new())
}

/// Convert a numeric log level to [`LogLevel`].
///
/// # Returns
///
/// The corresponding [`LogLevel`] (0=debug, 1=info, 2=warn, 3=error),
/// defaulting to Info for unknown values.
pub fn level_from_i32(level: i32) -> LogLevel {
    match level {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info, // 1 and unknown values default to Info
    }
}

/// Convert a [`LogLevel`] to a numeric value.
pub fn level_to_i32(level: LogLevel) -> i32 {
    match level {
        LogLevel::Debug => 0,
        LogLevel::Info => 1,
        LogLevel::Warn => 2,
        LogLevel::Error => 3,
    }
}
