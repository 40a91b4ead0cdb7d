//! Host modules for wasmbind.
//!
//! This crate provides ready-made host functionality built on the core
//! embedding layer:
//!
//! - [`logging`]: The `env::log` import object for structured guest logging
//! - [`staging`]: Passing host data to WASI guests through a temporary file

pub mod logging;
pub mod staging;

pub use logging::{LoggingHost, logging_import_object};
pub use staging::{DATA_ENV_KEY, run_with_data_and_wasi};
