//! Module validation.

use std::time::Instant;

use tracing::{debug, instrument};

use wasmbind_common::RuntimeError;

use crate::{ModuleHandle, WasmEngine};

/// Checks modules against the engine's structural and type rules.
///
/// Validation never mutates the module or any VM; it only reports whether
/// the engine would accept the module.
#[derive(Debug, Clone)]
pub struct Validator {
    engine: WasmEngine,
}

impl Validator {
    /// Create a validator for modules targeting `engine`.
    pub fn new(engine: &WasmEngine) -> Self {
        Self {
            engine: engine.clone(),
        }
    }

    /// Validate a module.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Validation`] carrying the engine diagnostic.
    #[instrument(skip(self, module), fields(content_hash = %module.content_hash()))]
    pub fn validate(&self, module: &ModuleHandle) -> Result<(), RuntimeError> {
        let start = Instant::now();
        wasmtime::Module::validate(self.engine.inner(), module.bytes())
            .map_err(|e| RuntimeError::validation(format!("{e:#}")))?;
        debug!(duration_us = start.elapsed().as_micros(), "Module validated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmbind_common::VmConfig;

    fn validator() -> Validator {
        Validator::new(&WasmEngine::new(&VmConfig::default()).unwrap())
    }

    #[test]
    fn test_valid_module() {
        let module = ModuleHandle::from_wat(
            r#"(module (func (export "add") (param i32 i32) (result i32)
                local.get 0 local.get 1 i32.add))"#,
        )
        .unwrap();

        assert!(validator().validate(&module).is_ok());
    }

    #[test]
    fn test_type_error_rejected() {
        // Returns an i64 from a function declared to return i32
        let module = ModuleHandle::from_wat(
            r#"(module (func (export "bad") (result i32) i64.const 1))"#,
        )
        .unwrap();

        let err = validator().validate(&module).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_validation_does_not_consume_module() {
        let module = ModuleHandle::from_wat("(module)").unwrap();
        let validator = validator();

        validator.validate(&module).unwrap();
        validator.validate(&module).unwrap();
        assert!(!module.bytes().is_empty());
    }
}
