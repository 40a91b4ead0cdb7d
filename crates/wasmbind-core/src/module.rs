//! Loaded WebAssembly modules.
//!
//! This module provides [`ModuleHandle`], an immutable, cheaply clonable
//! reference to module bytes that passed header and section-structure
//! parsing. A handle is not validated; run it through a
//! [`Validator`](crate::Validator) or let the VM validate it before
//! instantiation.
//!
//! Passing a handle to [`Vm::load_wasm_module`](crate::Vm::load_wasm_module)
//! or [`Vm::register_module`](crate::Vm::register_module) only reads it; the
//! caller keeps its handle.

use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument};
use wasmparser::{ExternalKind, Parser, Payload, TypeRef};

use wasmbind_common::RuntimeError;

/// A parsed, unvalidated WebAssembly module.
#[derive(Clone)]
pub struct ModuleHandle {
    /// The original module bytes.
    bytes: Arc<[u8]>,

    /// Hash of the original Wasm bytes.
    content_hash: String,

    /// When this module was loaded.
    loaded_at: Instant,
}

/// Kind of an imported or exported symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternKind {
    /// A function.
    Function,
    /// A table.
    Table,
    /// A linear memory.
    Memory,
    /// A global.
    Global,
    /// An exception tag.
    Tag,
}

impl fmt::Display for ExternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExternKind::Function => "func",
            ExternKind::Table => "table",
            ExternKind::Memory => "memory",
            ExternKind::Global => "global",
            ExternKind::Tag => "tag",
        };
        f.write_str(name)
    }
}

/// An import declared by a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDescriptor {
    /// Module namespace the import resolves against.
    pub module: String,
    /// Symbol name within that namespace.
    pub name: String,
    /// Kind of the imported symbol.
    pub kind: ExternKind,
}

/// An export declared by a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDescriptor {
    /// Exported name.
    pub name: String,
    /// Kind of the exported symbol.
    pub kind: ExternKind,
}

impl ModuleHandle {
    /// Load a module from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Load`] if the header is wrong or the section
    /// structure is truncated or malformed.
    #[instrument(skip(bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        Self::validate_wasm_header(bytes)?;
        Self::parse_sections(bytes)?;

        let content_hash = compute_hash(bytes);
        debug!(
            content_hash = %content_hash,
            duration_us = start.elapsed().as_micros(),
            "Module loaded"
        );

        Ok(Self {
            bytes: Arc::from(bytes),
            content_hash,
            loaded_at: Instant::now(),
        })
    }

    /// Load a module from a `.wasm` file.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Load`] if the file cannot be read or does not
    /// contain a well-formed module.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            RuntimeError::load(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_bytes(&bytes)
    }

    /// Load a module from WAT (WebAssembly Text Format).
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Load`] if the text does not parse.
    pub fn from_wat(wat: &str) -> Result<Self, RuntimeError> {
        let bytes = wat::parse_str(wat)
            .map_err(|e| RuntimeError::load(format!("WAT parsing failed: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// The module bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Get the content hash of the original Wasm bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get when this module was loaded.
    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }

    /// List the module's imports in declaration order.
    pub fn imports(&self) -> Vec<ImportDescriptor> {
        let mut imports = Vec::new();
        for payload in Parser::new(0).parse_all(&self.bytes).flatten() {
            if let Payload::ImportSection(reader) = payload {
                for import in reader.into_iter().flatten() {
                    imports.push(ImportDescriptor {
                        module: import.module.to_string(),
                        name: import.name.to_string(),
                        kind: match import.ty {
                            TypeRef::Func(_) => ExternKind::Function,
                            TypeRef::Table(_) => ExternKind::Table,
                            TypeRef::Memory(_) => ExternKind::Memory,
                            TypeRef::Global(_) => ExternKind::Global,
                            TypeRef::Tag(_) => ExternKind::Tag,
                        },
                    });
                }
            }
        }
        imports
    }

    /// List the module's exports in declaration order.
    pub fn exports(&self) -> Vec<ExportDescriptor> {
        let mut exports = Vec::new();
        for payload in Parser::new(0).parse_all(&self.bytes).flatten() {
            if let Payload::ExportSection(reader) = payload {
                for export in reader.into_iter().flatten() {
                    exports.push(ExportDescriptor {
                        name: export.name.to_string(),
                        kind: match export.kind {
                            ExternalKind::Func => ExternKind::Function,
                            ExternalKind::Table => ExternKind::Table,
                            ExternalKind::Memory => ExternKind::Memory,
                            ExternalKind::Global => ExternKind::Global,
                            ExternalKind::Tag => ExternKind::Tag,
                        },
                    });
                }
            }
        }
        exports
    }

    /// Validate WebAssembly header (magic number and version).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), RuntimeError> {
        if bytes.len() < 8 {
            return Err(RuntimeError::load("Invalid Wasm: file too small"));
        }

        // Check magic number: \0asm
        if &bytes[0..4] != b"\0asm" {
            return Err(RuntimeError::load("Invalid Wasm: bad magic number"));
        }

        if bytes[4..8] != [0x01, 0x00, 0x00, 0x00] {
            return Err(RuntimeError::load("Invalid Wasm: unsupported version"));
        }

        Ok(())
    }

    /// Walk the section structure without validating section contents.
    fn parse_sections(bytes: &[u8]) -> Result<(), RuntimeError> {
        for payload in Parser::new(0).parse_all(bytes) {
            payload.map_err(|e| RuntimeError::load(format!("Malformed module: {e}")))?;
        }
        Ok(())
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("content_hash", &self.content_hash)
            .field("bytes_len", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal valid Wasm module (empty module)
    const MINIMAL_WASM: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, // magic: \0asm
        0x01, 0x00, 0x00, 0x00, // version: 1
    ];

    #[test]
    fn test_validate_wasm_header_valid() {
        assert!(ModuleHandle::validate_wasm_header(MINIMAL_WASM).is_ok());
    }

    #[test]
    fn test_validate_wasm_header_too_small() {
        let result = ModuleHandle::validate_wasm_header(&[0x00, 0x61]);
        assert!(result.unwrap_err().is_load());
    }

    #[test]
    fn test_validate_wasm_header_bad_magic() {
        let bad_wasm = &[0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        let result = ModuleHandle::validate_wasm_header(bad_wasm);
        assert!(result.is_err());
    }

    #[test]
    fn test_truncated_section_is_load_error() {
        // Type section claiming 16 bytes but providing one
        let truncated = &[
            0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, 0x01, 0x10, 0x01,
        ];
        let result = ModuleHandle::from_bytes(truncated);
        assert!(matches!(result, Err(RuntimeError::Load { .. })));
    }

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash(b"hello");
        let hash2 = compute_hash(b"hello");
        let hash3 = compute_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 16); // 64-bit hex
    }

    #[test]
    fn test_module_from_bytes() {
        let module = ModuleHandle::from_bytes(MINIMAL_WASM).unwrap();

        assert_eq!(module.bytes(), MINIMAL_WASM);
        assert!(!module.content_hash().is_empty());
        assert!(module.imports().is_empty());
        assert!(module.exports().is_empty());
    }

    #[test]
    fn test_module_from_missing_file() {
        let result = ModuleHandle::from_file("/nonexistent/module.wasm");
        assert!(matches!(result, Err(RuntimeError::Load { .. })));
    }

    #[test]
    fn test_imports_and_exports() {
        let module = ModuleHandle::from_wat(
            r#"
            (module
                (import "env" "double" (func (param i32) (result i32)))
                (import "env" "mem" (memory 1))
                (global (export "g") i32 (i32.const 7))
                (func (export "quad") (param i32) (result i32) local.get 0)
            )
            "#,
        )
        .unwrap();

        assert_eq!(
            module.imports(),
            vec![
                ImportDescriptor {
                    module: "env".into(),
                    name: "double".into(),
                    kind: ExternKind::Function,
                },
                ImportDescriptor {
                    module: "env".into(),
                    name: "mem".into(),
                    kind: ExternKind::Memory,
                },
            ]
        );
        assert_eq!(
            module.exports(),
            vec![
                ExportDescriptor {
                    name: "g".into(),
                    kind: ExternKind::Global,
                },
                ExportDescriptor {
                    name: "quad".into(),
                    kind: ExternKind::Function,
                },
            ]
        );
    }

    #[test]
    fn test_clone_shares_bytes() {
        let module = ModuleHandle::from_bytes(MINIMAL_WASM).unwrap();
        let clone = module.clone();

        assert_eq!(module.content_hash(), clone.content_hash());
        assert!(std::ptr::eq(module.bytes(), clone.bytes()));
    }

    #[test]
    fn test_module_debug() {
        let module = ModuleHandle::from_bytes(MINIMAL_WASM).unwrap();

        let debug_str = format!("{module:?}");
        assert!(debug_str.contains("ModuleHandle"));
        assert!(debug_str.contains("content_hash"));
    }
}
