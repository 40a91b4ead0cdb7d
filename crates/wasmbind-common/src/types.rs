//! Value kinds shared by signatures, the value codec, and error reporting.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of a WebAssembly value as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// 128-bit vector.
    V128,
    /// Nullable function reference.
    FuncRef,
    /// Nullable external (host) reference.
    ExternRef,
}

impl ValueKind {
    /// Returns `true` for `funcref` and `externref`.
    pub fn is_reference(self) -> bool {
        matches!(self, ValueKind::FuncRef | ValueKind::ExternRef)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::I32 => "i32",
            ValueKind::I64 => "i64",
            ValueKind::F32 => "f32",
            ValueKind::F64 => "f64",
            ValueKind::V128 => "v128",
            ValueKind::FuncRef => "funcref",
            ValueKind::ExternRef => "externref",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ValueKind::I32.to_string(), "i32");
        assert_eq!(ValueKind::ExternRef.to_string(), "externref");
    }

    #[test]
    fn test_is_reference() {
        assert!(ValueKind::FuncRef.is_reference());
        assert!(ValueKind::ExternRef.is_reference());
        assert!(!ValueKind::V128.is_reference());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ValueKind::FuncRef).unwrap();
        assert_eq!(json, "\"funcref\"");
    }
}
