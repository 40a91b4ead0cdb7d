//! Host values and the value codec used at call boundaries.
//!
//! [`WasmValue`] is the closed set of values the host exchanges with guest
//! code. [`encode`] and [`decode`] convert between it and the engine's flat
//! [`Val`] representation. Decoding is driven by the kinds declared in a
//! [`FunctionType`], never by inspecting engine-side tags.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use wasmtime::{
    AsContext, AsContextMut, Engine, ExternRef as EngineExternRef, Func, FuncType, Val, ValType,
};

use wasmbind_common::{ValueError, ValueKind};

/// A value passed into or returned from a WebAssembly function.
#[derive(Clone)]
pub enum WasmValue {
    /// 32-bit integer.
    I32(i32),
    /// 64-bit integer.
    I64(i64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// 128-bit vector.
    V128(u128),
    /// Nullable function reference.
    FuncRef(Option<FuncRef>),
    /// Nullable external reference.
    ExternRef(Option<ExternRef>),
}

impl WasmValue {
    /// The kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            WasmValue::I32(_) => ValueKind::I32,
            WasmValue::I64(_) => ValueKind::I64,
            WasmValue::F32(_) => ValueKind::F32,
            WasmValue::F64(_) => ValueKind::F64,
            WasmValue::V128(_) => ValueKind::V128,
            WasmValue::FuncRef(_) => ValueKind::FuncRef,
            WasmValue::ExternRef(_) => ValueKind::ExternRef,
        }
    }

    /// The zero value (or null reference) of a kind.
    pub fn default_for(kind: ValueKind) -> Self {
        match kind {
            ValueKind::I32 => WasmValue::I32(0),
            ValueKind::I64 => WasmValue::I64(0),
            ValueKind::F32 => WasmValue::F32(0.0),
            ValueKind::F64 => WasmValue::F64(0.0),
            ValueKind::V128 => WasmValue::V128(0),
            ValueKind::FuncRef => WasmValue::FuncRef(None),
            ValueKind::ExternRef => WasmValue::ExternRef(None),
        }
    }

    /// Get the value as `i32`.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            WasmValue::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            WasmValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as `f32`.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            WasmValue::F32(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            WasmValue::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the value as a 128-bit vector.
    pub fn as_v128(&self) -> Option<u128> {
        match self {
            WasmValue::V128(v) => Some(*v),
            _ => None,
        }
    }

    /// Get the external reference, if this is a non-null `externref`.
    pub fn as_extern_ref(&self) -> Option<&ExternRef> {
        match self {
            WasmValue::ExternRef(Some(r)) => Some(r),
            _ => None,
        }
    }
}

impl fmt::Debug for WasmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WasmValue::I32(v) => write!(f, "I32({v})"),
            WasmValue::I64(v) => write!(f, "I64({v})"),
            WasmValue::F32(v) => write!(f, "F32({v})"),
            WasmValue::F64(v) => write!(f, "F64({v})"),
            WasmValue::V128(v) => write!(f, "V128({v:#034x})"),
            WasmValue::FuncRef(r) => {
                write!(f, "FuncRef({})", if r.is_some() { "func" } else { "null" })
            }
            WasmValue::ExternRef(r) => {
                write!(f, "ExternRef({})", if r.is_some() { "host" } else { "null" })
            }
        }
    }
}

/// Floats compare by bit pattern and external references by identity.
///
/// Non-null function references never compare equal: the engine gives a
/// function no identity the host can observe.
impl PartialEq for WasmValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (WasmValue::I32(a), WasmValue::I32(b)) => a == b,
            (WasmValue::I64(a), WasmValue::I64(b)) => a == b,
            (WasmValue::F32(a), WasmValue::F32(b)) => a.to_bits() == b.to_bits(),
            (WasmValue::F64(a), WasmValue::F64(b)) => a.to_bits() == b.to_bits(),
            (WasmValue::V128(a), WasmValue::V128(b)) => a == b,
            (WasmValue::FuncRef(None), WasmValue::FuncRef(None))
            | (WasmValue::ExternRef(None), WasmValue::ExternRef(None)) => true,
            (WasmValue::ExternRef(Some(a)), WasmValue::ExternRef(Some(b))) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<i32> for WasmValue {
    fn from(v: i32) -> Self {
        WasmValue::I32(v)
    }
}

impl From<i64> for WasmValue {
    fn from(v: i64) -> Self {
        WasmValue::I64(v)
    }
}

impl From<f32> for WasmValue {
    fn from(v: f32) -> Self {
        WasmValue::F32(v)
    }
}

impl From<f64> for WasmValue {
    fn from(v: f64) -> Self {
        WasmValue::F64(v)
    }
}

/// Opaque reference to a function living in a VM's store.
///
/// Valid until the VM's next cleanup or reload, which replaces the store.
#[derive(Clone, Copy)]
pub struct FuncRef(Func);

impl FuncRef {
    pub(crate) fn from_engine(func: Func) -> Self {
        Self(func)
    }

    pub(crate) fn into_engine(self) -> Func {
        self.0
    }
}

/// Opaque host data passed to guest code as an `externref`.
#[derive(Clone)]
pub struct ExternRef(Arc<dyn Any + Send + Sync>);

impl ExternRef {
    /// Wrap host data.
    pub fn new<T: Any + Send + Sync>(data: T) -> Self {
        Self(Arc::new(data))
    }

    /// Borrow the host data if it has type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Returns `true` if both references point at the same host data.
    pub fn ptr_eq(&self, other: &ExternRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// An immutable function signature.
///
/// Copied out of the engine's signature object, which is not retained.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FunctionType {
    params: Vec<ValueKind>,
    returns: Vec<ValueKind>,
}

impl FunctionType {
    /// Create a signature from parameter and return kinds.
    pub fn new(params: impl Into<Vec<ValueKind>>, returns: impl Into<Vec<ValueKind>>) -> Self {
        Self {
            params: params.into(),
            returns: returns.into(),
        }
    }

    /// Ordered parameter kinds.
    pub fn params(&self) -> &[ValueKind] {
        &self.params
    }

    /// Ordered return kinds.
    pub fn returns(&self) -> &[ValueKind] {
        &self.returns
    }

    /// Copy a signature out of the engine's representation.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::UnsupportedType`] if the signature uses a type
    /// outside [`ValueKind`] (for example GC references).
    pub fn from_engine(ty: &FuncType) -> Result<Self, ValueError> {
        Ok(Self {
            params: ty.params().map(|t| kind_of(&t)).collect::<Result<_, _>>()?,
            returns: ty.results().map(|t| kind_of(&t)).collect::<Result<_, _>>()?,
        })
    }

    /// Build the engine's representation of this signature.
    pub(crate) fn to_engine(&self, engine: &Engine) -> FuncType {
        FuncType::new(
            engine,
            self.params.iter().map(|k| val_type_of(*k)),
            self.returns.iter().map(|k| val_type_of(*k)),
        )
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |kinds: &[ValueKind]| {
            kinds
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "({}) -> ({})", join(&self.params), join(&self.returns))
    }
}

/// Map an engine value type onto a host value kind.
pub(crate) fn kind_of(ty: &ValType) -> Result<ValueKind, ValueError> {
    match ty {
        ValType::I32 => Ok(ValueKind::I32),
        ValType::I64 => Ok(ValueKind::I64),
        ValType::F32 => Ok(ValueKind::F32),
        ValType::F64 => Ok(ValueKind::F64),
        ValType::V128 => Ok(ValueKind::V128),
        t if t.is_funcref() => Ok(ValueKind::FuncRef),
        t if t.is_externref() => Ok(ValueKind::ExternRef),
        other => Err(ValueError::UnsupportedType {
            ty: other.to_string(),
        }),
    }
}

/// Map a host value kind onto the engine value type.
pub(crate) fn val_type_of(kind: ValueKind) -> ValType {
    match kind {
        ValueKind::I32 => ValType::I32,
        ValueKind::I64 => ValType::I64,
        ValueKind::F32 => ValType::F32,
        ValueKind::F64 => ValType::F64,
        ValueKind::V128 => ValType::V128,
        ValueKind::FuncRef => ValType::FUNCREF,
        ValueKind::ExternRef => ValType::EXTERNREF,
    }
}

/// Check values positionally against the kinds a signature declares.
///
/// # Errors
///
/// Returns [`ValueError::ArityMismatch`] or [`ValueError::TypeMismatch`].
pub fn check_kinds(values: &[WasmValue], expected: &[ValueKind]) -> Result<(), ValueError> {
    if values.len() != expected.len() {
        return Err(ValueError::ArityMismatch {
            expected: expected.len(),
            actual: values.len(),
        });
    }
    for (index, (value, kind)) in values.iter().zip(expected).enumerate() {
        if value.kind() != *kind {
            return Err(ValueError::TypeMismatch {
                index,
                expected: *kind,
                actual: value.kind(),
            });
        }
    }
    Ok(())
}

/// Encode host values into the engine's representation.
///
/// An empty input yields an empty, unallocated vector.
///
/// # Errors
///
/// Returns an error if an external reference cannot be allocated in the
/// store.
pub fn encode(
    mut store: impl AsContextMut,
    values: &[WasmValue],
) -> Result<Vec<Val>, ValueError> {
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let mut encoded = Vec::with_capacity(values.len());
    for value in values {
        encoded.push(encode_one(&mut store, value)?);
    }
    Ok(encoded)
}

fn encode_one(mut store: impl AsContextMut, value: &WasmValue) -> Result<Val, ValueError> {
    Ok(match value {
        WasmValue::I32(v) => Val::I32(*v),
        WasmValue::I64(v) => Val::I64(*v),
        WasmValue::F32(v) => Val::F32(v.to_bits()),
        WasmValue::F64(v) => Val::F64(v.to_bits()),
        WasmValue::V128(v) => Val::V128((*v).into()),
        WasmValue::FuncRef(r) => Val::FuncRef(r.map(FuncRef::into_engine)),
        WasmValue::ExternRef(None) => Val::ExternRef(None),
        WasmValue::ExternRef(Some(r)) => {
            let rooted = EngineExternRef::new(store.as_context_mut(), r.clone()).map_err(|e| {
                ValueError::UnsupportedType {
                    ty: format!("externref ({e})"),
                }
            })?;
            Val::ExternRef(Some(rooted))
        }
    })
}

/// Decode engine values using the kinds declared by a signature.
///
/// # Errors
///
/// Returns [`ValueError::ArityMismatch`] if the counts differ,
/// [`ValueError::TypeMismatch`] if a value cannot be represented as its
/// declared kind, and [`ValueError::ForeignReference`] for external
/// references not created by the host.
pub fn decode(
    store: impl AsContext,
    values: &[Val],
    expected: &[ValueKind],
) -> Result<Vec<WasmValue>, ValueError> {
    if values.len() != expected.len() {
        return Err(ValueError::ArityMismatch {
            expected: expected.len(),
            actual: values.len(),
        });
    }
    if values.is_empty() {
        return Ok(Vec::new());
    }

    let mut decoded = Vec::with_capacity(values.len());
    for (index, (value, kind)) in values.iter().zip(expected).enumerate() {
        let host = match (kind, value) {
            (ValueKind::I32, Val::I32(v)) => WasmValue::I32(*v),
            (ValueKind::I64, Val::I64(v)) => WasmValue::I64(*v),
            (ValueKind::F32, Val::F32(bits)) => WasmValue::F32(f32::from_bits(*bits)),
            (ValueKind::F64, Val::F64(bits)) => WasmValue::F64(f64::from_bits(*bits)),
            (ValueKind::V128, Val::V128(v)) => WasmValue::V128(v.as_u128()),
            (ValueKind::FuncRef, Val::FuncRef(f)) => {
                WasmValue::FuncRef(f.map(FuncRef::from_engine))
            }
            (ValueKind::ExternRef, Val::ExternRef(None)) => WasmValue::ExternRef(None),
            (ValueKind::ExternRef, Val::ExternRef(Some(rooted))) => {
                let host = rooted
                    .data(store.as_context())
                    .map_err(|_| ValueError::ForeignReference)?
                    .ok_or(ValueError::ForeignReference)?
                    .downcast_ref::<ExternRef>()
                    .ok_or(ValueError::ForeignReference)?;
                WasmValue::ExternRef(Some(host.clone()))
            }
            (kind, other) => {
                return Err(ValueError::TypeMismatch {
                    index,
                    expected: *kind,
                    actual: engine_kind(other).unwrap_or(*kind),
                });
            }
        };
        decoded.push(host);
    }
    Ok(decoded)
}

/// Best-effort kind of an engine value, for diagnostics.
fn engine_kind(value: &Val) -> Option<ValueKind> {
    match value {
        Val::I32(_) => Some(ValueKind::I32),
        Val::I64(_) => Some(ValueKind::I64),
        Val::F32(_) => Some(ValueKind::F32),
        Val::F64(_) => Some(ValueKind::F64),
        Val::V128(_) => Some(ValueKind::V128),
        Val::FuncRef(_) => Some(ValueKind::FuncRef),
        Val::ExternRef(_) => Some(ValueKind::ExternRef),
        _ => None,
    }
}
