//! Import objects and host-provided symbols.
//!
//! An [`ImportObject`] is a named bundle of host functions, tables, memories,
//! and globals that guest modules import by `(module, name)`. Sub-resources
//! are built without a store and moved into the import object by value, so a
//! wrapper cannot be used again once it has been added.
//!
//! Host functions are registered in the process-wide
//! [registry](crate::registry) when added. The engine only ever sees the
//! numeric id; deleting (or dropping) the import object revokes every id it
//! registered, after which calls through a VM that linked it fail with
//! [`RegistryError::UnknownHostFunction`](wasmbind_common::RegistryError).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};
use wasmtime::{
    Caller, Extern, Global, GlobalType, Linker, Memory, MemoryType, Ref, RefType, RootScope, Store,
    Table, TableType, Val,
};
use wasmtime_wasi::preview1;

use wasmbind_common::{HostFunctionError, LinkError, RuntimeError, ValueKind, WasiError};

use crate::registry::{self, FunctionId, HostFn, SharedContext};
use crate::store::VmContext;
use crate::value::{self, FunctionType, WasmValue};
use crate::wasi::{WASI_MODULE_NAME, WasiEnvironment};

/// Access to the calling instance from inside a host function.
pub struct CallingFrame<'c> {
    pub(crate) caller: Caller<'c, VmContext>,
    context: Option<SharedContext>,
}

impl CallingFrame<'_> {
    /// Shared context of the import object the function belongs to.
    pub fn shared_context(&self) -> Option<&SharedContext> {
        self.context.as_ref()
    }

    /// Shared context downcast to `T`.
    pub fn shared<T: Any>(&self) -> Option<&T> {
        self.context.as_ref().and_then(|c| c.downcast_ref::<T>())
    }

    /// The VM's store state.
    pub fn vm_context(&self) -> &VmContext {
        self.caller.data()
    }

    /// The VM's store state, mutably.
    pub fn vm_context_mut(&mut self) -> &mut VmContext {
        self.caller.data_mut()
    }

    /// Read `len` bytes at `offset` from the caller's exported `memory`.
    ///
    /// # Errors
    ///
    /// Returns [`HostFunctionError::MemoryAccess`] if the caller exports no
    /// memory or the range is out of bounds.
    pub fn read_memory(&mut self, offset: u32, len: u32) -> Result<Vec<u8>, HostFunctionError> {
        let memory = self.memory()?;
        let mut buf = vec![0; len as usize];
        memory
            .read(&self.caller, offset as usize, &mut buf)
            .map_err(|e| HostFunctionError::MemoryAccess {
                reason: format!("read {len} bytes at {offset}: {e}"),
            })?;
        Ok(buf)
    }

    /// Write `data` at `offset` into the caller's exported `memory`.
    ///
    /// # Errors
    ///
    /// Returns [`HostFunctionError::MemoryAccess`] if the caller exports no
    /// memory or the range is out of bounds.
    pub fn write_memory(&mut self, offset: u32, data: &[u8]) -> Result<(), HostFunctionError> {
        let memory = self.memory()?;
        memory
            .write(&mut self.caller, offset as usize, data)
            .map_err(|e| HostFunctionError::MemoryAccess {
                reason: format!("write {} bytes at {offset}: {e}", data.len()),
            })
    }

    fn memory(&mut self) -> Result<Memory, HostFunctionError> {
        self.caller
            .get_export("memory")
            .and_then(Extern::into_memory)
            .ok_or_else(|| HostFunctionError::MemoryAccess {
                reason: "caller exports no memory".into(),
            })
    }
}

/// A host-implemented function, not yet owned by an import object.
pub struct HostFunction {
    ty: FunctionType,
    body: Arc<HostFn>,
}

impl HostFunction {
    /// Create a host function with the given signature.
    ///
    /// The body receives arguments already checked against `ty` and must
    /// return values matching its return kinds.
    pub fn new<F>(ty: FunctionType, body: F) -> Self
    where
        F: for<'c> Fn(&mut CallingFrame<'c>, &[WasmValue]) -> Result<Vec<WasmValue>, HostFunctionError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            ty,
            body: Arc::new(body),
        }
    }

    /// The function's signature.
    pub fn ty(&self) -> &FunctionType {
        &self.ty
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("ty", &self.ty)
            .finish_non_exhaustive()
    }
}

/// A host table definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTable {
    element: ValueKind,
    minimum: u32,
    maximum: Option<u32>,
}

impl HostTable {
    /// Define a table of `funcref` or `externref` elements, initialized to null.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InvalidDefinition`] for a non-reference element
    /// kind or a maximum below the minimum.
    pub fn new(element: ValueKind, minimum: u32, maximum: Option<u32>) -> Result<Self, LinkError> {
        if !element.is_reference() {
            return Err(LinkError::InvalidDefinition {
                reason: format!("table elements must be references, got {element}"),
            });
        }
        check_limits(minimum, maximum)?;
        Ok(Self {
            element,
            minimum,
            maximum,
        })
    }

    /// Element kind.
    pub fn element(&self) -> ValueKind {
        self.element
    }

    fn materialize(&self, store: &mut Store<VmContext>) -> anyhow::Result<Table> {
        let (ty, init) = match self.element {
            ValueKind::FuncRef => (RefType::FUNCREF, Ref::Func(None)),
            _ => (RefType::EXTERNREF, Ref::Extern(None)),
        };
        Table::new(store, TableType::new(ty, self.minimum, self.maximum), init)
    }
}

/// A host linear memory definition, limits in 64 KiB pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMemory {
    minimum: u32,
    maximum: Option<u32>,
}

impl HostMemory {
    /// Largest page count a 32-bit memory can have.
    pub const MAX_PAGES: u32 = 65_536;

    /// Define a memory.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InvalidDefinition`] if the limits are inverted or
    /// exceed [`HostMemory::MAX_PAGES`].
    pub fn new(minimum: u32, maximum: Option<u32>) -> Result<Self, LinkError> {
        check_limits(minimum, maximum)?;
        if maximum.unwrap_or(minimum) > Self::MAX_PAGES {
            return Err(LinkError::InvalidDefinition {
                reason: format!("memory exceeds {} pages", Self::MAX_PAGES),
            });
        }
        Ok(Self { minimum, maximum })
    }

    fn materialize(&self, store: &mut Store<VmContext>) -> anyhow::Result<Memory> {
        Memory::new(store, MemoryType::new(self.minimum, self.maximum))
    }
}

/// Whether a global can be written by guest code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    /// Immutable.
    Const,
    /// Mutable.
    Var,
}

/// A host global definition.
#[derive(Debug, Clone, PartialEq)]
pub struct HostGlobal {
    value: WasmValue,
    mutability: Mutability,
}

impl HostGlobal {
    /// Define a global with an initial value.
    pub fn new(value: WasmValue, mutability: Mutability) -> Self {
        Self { value, mutability }
    }

    /// The initial value.
    pub fn value(&self) -> &WasmValue {
        &self.value
    }

    fn materialize(&self, store: &mut Store<VmContext>) -> anyhow::Result<Global> {
        let mutability = match self.mutability {
            Mutability::Const => wasmtime::Mutability::Const,
            Mutability::Var => wasmtime::Mutability::Var,
        };
        let ty = GlobalType::new(value::val_type_of(self.value.kind()), mutability);
        let mut scope = RootScope::new(store);
        let init = value::encode(&mut scope, std::slice::from_ref(&self.value))?
            .pop()
            .unwrap_or(Val::I32(0));
        Global::new(&mut scope, ty, init)
    }
}

fn check_limits(minimum: u32, maximum: Option<u32>) -> Result<(), LinkError> {
    match maximum {
        Some(max) if max < minimum => Err(LinkError::InvalidDefinition {
            reason: format!("maximum {max} is below minimum {minimum}"),
        }),
        _ => Ok(()),
    }
}

#[derive(Clone)]
enum Symbol {
    Function { id: FunctionId, ty: FunctionType },
    Table(HostTable),
    Memory(HostMemory),
    Global(HostGlobal),
}

/// WASI environment shared between an import object and the VMs linking it.
pub(crate) type SharedWasi = Arc<Mutex<WasiEnvironment>>;

/// A named collection of importable host symbols.
pub struct ImportObject {
    module: String,
    /// `None` once the object has been deleted.
    symbols: Option<Vec<(String, Symbol)>>,
    context: Option<SharedContext>,
    wasi: Option<SharedWasi>,
}

impl ImportObject {
    /// Create an empty import object for `module`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::EmptyModuleName`] if `module` is empty.
    pub fn new(module: impl Into<String>) -> Result<Self, LinkError> {
        Self::build(module.into(), None)
    }

    /// Create an import object whose host functions share `context`.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::EmptyModuleName`] if `module` is empty.
    pub fn with_context<T: Any + Send + Sync>(
        module: impl Into<String>,
        context: T,
    ) -> Result<Self, LinkError> {
        Self::build(module.into(), Some(Arc::new(context)))
    }

    fn build(module: String, context: Option<SharedContext>) -> Result<Self, LinkError> {
        if module.is_empty() {
            return Err(LinkError::EmptyModuleName);
        }
        debug!(module = %module, "Import object created");
        Ok(Self {
            module,
            symbols: Some(Vec::new()),
            context,
            wasi: None,
        })
    }

    /// Create the WASI preview1 import object.
    ///
    /// `preopens` entries are `hostPath:guestPath`, or `path` for the
    /// identity mapping.
    ///
    /// # Errors
    ///
    /// Returns [`WasiError::EnvironmentError`] for malformed environment or
    /// preopen strings.
    pub fn new_wasi(
        args: &[impl AsRef<str>],
        envs: &[impl AsRef<str>],
        preopens: &[impl AsRef<str>],
    ) -> Result<Self, WasiError> {
        let environment = WasiEnvironment::new(args, envs, preopens)?;
        debug!(module = WASI_MODULE_NAME, "WASI import object created");
        Ok(Self {
            module: WASI_MODULE_NAME.to_string(),
            symbols: Some(Vec::new()),
            context: None,
            wasi: Some(Arc::new(Mutex::new(environment))),
        })
    }

    /// Replace the WASI environment of a WASI import object.
    ///
    /// Every VM that linked this object sees the new environment from its
    /// next instantiation on.
    ///
    /// # Errors
    ///
    /// Returns [`WasiError::EnvironmentError`] if this is not a WASI import
    /// object or the new environment is malformed.
    pub fn reinitialize_wasi(
        &mut self,
        args: &[impl AsRef<str>],
        envs: &[impl AsRef<str>],
        preopens: &[impl AsRef<str>],
    ) -> Result<(), WasiError> {
        let environment = WasiEnvironment::new(args, envs, preopens)?;
        self.set_wasi_environment(environment)
    }

    /// Replace the WASI environment with one built by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`WasiError::EnvironmentError`] if this is not a WASI import
    /// object.
    pub fn set_wasi_environment(&mut self, environment: WasiEnvironment) -> Result<(), WasiError> {
        let Some(shared) = &self.wasi else {
            return Err(WasiError::EnvironmentError {
                reason: format!("'{}' is not a WASI import object", self.module),
            });
        };
        *shared.lock() = environment;
        debug!(module = %self.module, "WASI environment reinitialized");
        Ok(())
    }

    /// Module name guests import from.
    pub fn name(&self) -> &str {
        &self.module
    }

    /// Returns `true` for WASI import objects.
    pub fn is_wasi(&self) -> bool {
        self.wasi.is_some()
    }

    /// A copy of the current WASI environment, for WASI import objects.
    pub fn wasi_environment(&self) -> Option<WasiEnvironment> {
        self.wasi.as_ref().map(|shared| shared.lock().clone())
    }

    /// Returns `true` once [`delete`](Self::delete) has run.
    pub fn is_deleted(&self) -> bool {
        self.symbols.is_none()
    }

    /// Shared context handed to every host function of this object.
    pub fn shared_context(&self) -> Option<&SharedContext> {
        self.context.as_ref()
    }

    /// Names of the symbols added so far, in insertion order.
    pub fn symbol_names(&self) -> Vec<&str> {
        self.symbols
            .iter()
            .flatten()
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Host function names and signatures, in insertion order.
    pub fn functions(&self) -> Vec<(String, FunctionType)> {
        self.symbols
            .iter()
            .flatten()
            .filter_map(|(name, symbol)| match symbol {
                Symbol::Function { ty, .. } => Some((name.clone(), ty.clone())),
                _ => None,
            })
            .collect()
    }

    /// Registry ids of the host functions this object owns.
    pub fn function_ids(&self) -> Vec<FunctionId> {
        self.symbols
            .iter()
            .flatten()
            .filter_map(|(_, symbol)| match symbol {
                Symbol::Function { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Add a host function, registering it with the host function registry.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::DuplicateImportName`] if `name` is taken, and
    /// [`LinkError::ImportObjectDeleted`] after deletion.
    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        function: HostFunction,
    ) -> Result<(), LinkError> {
        let name = name.into();
        self.check_insert(&name)?;
        let id = registry::register(function.body, self.context.clone());
        trace!(module = %self.module, name = %name, id = id.get(), "Host function added");
        self.push(
            name,
            Symbol::Function {
                id,
                ty: function.ty,
            },
        );
        Ok(())
    }

    /// Add a table.
    ///
    /// # Errors
    ///
    /// Same as [`add_function`](Self::add_function).
    pub fn add_table(&mut self, name: impl Into<String>, table: HostTable) -> Result<(), LinkError> {
        let name = name.into();
        self.check_insert(&name)?;
        self.push(name, Symbol::Table(table));
        Ok(())
    }

    /// Add a memory.
    ///
    /// # Errors
    ///
    /// Same as [`add_function`](Self::add_function).
    pub fn add_memory(
        &mut self,
        name: impl Into<String>,
        memory: HostMemory,
    ) -> Result<(), LinkError> {
        let name = name.into();
        self.check_insert(&name)?;
        self.push(name, Symbol::Memory(memory));
        Ok(())
    }

    /// Add a global.
    ///
    /// # Errors
    ///
    /// Same as [`add_function`](Self::add_function).
    pub fn add_global(
        &mut self,
        name: impl Into<String>,
        global: HostGlobal,
    ) -> Result<(), LinkError> {
        let name = name.into();
        self.check_insert(&name)?;
        self.push(name, Symbol::Global(global));
        Ok(())
    }

    /// Revoke every host function id this object registered and drop its
    /// symbols.
    ///
    /// Idempotent: later calls, including the one from `Drop`, do nothing.
    pub fn delete(&mut self) {
        let Some(symbols) = self.symbols.take() else {
            return;
        };
        let mut revoked = 0usize;
        for (_, symbol) in symbols {
            if let Symbol::Function { id, .. } = symbol {
                if registry::revoke(id) {
                    revoked += 1;
                }
            }
        }
        debug!(module = %self.module, revoked, "Import object deleted");
    }

    fn check_insert(&self, name: &str) -> Result<(), LinkError> {
        let Some(symbols) = &self.symbols else {
            return Err(LinkError::ImportObjectDeleted {
                module: self.module.clone(),
            });
        };
        if self.wasi.is_some() {
            return Err(LinkError::InvalidDefinition {
                reason: "WASI import objects do not accept host symbols".into(),
            });
        }
        if symbols.iter().any(|(existing, _)| existing == name) {
            return Err(LinkError::DuplicateImportName {
                module: self.module.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn push(&mut self, name: String, symbol: Symbol) {
        if let Some(symbols) = self.symbols.as_mut() {
            symbols.push((name, symbol));
        }
    }

    /// Capture what a VM needs to define this object's symbols, now and
    /// whenever it rebuilds its store.
    pub(crate) fn snapshot(&self) -> Result<LinkedImports, LinkError> {
        let Some(symbols) = &self.symbols else {
            return Err(LinkError::ImportObjectDeleted {
                module: self.module.clone(),
            });
        };
        Ok(LinkedImports {
            module: self.module.clone(),
            symbols: symbols.clone(),
            wasi: self.wasi.clone(),
        })
    }
}

/// The linkable contents of an [`ImportObject`], held by a VM.
///
/// Host functions are referenced by registry id only, so deleting the import
/// object still revokes them for every VM holding a snapshot.
#[derive(Clone)]
pub(crate) struct LinkedImports {
    module: String,
    symbols: Vec<(String, Symbol)>,
    wasi: Option<SharedWasi>,
}

impl LinkedImports {
    /// The shared WASI environment, for WASI import objects.
    pub(crate) fn wasi(&self) -> Option<&SharedWasi> {
        self.wasi.as_ref()
    }

    /// Host function names and signatures, in insertion order.
    pub(crate) fn functions(&self) -> Vec<(String, FunctionType)> {
        self.symbols
            .iter()
            .filter_map(|(name, symbol)| match symbol {
                Symbol::Function { ty, .. } => Some((name.clone(), ty.clone())),
                _ => None,
            })
            .collect()
    }

    /// Define every symbol in a VM's linker.
    ///
    /// Tables, memories, and globals are created in `store`; host functions
    /// are installed as trampolines that resolve their id on each call.
    pub(crate) fn define(
        &self,
        store: &mut Store<VmContext>,
        linker: &mut Linker<VmContext>,
    ) -> Result<(), RuntimeError> {
        if self.wasi.is_some() {
            preview1::add_to_linker_sync(linker, |ctx: &mut VmContext| &mut ctx.wasi).map_err(
                |e| WasiError::InitializationFailed {
                    reason: e.to_string(),
                },
            )?;
            return Ok(());
        }

        let incompatible = |name: &str, e: anyhow::Error| LinkError::Incompatible {
            module: self.module.clone(),
            name: name.to_string(),
            reason: e.to_string(),
        };

        for (name, symbol) in &self.symbols {
            let item: Extern = match symbol {
                Symbol::Function { id, ty } => {
                    linker
                        .func_new(
                            &self.module,
                            name,
                            ty.to_engine(store.engine()),
                            trampoline(*id, ty.clone()),
                        )
                        .map_err(|e| incompatible(name, e))?;
                    continue;
                }
                Symbol::Table(table) => table
                    .materialize(store)
                    .map_err(|e| incompatible(name, e))?
                    .into(),
                Symbol::Memory(memory) => memory
                    .materialize(store)
                    .map_err(|e| incompatible(name, e))?
                    .into(),
                Symbol::Global(global) => global
                    .materialize(store)
                    .map_err(|e| incompatible(name, e))?
                    .into(),
            };
            linker
                .define(&*store, &self.module, name, item)
                .map_err(|e| incompatible(name, e))?;
        }
        Ok(())
    }
}

impl fmt::Debug for ImportObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportObject")
            .field("module", &self.module)
            .field("symbols", &self.symbol_names())
            .field("wasi", &self.wasi.is_some())
            .field("deleted", &self.is_deleted())
            .finish()
    }
}

impl Drop for ImportObject {
    fn drop(&mut self) {
        self.delete();
    }
}

/// Build the engine callback for a registered host function.
///
/// Only the id is captured; the closure and shared context are looked up in
/// the registry on every call.
fn trampoline(
    id: FunctionId,
    ty: FunctionType,
) -> impl Fn(Caller<'_, VmContext>, &[Val], &mut [Val]) -> anyhow::Result<()> + Send + Sync + 'static
{
    move |caller, params, results| {
        let entry = registry::lookup(id)?;
        let args = value::decode(&caller, params, ty.params())?;

        let mut frame = CallingFrame {
            caller,
            context: entry.context,
        };
        let returned = (entry.function)(&mut frame, &args)?;

        value::check_kinds(&returned, ty.returns())?;
        let encoded = value::encode(&mut frame.caller, &returned)?;
        for (slot, val) in results.iter_mut().zip(encoded) {
            *slot = val;
        }
        Ok(())
    }
}
