//! The VM: staged module pipeline and link environment.
//!
//! A [`Vm`] drives one main module through
//! `Created → Loaded → Validated → Instantiated` and keeps a link environment
//! of registered modules and import objects the main module can import from.
//!
//! Every transition checks the current [`VmState`] before touching the
//! engine. Failures leave the VM in a well-defined state:
//! - a failed load leaves it `Created`
//! - a failed validation leaves it `Loaded`
//! - a failed instantiation leaves it `Validated` (or `Loaded` if validation
//!   was the step that failed)
//! - a failed execution leaves it `Instantiated` and callable again
//!
//! Instances live in the VM's engine store until the store is dropped, so
//! the VM rebuilds its store whenever the main module is cleaned up,
//! reloaded, or re-instantiated. Registrations are replayed into the new
//! store in their original order.
//!
//! Engine errors are translated into [`RuntimeError`] at this boundary.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};
use wasmtime::{Extern, Func, Instance, Linker, RootScope, Store, Trap, Val};
use wasmtime_wasi::I32Exit;

use wasmbind_common::{
    ConfigFile, ExecutionError, HostFunctionError, LinkError, RegistryError, RuntimeError,
    ValueError, VmConfig,
};

use crate::import::{ImportObject, LinkedImports, SharedWasi};
use crate::statistics::Statistics;
use crate::store::{VmContext, VmStore, create_store};
use crate::value::{self, FunctionType, WasmValue};
use crate::wasi::WASI_MODULE_NAME;
use crate::{ModuleHandle, Validator, WasmEngine};

/// Pipeline state of a [`Vm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// No module loaded.
    Created,
    /// A module is loaded but not validated.
    Loaded,
    /// The loaded module passed validation.
    Validated,
    /// The module is instantiated and its exports are callable.
    Instantiated,
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VmState::Created => "created",
            VmState::Loaded => "loaded",
            VmState::Validated => "validated",
            VmState::Instantiated => "instantiated",
        };
        f.write_str(name)
    }
}

/// Built-in host modules a VM can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRegistration {
    /// The WASI preview1 import object.
    Wasi,
}

/// Where a module comes from.
#[derive(Debug, Clone)]
pub enum WasmSource {
    /// A `.wasm` file.
    File(PathBuf),
    /// Module bytes.
    Bytes(Vec<u8>),
    /// An already loaded module.
    Module(ModuleHandle),
}

impl From<&Path> for WasmSource {
    fn from(path: &Path) -> Self {
        WasmSource::File(path.to_path_buf())
    }
}

impl From<PathBuf> for WasmSource {
    fn from(path: PathBuf) -> Self {
        WasmSource::File(path)
    }
}

impl From<Vec<u8>> for WasmSource {
    fn from(bytes: Vec<u8>) -> Self {
        WasmSource::Bytes(bytes)
    }
}

impl From<&[u8]> for WasmSource {
    fn from(bytes: &[u8]) -> Self {
        WasmSource::Bytes(bytes.to_vec())
    }
}

impl From<ModuleHandle> for WasmSource {
    fn from(module: ModuleHandle) -> Self {
        WasmSource::Module(module)
    }
}

impl From<&ModuleHandle> for WasmSource {
    fn from(module: &ModuleHandle) -> Self {
        WasmSource::Module(module.clone())
    }
}

/// An entry in the VM's link environment.
pub(crate) enum Registered {
    /// A module, instantiated in the current store.
    Module(wasmtime::Module),
    /// An import object, snapshotted at registration.
    Imports {
        linked: LinkedImports,
        functions: Vec<(String, FunctionType)>,
    },
}

impl Registered {
    /// Exported functions with their signatures.
    pub(crate) fn functions(&self) -> Vec<(String, FunctionType)> {
        match self {
            Registered::Module(module) => module_functions(module),
            Registered::Imports { functions, .. } => functions.clone(),
        }
    }
}

/// Registered modules by name.
pub(crate) type Registry = BTreeMap<String, Registered>;

struct ActiveInstance {
    instance: Instance,
    module: wasmtime::Module,
}

/// A WebAssembly virtual machine.
///
/// # Example
///
/// ```ignore
/// use wasmbind_common::VmConfig;
/// use wasmbind_core::{Vm, WasmValue};
///
/// let mut vm = Vm::new(&VmConfig::default())?;
/// let sum = vm.run_wasm(std::path::Path::new("add.wasm"), "add", &[2.into(), 3.into()])?;
/// assert_eq!(sum, vec![WasmValue::I32(5)]);
/// ```
pub struct Vm {
    engine: WasmEngine,
    validator: Validator,
    store: Store<VmContext>,
    linker: Linker<VmContext>,
    state: VmState,
    loaded: Option<ModuleHandle>,
    compiled: Option<wasmtime::Module>,
    active: Option<ActiveInstance>,
    registered: Registry,
    /// Registration order, replayed when the store is rebuilt.
    link_order: Vec<String>,
    wasi: Option<ImportObject>,
    /// Environment of the linked WASI import object, built-in or not.
    wasi_env: Option<SharedWasi>,
    /// The store holds main-module instances of an earlier cycle.
    stale: bool,
    statistics: Statistics,
}

impl Vm {
    /// Create a VM with its own engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be created or the WASI host
    /// registration fails to link.
    pub fn new(config: &VmConfig) -> Result<Self, RuntimeError> {
        Self::with_engine(WasmEngine::new(config)?)
    }

    /// Create a VM on a shared engine, configured by the engine's
    /// [`VmConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the WASI host registration fails to link.
    pub fn with_engine(engine: WasmEngine) -> Result<Self, RuntimeError> {
        let config = engine.config().clone();
        let mut vm = Self {
            validator: Validator::new(&engine),
            store: create_store(&engine),
            linker: Linker::new(engine.inner()),
            state: VmState::Created,
            loaded: None,
            compiled: None,
            active: None,
            registered: Registry::new(),
            link_order: Vec::new(),
            wasi: None,
            wasi_env: None,
            stale: false,
            statistics: Statistics::new(config.statistics.clone(), config.cost_limit),
            engine,
        };

        if config.host_registrations.wasi {
            let none: &[&str] = &[];
            let wasi = ImportObject::new_wasi(none, none, none)?;
            vm.link(&wasi)?;
            vm.wasi = Some(wasi);
        }

        debug!(wasi = config.host_registrations.wasi, "VM created");
        Ok(vm)
    }

    /// Create a VM from a configuration file.
    ///
    /// The `[wasi]` section initializes the built-in WASI import object when
    /// `vm.host_registrations.wasi` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the VM cannot be created or the WASI section is
    /// malformed.
    pub fn from_config_file(file: &ConfigFile) -> Result<Self, RuntimeError> {
        let mut vm = Self::new(&file.vm)?;
        if let Some(wasi) = vm.wasi.as_mut() {
            wasi.reinitialize_wasi(
                file.wasi.args.as_slice(),
                file.wasi.envs.as_slice(),
                file.wasi.preopens.as_slice(),
            )?;
        }
        Ok(vm)
    }

    /// Current pipeline state.
    pub fn state(&self) -> VmState {
        self.state
    }

    /// The engine this VM runs on.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Load the main module from a file, bytes, or an existing handle.
    ///
    /// Replaces any previously loaded module and drops its instance.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Load`]; the VM is then `Created`.
    #[instrument(skip(self, source))]
    pub fn load(&mut self, source: impl Into<WasmSource>) -> Result<(), RuntimeError> {
        self.reset_main();
        let module = match source.into() {
            WasmSource::File(path) => ModuleHandle::from_file(path)?,
            WasmSource::Bytes(bytes) => ModuleHandle::from_bytes(&bytes)?,
            WasmSource::Module(module) => module,
        };
        self.loaded = Some(module);
        self.transition(VmState::Loaded);
        Ok(())
    }

    /// Load the main module from a `.wasm` file.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn load_wasm_file(&mut self, path: impl AsRef<Path>) -> Result<(), RuntimeError> {
        self.load(path.as_ref())
    }

    /// Load the main module from bytes.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn load_wasm_bytes(&mut self, bytes: &[u8]) -> Result<(), RuntimeError> {
        self.load(bytes)
    }

    /// Load the main module from a handle. The caller keeps its handle.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn load_wasm_module(&mut self, module: &ModuleHandle) -> Result<(), RuntimeError> {
        self.load(module)
    }

    /// Validate and compile the loaded module.
    ///
    /// A no-op once the module is validated.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::WrongWorkflow`] if nothing is loaded, or
    /// [`RuntimeError::Validation`]; the VM then stays `Loaded`.
    #[instrument(skip(self))]
    pub fn validate(&mut self) -> Result<(), RuntimeError> {
        match self.state {
            VmState::Created => Err(RuntimeError::wrong_workflow("validate", self.state.to_string())),
            VmState::Validated | VmState::Instantiated => Ok(()),
            VmState::Loaded => {
                let Some(module) = &self.loaded else {
                    return Err(RuntimeError::wrong_workflow("validate", self.state.to_string()));
                };
                self.compiled = Some(self.compile(module)?);
                self.transition(VmState::Validated);
                Ok(())
            }
        }
    }

    /// Instantiate the validated module against the link environment.
    ///
    /// Validates first if the module is only loaded. Re-instantiating an
    /// instantiated VM replaces the instance.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::WrongWorkflow`] if nothing is loaded,
    /// [`RuntimeError::Validation`], or [`RuntimeError::Instantiation`] for
    /// unresolved imports and trapping start functions.
    #[instrument(skip(self))]
    pub fn instantiate(&mut self) -> Result<(), RuntimeError> {
        if self.state == VmState::Created {
            return Err(RuntimeError::wrong_workflow(
                "instantiate",
                self.state.to_string(),
            ));
        }
        self.validate()?;
        let Some(module) = self.compiled.clone() else {
            return Err(RuntimeError::wrong_workflow(
                "instantiate",
                self.state.to_string(),
            ));
        };

        if self.active.take().is_some() {
            self.transition(VmState::Validated);
        }
        if self.stale {
            self.rebuild_store()?;
        }
        self.refresh_wasi()?;

        let start = Instant::now();
        let budget = self.prepare_fuel()?;
        self.stale = true;
        let result = self.linker.instantiate(&mut self.store, &module);
        self.settle_instantiation_fuel(budget);

        let instance = result.map_err(|e| {
            warn!(error = %e, "Instantiation failed");
            RuntimeError::instantiation(format!("{e:#}"))
        })?;

        info!(
            duration_ms = start.elapsed().as_millis(),
            "Module instantiated"
        );
        self.active = Some(ActiveInstance { instance, module });
        self.transition(VmState::Instantiated);
        Ok(())
    }

    /// Call an exported function of the instantiated module.
    ///
    /// Arguments are checked against the function's signature before the
    /// call; results are decoded with the signature's return kinds.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::NotInstantiated`] before instantiation,
    /// [`ExecutionError::FunctionNotFound`], a [`ValueError`] for
    /// mismatched arguments, or the translated trap.
    #[instrument(skip(self, args), fields(args = args.len()))]
    pub fn execute(
        &mut self,
        function: &str,
        args: &[WasmValue],
    ) -> Result<Vec<WasmValue>, RuntimeError> {
        if self.state != VmState::Instantiated {
            return Err(ExecutionError::NotInstantiated.into());
        }
        let instance = self.active.as_ref().map(|active| active.instance);
        let func = instance
            .and_then(|instance| instance.get_func(&mut self.store, function))
            .ok_or_else(|| ExecutionError::FunctionNotFound {
                name: function.to_string(),
            })?;
        self.call(func, args)
    }

    /// Call a function exported by a registered module or import object.
    ///
    /// Registered modules are instantiated when registered, so this does not
    /// require the main module to be instantiated.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::FunctionNotFound`] if the module or function
    /// is unknown, otherwise the same errors as [`execute`](Self::execute).
    #[instrument(skip(self, args), fields(args = args.len()))]
    pub fn execute_registered(
        &mut self,
        module: &str,
        function: &str,
        args: &[WasmValue],
    ) -> Result<Vec<WasmValue>, RuntimeError> {
        let not_found = || ExecutionError::FunctionNotFound {
            name: format!("{module}.{function}"),
        };
        if !self.registered.contains_key(module) {
            return Err(not_found().into());
        }
        let func = self
            .linker
            .get(&mut self.store, module, function)
            .and_then(Extern::into_func)
            .ok_or_else(not_found)?;
        self.call(func, args)
    }

    /// Load, validate, instantiate, and execute in one call.
    ///
    /// Stops at the first failing stage and returns its error.
    ///
    /// # Errors
    ///
    /// The error of the failing stage.
    pub fn run_wasm(
        &mut self,
        source: impl Into<WasmSource>,
        function: &str,
        args: &[WasmValue],
    ) -> Result<Vec<WasmValue>, RuntimeError> {
        self.load(source)?;
        self.validate()?;
        self.instantiate()?;
        self.execute(function, args)
    }

    /// Register a module under `name` so the main module can import its
    /// exports. The module is validated and instantiated immediately.
    ///
    /// Register before instantiating the main module; registrations made
    /// later only affect the next instantiation.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::EmptyModuleName`], [`LinkError::DuplicateModule`],
    /// [`RuntimeError::Validation`], or [`RuntimeError::Instantiation`].
    #[instrument(skip(self, module))]
    pub fn register_module(&mut self, name: &str, module: &ModuleHandle) -> Result<(), RuntimeError> {
        self.check_module_name(name)?;
        let compiled = self.compile(module)?;
        self.instantiate_registered(name, &compiled)?;

        self.registered
            .insert(name.to_string(), Registered::Module(compiled));
        self.link_order.push(name.to_string());
        info!(module = name, "Module registered");
        Ok(())
    }

    /// Register a module file under `name`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Load`] or the errors of
    /// [`register_module`](Self::register_module).
    pub fn register_wasm_file(
        &mut self,
        name: &str,
        path: impl AsRef<Path>,
    ) -> Result<(), RuntimeError> {
        let module = ModuleHandle::from_file(path)?;
        self.register_module(name, &module)
    }

    /// Register module bytes under `name`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Load`] or the errors of
    /// [`register_module`](Self::register_module).
    pub fn register_wasm_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<(), RuntimeError> {
        let module = ModuleHandle::from_bytes(bytes)?;
        self.register_module(name, &module)
    }

    /// Link an import object into the VM under its module name.
    ///
    /// The import object stays with the caller. Host functions keep working
    /// until it is deleted; calls after that fail with
    /// [`RegistryError::UnknownHostFunction`].
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::DuplicateModule`],
    /// [`LinkError::ImportObjectDeleted`], or [`LinkError::Incompatible`].
    #[instrument(skip(self, import), fields(module = %import.name()))]
    pub fn register_import(&mut self, import: &ImportObject) -> Result<(), RuntimeError> {
        self.check_module_name(import.name())?;
        self.link(import)?;
        info!("Import object registered");
        Ok(())
    }

    /// Drop the main module and its instance, returning to `Created`.
    ///
    /// The engine store is rebuilt, releasing every instance created so far.
    /// The link environment is kept: registered modules are instantiated
    /// afresh and import objects are linked again, so their state restarts.
    pub fn cleanup(&mut self) {
        self.reset_main();
    }

    /// Signature of an exported function of the instantiated module.
    pub fn function_type(&self, function: &str) -> Option<FunctionType> {
        let active = self.active.as_ref()?;
        let ty = active.module.get_export(function)?;
        FunctionType::from_engine(ty.func()?).ok()
    }

    /// Signature of a function exported by a registered module.
    pub fn function_type_registered(&self, module: &str, function: &str) -> Option<FunctionType> {
        self.registered
            .get(module)?
            .functions()
            .into_iter()
            .find(|(name, _)| name == function)
            .map(|(_, ty)| ty)
    }

    /// Exported functions of the instantiated module, sorted by name.
    pub fn function_list(&self) -> Vec<(String, FunctionType)> {
        let mut functions = self
            .active
            .as_ref()
            .map(|active| module_functions(&active.module))
            .unwrap_or_default();
        functions.sort_by(|a, b| a.0.cmp(&b.0));
        functions
    }

    /// A built-in host module, if the VM was configured with it.
    pub fn import_object(&self, kind: HostRegistration) -> Option<&ImportObject> {
        match kind {
            HostRegistration::Wasi => self.wasi.as_ref(),
        }
    }

    /// A built-in host module, mutably.
    pub fn import_object_mut(&mut self, kind: HostRegistration) -> Option<&mut ImportObject> {
        match kind {
            HostRegistration::Wasi => self.wasi.as_mut(),
        }
    }

    /// Read-only view of registered modules and the active instance.
    pub fn store(&self) -> VmStore<'_> {
        VmStore {
            registered: &self.registered,
            active: self.active.as_ref().map(|active| &active.module),
        }
    }

    /// Execution statistics.
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Execution statistics, mutably (for example to change the cost limit).
    pub fn statistics_mut(&mut self) -> &mut Statistics {
        &mut self.statistics
    }

    /// Store state shared with host functions, including guest logs.
    pub fn context(&self) -> &VmContext {
        self.store.data()
    }

    /// Store state, mutably.
    pub fn context_mut(&mut self) -> &mut VmContext {
        self.store.data_mut()
    }

    /// Exit code of the last WASI `proc_exit`, if any.
    pub fn wasi_exit_code(&self) -> Option<i32> {
        self.store.data().exit_code()
    }

    fn transition(&mut self, to: VmState) {
        if self.state != to {
            debug!(from = %self.state, to = %to, "VM state transition");
            self.state = to;
        }
    }

    fn reset_main(&mut self) {
        self.active = None;
        self.compiled = None;
        self.loaded = None;
        self.transition(VmState::Created);
        if self.stale {
            if let Err(e) = self.rebuild_store() {
                warn!(error = %e, "Store rebuild failed, retrying at next instantiation");
            }
        }
    }

    /// Replace the store and linker with fresh ones and replay every
    /// registration. On failure the previous store stays in place.
    fn rebuild_store(&mut self) -> Result<(), RuntimeError> {
        let store = std::mem::replace(&mut self.store, create_store(&self.engine));
        let linker = std::mem::replace(&mut self.linker, Linker::new(self.engine.inner()));

        if let Err(e) = self.replay_links() {
            self.store = store;
            self.linker = linker;
            return Err(e);
        }

        self.store.data_mut().inherit(store.into_data());
        self.stale = false;
        debug!(registrations = self.link_order.len(), "Store rebuilt");
        Ok(())
    }

    fn replay_links(&mut self) -> Result<(), RuntimeError> {
        for name in self.link_order.clone() {
            match self.registered.get(&name) {
                Some(Registered::Imports { linked, .. }) => {
                    linked.define(&mut self.store, &mut self.linker)?;
                }
                Some(Registered::Module(module)) => {
                    let module = module.clone();
                    self.instantiate_registered(&name, &module)?;
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Instantiate a registered module and expose its exports under `name`.
    fn instantiate_registered(
        &mut self,
        name: &str,
        module: &wasmtime::Module,
    ) -> Result<(), RuntimeError> {
        self.refresh_wasi()?;

        let budget = self.prepare_fuel()?;
        let result = self.linker.instantiate(&mut self.store, module);
        self.settle_instantiation_fuel(budget);
        let instance = result.map_err(|e| RuntimeError::instantiation(format!("{e:#}")))?;

        let mut linker = self.linker.clone();
        linker
            .instance(&mut self.store, name, instance)
            .map_err(|e| LinkError::Incompatible {
                module: name.to_string(),
                name: String::new(),
                reason: e.to_string(),
            })?;
        self.linker = linker;
        Ok(())
    }

    fn check_module_name(&self, name: &str) -> Result<(), LinkError> {
        if name.is_empty() {
            return Err(LinkError::EmptyModuleName);
        }
        if self.registered.contains_key(name) {
            return Err(LinkError::DuplicateModule {
                module: name.to_string(),
            });
        }
        Ok(())
    }

    fn compile(&self, module: &ModuleHandle) -> Result<wasmtime::Module, RuntimeError> {
        self.validator.validate(module)?;
        let start = Instant::now();
        let compiled = wasmtime::Module::from_binary(self.engine.inner(), module.bytes())
            .map_err(|e| RuntimeError::validation(format!("{e:#}")))?;
        info!(
            duration_ms = start.elapsed().as_millis(),
            content_hash = %module.content_hash(),
            "Module compiled"
        );
        Ok(compiled)
    }

    /// Define an import object in the linker. Either every symbol is
    /// defined or the linker is left untouched.
    fn link(&mut self, import: &ImportObject) -> Result<(), RuntimeError> {
        let linked = import.snapshot()?;

        let mut linker = self.linker.clone();
        linked.define(&mut self.store, &mut linker)?;
        self.linker = linker;

        let functions = if let Some(shared) = linked.wasi() {
            self.wasi_env = Some(Arc::clone(shared));
            self.refresh_wasi()?;
            self.linked_functions(WASI_MODULE_NAME)
        } else {
            linked.functions()
        };

        let name = import.name().to_string();
        self.registered
            .insert(name.clone(), Registered::Imports { linked, functions });
        self.link_order.push(name);
        Ok(())
    }

    fn linked_functions(&mut self, module: &str) -> Vec<(String, FunctionType)> {
        let funcs: Vec<(String, Func)> = self
            .linker
            .iter(&mut self.store)
            .filter(|(m, _, _)| *m == module)
            .filter_map(|(_, name, item)| item.into_func().map(|f| (name.to_string(), f)))
            .collect();
        funcs
            .into_iter()
            .filter_map(|(name, func)| {
                FunctionType::from_engine(&func.ty(&self.store))
                    .ok()
                    .map(|ty| (name, ty))
            })
            .collect()
    }

    /// Rebuild the WASI context from the linked WASI environment.
    fn refresh_wasi(&mut self) -> Result<(), RuntimeError> {
        let Some(shared) = &self.wasi_env else {
            return Ok(());
        };
        let ctx = shared.lock().build()?;
        let data = self.store.data_mut();
        data.wasi = ctx;
        data.exit_code = None;
        Ok(())
    }

    /// Assign fuel for the next call, returning the amount assigned.
    fn prepare_fuel(&mut self) -> Result<u64, RuntimeError> {
        if !self.engine.is_metering_enabled() {
            return Ok(0);
        }
        let budget = self.statistics.remaining_budget();
        self.store
            .set_fuel(budget)
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;
        Ok(budget)
    }

    fn fuel_spent(&self, budget: u64) -> u64 {
        let remaining = self.store.get_fuel().unwrap_or(budget);
        budget.saturating_sub(remaining)
    }

    fn settle_call_fuel(&mut self, budget: u64, start: Instant) {
        let spent = self.fuel_spent(budget);
        self.statistics.record(spent, start.elapsed());
    }

    fn settle_instantiation_fuel(&mut self, budget: u64) {
        let spent = self.fuel_spent(budget);
        self.statistics.record_instantiation(spent);
    }

    fn call(&mut self, func: Func, args: &[WasmValue]) -> Result<Vec<WasmValue>, RuntimeError> {
        let ty = FunctionType::from_engine(&func.ty(&self.store))?;
        value::check_kinds(args, ty.params())?;

        let start = Instant::now();
        let budget = self.prepare_fuel()?;
        let outcome = call_scoped(&mut self.store, func, args, &ty);
        self.settle_call_fuel(budget, start);

        match outcome {
            Ok(values) => {
                debug!(
                    duration_us = start.elapsed().as_micros(),
                    "Execution completed successfully"
                );
                Ok(values)
            }
            Err(err) => self.call_failed(err, &ty),
        }
    }

    /// Translate an engine call error.
    ///
    /// WASI `proc_exit` and [`HostFunctionError::Terminate`] end the guest
    /// successfully with zero-valued results.
    fn call_failed(
        &mut self,
        err: wasmtime::Error,
        ty: &FunctionType,
    ) -> Result<Vec<WasmValue>, RuntimeError> {
        let defaults = || -> Vec<WasmValue> {
            ty.returns()
                .iter()
                .map(|k| WasmValue::default_for(*k))
                .collect()
        };

        if let Some(exit) = err.downcast_ref::<I32Exit>() {
            info!(exit_code = exit.0, "Guest exited");
            self.store.data_mut().exit_code = Some(exit.0);
            return Ok(defaults());
        }
        if let Some(host) = err.downcast_ref::<HostFunctionError>() {
            if *host == HostFunctionError::Terminate {
                info!("Execution terminated by host function");
                return Ok(defaults());
            }
            warn!(error = %host, "Host function failed");
            return Err(ExecutionError::HostFunction(host.clone()).into());
        }
        if let Some(registry) = err.downcast_ref::<RegistryError>() {
            error!(error = %registry, "Host function id not registered");
            return Err(RuntimeError::Registry(registry.clone()));
        }
        if let Some(value) = err.downcast_ref::<ValueError>() {
            warn!(error = %value, "Value mismatch at call boundary");
            return Err(ExecutionError::Value(value.clone()).into());
        }

        let trap = err.downcast_ref::<Trap>();
        if let Some(Trap::OutOfFuel) = trap {
            warn!(
                cost_limit = ?self.statistics.cost_limit(),
                "Execution terminated: cost limit exceeded"
            );
            return Err(ExecutionError::CostLimitExceeded.into());
        }

        let message = err.to_string();
        error!(trap_message = %message, "Execution trapped");
        Err(ExecutionError::Trap {
            message,
            code: trap.map(|t| format!("{t:?}")),
        }
        .into())
    }
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("state", &self.state)
            .field("registered", &self.registered.keys().collect::<Vec<_>>())
            .field("wasi", &self.wasi.is_some())
            .finish_non_exhaustive()
    }
}

/// Encode, call, and decode inside one root scope, so external references
/// created for the call are unrooted when it returns.
fn call_scoped(
    store: &mut Store<VmContext>,
    func: Func,
    args: &[WasmValue],
    ty: &FunctionType,
) -> wasmtime::Result<Vec<WasmValue>> {
    let mut scope = RootScope::new(store);
    let params = value::encode(&mut scope, args)?;
    let mut results = vec![Val::I32(0); ty.returns().len()];
    func.call(&mut scope, &params, &mut results)?;
    Ok(value::decode(&scope, &results, ty.returns())?)
}

/// Exported functions of a compiled module, in declaration order.
fn module_functions(module: &wasmtime::Module) -> Vec<(String, FunctionType)> {
    module
        .exports()
        .filter_map(|export| {
            let ty = export.ty();
            let func = ty.func()?;
            FunctionType::from_engine(func)
                .ok()
                .map(|ty| (export.name().to_string(), ty))
        })
        .collect()
}
