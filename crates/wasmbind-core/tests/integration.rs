//! Integration tests for wasmbind-core.
//!
//! These tests verify the complete embedding pipeline:
//! - WAT compilation to module
//! - Import object linking and host function calls
//! - Host function registry revocation
//! - Tables, memories, and globals provided by the host
//! - Concurrent import object churn against running VMs

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use wasmbind_common::{
    ExecutionError, HostFunctionError, LinkError, RegistryError, RuntimeError, ValueKind,
    VmConfig,
};
use wasmbind_core::{
    ExternRef, FunctionType, HostFunction, HostGlobal, HostMemory, HostTable, ImportObject,
    ModuleHandle, Mutability, Vm, VmState, WasmEngine, WasmValue, registry,
};
use wasmbind_host::logging::logging_import_object;

const QUAD_WAT: &str = r#"
    (module
        (import "env" "double" (func $double (param i32) (result i32)))
        (func (export "quad") (param i32) (result i32)
            local.get 0
            call $double
            call $double)
    )
"#;

fn double_imports() -> ImportObject {
    let mut imports = ImportObject::new("env").unwrap();
    imports
        .add_function(
            "double",
            HostFunction::new(
                FunctionType::new([ValueKind::I32], [ValueKind::I32]),
                |_frame, args| {
                    let x = args[0].as_i32().unwrap_or_default();
                    Ok(vec![WasmValue::I32(x * 2)])
                },
            ),
        )
        .unwrap();
    imports
}

// ============================================================================
// Test: End-to-end
// ============================================================================

#[test]
fn test_run_wasm_add() {
    let bytes = wat::parse_str(
        r#"(module (func (export "add") (param i32 i32) (result i32)
            local.get 0 local.get 1 i32.add))"#,
    )
    .unwrap();
    let mut vm = Vm::new(&VmConfig::default()).unwrap();

    let result = vm.run_wasm(bytes, "add", &[2.into(), 3.into()]).unwrap();

    assert_eq!(result, vec![WasmValue::I32(5)]);
}

#[test]
fn test_run_wasm_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("add.wasm");
    std::fs::write(
        &path,
        wat::parse_str(
            r#"(module (func (export "add") (param i64 i64) (result i64)
                local.get 0 local.get 1 i64.add))"#,
        )
        .unwrap(),
    )
    .unwrap();
    let mut vm = Vm::new(&VmConfig::default()).unwrap();

    let result = vm
        .run_wasm(path.as_path(), "add", &[40i64.into(), 2i64.into()])
        .unwrap();

    assert_eq!(result, vec![WasmValue::I64(42)]);
}

#[test]
fn test_run_wasm_missing_file_is_load_error() {
    let mut vm = Vm::new(&VmConfig::default()).unwrap();

    let err = vm
        .run_wasm(std::path::Path::new("/nonexistent/add.wasm"), "add", &[])
        .unwrap_err();

    assert!(err.is_load());
    assert_eq!(vm.state(), VmState::Created);
}

#[test]
fn test_host_function_import() {
    let imports = double_imports();
    let mut vm = Vm::new(&VmConfig::default()).unwrap();
    vm.register_import(&imports).unwrap();

    let module = ModuleHandle::from_wat(QUAD_WAT).unwrap();
    let result = vm.run_wasm(&module, "quad", &[5.into()]).unwrap();

    assert_eq!(result, vec![WasmValue::I32(20)]);
    assert_eq!(vm.store().module_names(), vec!["env"]);
    assert_eq!(vm.store().registered_function_names("env"), vec!["double"]);
}

#[test]
fn test_results_match_declared_kinds() {
    let module = ModuleHandle::from_wat(
        r#"(module (func (export "mixed") (result i32 i64 f32 f64)
            i32.const 1 i64.const 2 f32.const 3.5 f64.const 4.25))"#,
    )
    .unwrap();
    let mut vm = Vm::new(&VmConfig::default()).unwrap();

    let result = vm.run_wasm(&module, "mixed", &[]).unwrap();
    let ty = vm.function_type("mixed").unwrap();

    let kinds: Vec<_> = result.iter().map(WasmValue::kind).collect();
    assert_eq!(kinds, ty.returns());
    assert_eq!(
        result,
        vec![
            WasmValue::I32(1),
            WasmValue::I64(2),
            WasmValue::F32(3.5),
            WasmValue::F64(4.25)
        ]
    );
}

// ============================================================================
// Test: Registry
// ============================================================================

#[test]
fn test_deleted_import_object_traps_with_registry_error() {
    let mut imports = double_imports();
    let mut vm = Vm::new(&VmConfig::default()).unwrap();
    vm.register_import(&imports).unwrap();
    vm.run_wasm(ModuleHandle::from_wat(QUAD_WAT).unwrap(), "quad", &[1.into()])
        .unwrap();

    let id = imports.function_ids()[0];
    imports.delete();

    let err = vm.execute("quad", &[5.into()]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Registry(RegistryError::UnknownHostFunction { id: revoked }) if revoked == id.get()
    ));
    assert_eq!(vm.state(), VmState::Instantiated);
}

#[test]
fn test_delete_leaves_no_context_references() {
    let mut imports = ImportObject::with_context("env", String::from("shared")).unwrap();
    for name in ["a", "b", "c"] {
        imports
            .add_function(
                name,
                HostFunction::new(FunctionType::default(), |_frame, _args| Ok(Vec::new())),
            )
            .unwrap();
    }
    let context = imports.shared_context().unwrap().clone();
    assert_eq!(registry::context_references(&context), 3);

    imports.delete();
    imports.delete();

    assert_eq!(registry::context_references(&context), 0);
}

#[test]
fn test_register_deleted_import_object() {
    let mut imports = double_imports();
    imports.delete();
    let mut vm = Vm::new(&VmConfig::default()).unwrap();

    let err = vm.register_import(&imports).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Link(LinkError::ImportObjectDeleted { .. })
    ));
    assert!(vm.store().module_names().is_empty());
}

#[test]
fn test_shared_context_visible_to_host_functions() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut imports = ImportObject::with_context("env", counter.clone()).unwrap();
    imports
        .add_function(
            "tick",
            HostFunction::new(FunctionType::default(), |frame, _args| {
                let counter = frame
                    .shared::<Arc<AtomicUsize>>()
                    .ok_or_else(|| HostFunctionError::Failed {
                        reason: "missing context".into(),
                    })?;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            }),
        )
        .unwrap();

    let mut vm = Vm::new(&VmConfig::default()).unwrap();
    vm.register_import(&imports).unwrap();
    let module = ModuleHandle::from_wat(
        r#"(module
            (import "env" "tick" (func $tick))
            (func (export "run") call $tick call $tick call $tick))"#,
    )
    .unwrap();
    vm.run_wasm(&module, "run", &[]).unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

// ============================================================================
// Test: Host function outcomes
// ============================================================================

fn single_import_vm(function: HostFunction, wat: &str) -> (Vm, ImportObject) {
    let mut imports = ImportObject::new("host").unwrap();
    imports.add_function("f", function).unwrap();
    let mut vm = Vm::new(&VmConfig::default()).unwrap();
    vm.register_import(&imports).unwrap();
    vm.load_wasm_module(&ModuleHandle::from_wat(wat).unwrap())
        .unwrap();
    vm.instantiate().unwrap();
    (vm, imports)
}

const CALL_F: &str = r#"
    (module
        (import "host" "f" (func $f (result i32)))
        (func (export "run") (result i32) call $f))
"#;

#[test]
fn test_host_function_error_surfaces() {
    let (mut vm, _imports) = single_import_vm(
        HostFunction::new(
            FunctionType::new(Vec::new(), [ValueKind::I32]),
            |_frame, _args| {
                Err(HostFunctionError::Failed {
                    reason: "backend down".into(),
                })
            },
        ),
        CALL_F,
    );

    let err = vm.execute("run", &[]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Execution(ExecutionError::HostFunction(HostFunctionError::Failed { .. }))
    ));
}

#[test]
fn test_host_function_terminate_is_success() {
    let (mut vm, _imports) = single_import_vm(
        HostFunction::new(
            FunctionType::new(Vec::new(), [ValueKind::I32]),
            |_frame, _args| Err(HostFunctionError::Terminate),
        ),
        CALL_F,
    );

    let result = vm.execute("run", &[]).unwrap();
    assert_eq!(result, vec![WasmValue::I32(0)]);
}

#[test]
fn test_host_function_wrong_result_kind() {
    let (mut vm, _imports) = single_import_vm(
        HostFunction::new(
            FunctionType::new(Vec::new(), [ValueKind::I32]),
            |_frame, _args| Ok(vec![WasmValue::F64(1.0)]),
        ),
        CALL_F,
    );

    let err = vm.execute("run", &[]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Execution(ExecutionError::Value(_))
    ));
}

#[test]
fn test_host_function_reads_and_writes_memory() {
    let mut imports = ImportObject::new("host").unwrap();
    imports
        .add_function(
            "upper",
            HostFunction::new(
                FunctionType::new([ValueKind::I32, ValueKind::I32], Vec::new()),
                |frame, args| {
                    let arg = |i: usize| {
                        u32::try_from(args[i].as_i32().unwrap_or_default()).unwrap_or_default()
                    };
                    let (ptr, len) = (arg(0), arg(1));
                    let bytes = frame.read_memory(ptr, len)?;
                    frame.write_memory(ptr, &bytes.to_ascii_uppercase())
                        .map(|()| Vec::new())
                },
            ),
        )
        .unwrap();
    let mut vm = Vm::new(&VmConfig::default()).unwrap();
    vm.register_import(&imports).unwrap();
    let module = ModuleHandle::from_wat(
        r#"(module
            (import "host" "upper" (func $upper (param i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 16) "wasm")
            (func (export "run") (result i32)
                i32.const 16
                i32.const 4
                call $upper
                i32.const 16
                i32.load))"#,
    )
    .unwrap();

    let result = vm.run_wasm(&module, "run", &[]).unwrap();

    assert_eq!(result, vec![WasmValue::I32(i32::from_le_bytes(*b"WASM"))]);
}

#[test]
fn test_host_function_out_of_bounds_memory() {
    let (mut vm, _imports) = single_import_vm(
        HostFunction::new(
            FunctionType::new(Vec::new(), [ValueKind::I32]),
            |frame, _args| {
                frame.read_memory(u32::MAX - 1, 16)?;
                Ok(vec![WasmValue::I32(1)])
            },
        ),
        r#"(module
            (import "host" "f" (func $f (result i32)))
            (memory (export "memory") 1)
            (func (export "run") (result i32) call $f))"#,
    );

    let err = vm.execute("run", &[]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Execution(ExecutionError::HostFunction(
            HostFunctionError::MemoryAccess { .. }
        ))
    ));
}

#[test]
fn test_extern_ref_round_trip_through_guest() {
    let module = ModuleHandle::from_wat(
        r#"(module (func (export "id") (param externref) (result externref) local.get 0))"#,
    )
    .unwrap();
    let mut vm = Vm::new(&VmConfig::default()).unwrap();
    let host = ExternRef::new(vec![1u8, 2, 3]);

    let result = vm
        .run_wasm(&module, "id", &[WasmValue::ExternRef(Some(host.clone()))])
        .unwrap();

    let back = result[0].as_extern_ref().unwrap();
    assert!(back.ptr_eq(&host));
    assert_eq!(back.downcast_ref::<Vec<u8>>().unwrap(), &vec![1, 2, 3]);
}

// ============================================================================
// Test: Host tables, memories, and globals
// ============================================================================

#[test]
fn test_host_memory_global_and_table() {
    let mut imports = ImportObject::new("host").unwrap();
    imports
        .add_memory("memory", HostMemory::new(1, Some(2)).unwrap())
        .unwrap();
    imports
        .add_global(
            "base",
            HostGlobal::new(WasmValue::I32(100), Mutability::Const),
        )
        .unwrap();
    imports
        .add_global(
            "counter",
            HostGlobal::new(WasmValue::I64(0), Mutability::Var),
        )
        .unwrap();
    imports
        .add_table(
            "table",
            HostTable::new(ValueKind::FuncRef, 2, None).unwrap(),
        )
        .unwrap();

    let mut vm = Vm::new(&VmConfig::default()).unwrap();
    vm.register_import(&imports).unwrap();
    let module = ModuleHandle::from_wat(
        r#"(module
            (import "host" "memory" (memory 1))
            (import "host" "base" (global $base i32))
            (import "host" "counter" (global $counter (mut i64)))
            (import "host" "table" (table 2 funcref))
            (func (export "run") (result i32 i64 i32)
                (i32.store (i32.const 0) (i32.const 7))
                (global.set $counter (i64.add (global.get $counter) (i64.const 1)))
                (i32.add (global.get $base) (i32.load (i32.const 0)))
                (global.get $counter)
                (table.size 0)))"#,
    )
    .unwrap();

    let result = vm.run_wasm(&module, "run", &[]).unwrap();
    assert_eq!(
        result,
        vec![WasmValue::I32(107), WasmValue::I64(1), WasmValue::I32(2)]
    );

    let again = vm.execute("run", &[]).unwrap();
    assert_eq!(again[1], WasmValue::I64(2));
}

#[test]
fn test_incompatible_host_global() {
    let mut imports = ImportObject::new("host").unwrap();
    imports
        .add_global("g", HostGlobal::new(WasmValue::I64(1), Mutability::Const))
        .unwrap();
    let mut vm = Vm::new(&VmConfig::default()).unwrap();
    vm.register_import(&imports).unwrap();

    let module =
        ModuleHandle::from_wat(r#"(module (import "host" "g" (global i32)))"#).unwrap();
    vm.load_wasm_module(&module).unwrap();

    assert!(vm.instantiate().unwrap_err().is_instantiation());
}

// ============================================================================
// Test: Linked modules
// ============================================================================

#[test]
fn test_main_module_imports_registered_module() {
    let mut vm = Vm::new(&VmConfig::default()).unwrap();
    vm.register_wasm_bytes(
        "lib",
        &wat::parse_str(
            r#"(module (func (export "square") (param i32) (result i32)
                local.get 0 local.get 0 i32.mul))"#,
        )
        .unwrap(),
    )
    .unwrap();

    let module = ModuleHandle::from_wat(
        r#"(module
            (import "lib" "square" (func $square (param i32) (result i32)))
            (func (export "run") (param i32) (result i32)
                local.get 0 call $square i32.const 1 i32.add))"#,
    )
    .unwrap();

    let result = vm.run_wasm(&module, "run", &[6.into()]).unwrap();
    assert_eq!(result, vec![WasmValue::I32(37)]);

    let result = vm
        .execute_registered("lib", "square", &[9.into()])
        .unwrap();
    assert_eq!(result, vec![WasmValue::I32(81)]);
}

#[test]
fn test_execute_registered_import_object() {
    let imports = double_imports();
    let mut vm = Vm::new(&VmConfig::default()).unwrap();
    vm.register_import(&imports).unwrap();

    let result = vm.execute_registered("env", "double", &[21.into()]).unwrap();

    assert_eq!(result, vec![WasmValue::I32(42)]);
    assert_eq!(
        vm.function_type_registered("env", "double"),
        Some(FunctionType::new([ValueKind::I32], [ValueKind::I32]))
    );
}

#[test]
fn test_link_environment_replayed_on_reload() {
    let imports = double_imports();
    let mut vm = Vm::new(&VmConfig::default()).unwrap();
    vm.register_import(&imports).unwrap();
    vm.register_wasm_bytes(
        "counter",
        &wat::parse_str(
            r#"(module
                (global $n (mut i32) (i32.const 0))
                (func (export "bump") (result i32)
                    global.get $n i32.const 1 i32.add global.set $n global.get $n))"#,
        )
        .unwrap(),
    )
    .unwrap();
    let module = ModuleHandle::from_wat(QUAD_WAT).unwrap();

    vm.execute_registered("counter", "bump", &[]).unwrap();
    let bumped = vm.execute_registered("counter", "bump", &[]).unwrap();
    assert_eq!(bumped, vec![WasmValue::I32(2)]);

    for x in 1..=3 {
        let result = vm.run_wasm(&module, "quad", &[x.into()]).unwrap();
        assert_eq!(result, vec![WasmValue::I32(x * 4)]);
    }

    // Registered modules are instantiated afresh with the new store
    let bumped = vm.execute_registered("counter", "bump", &[]).unwrap();
    assert_eq!(bumped, vec![WasmValue::I32(1)]);
    assert_eq!(vm.store().module_names(), vec!["counter", "env"]);
}

#[test]
fn test_host_memory_relinked_after_cleanup() {
    let mut imports = ImportObject::new("host").unwrap();
    imports
        .add_memory("memory", HostMemory::new(1, Some(2)).unwrap())
        .unwrap();
    let mut vm = Vm::new(&VmConfig::default()).unwrap();
    vm.register_import(&imports).unwrap();
    let module = ModuleHandle::from_wat(
        r#"(module
            (import "host" "memory" (memory 1 2))
            (func (export "pages") (result i32) memory.size))"#,
    )
    .unwrap();

    vm.run_wasm(&module, "pages", &[]).unwrap();
    vm.cleanup();
    let result = vm.run_wasm(&module, "pages", &[]).unwrap();

    assert_eq!(result, vec![WasmValue::I32(1)]);
}

// ============================================================================
// Test: Guest logging
// ============================================================================

#[test]
fn test_guest_logging() {
    let imports = logging_import_object().unwrap();
    let mut vm = Vm::new(&VmConfig::default()).unwrap();
    vm.register_import(&imports).unwrap();

    let module = ModuleHandle::from_wat(
        r#"(module
            (import "env" "log" (func $log (param i32 i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "hello")
            (func (export "run")
                (call $log (i32.const 1) (i32.const 0) (i32.const 5))))"#,
    )
    .unwrap();
    vm.run_wasm(&module, "run", &[]).unwrap();

    let logs = vm.context().logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message, "hello");
}

// ============================================================================
// Test: Concurrency
// ============================================================================

#[test]
fn test_concurrent_import_object_churn() {
    let engine = WasmEngine::new(&VmConfig::default()).unwrap();
    let module = ModuleHandle::from_wat(QUAD_WAT).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let engine = engine.clone();
            let module = module.clone();
            std::thread::spawn(move || {
                for round in 0..25 {
                    let mut imports = double_imports();
                    let ids = imports.function_ids();

                    let mut vm = Vm::with_engine(engine.clone()).unwrap();
                    vm.register_import(&imports).unwrap();
                    vm.run_wasm(&module, "quad", &[5.into()]).unwrap();

                    let x = worker * 100 + round;
                    let result = vm.execute("quad", &[x.into()]).unwrap();
                    assert_eq!(result, vec![WasmValue::I32(x * 4)]);

                    imports.delete();
                    assert!(ids.iter().all(|id| !registry::contains(*id)));
                    assert!(matches!(
                        vm.execute("quad", &[x.into()]),
                        Err(RuntimeError::Registry(_))
                    ));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}
