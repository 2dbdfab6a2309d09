mod common;

use common::*;
use std::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU32, Ordering};
use tern_core::{Itype, RawCell};
use tern_runtime::ffi::{tern_release, tern_string_len, tern_vector_get, tern_vector_len, tern_vector_new};
use tern_runtime::{RuntimeError, Signature, SymbolTable, run_main};

static ARGV_TYPE: AtomicU32 = AtomicU32::new(0);
static STRING_TYPE: AtomicU32 = AtomicU32::new(0);
static INTS_TYPE: AtomicU32 = AtomicU32::new(0);

const NO_PARAMS: [Itype; 0] = [];

unsafe extern "C-unwind" fn main_returns_seven() -> RawCell {
    RawCell::from_int(7)
}

unsafe extern "C-unwind" fn main_returns_unit() -> RawCell {
    RawCell::NULL
}

/// Sum of the argument lengths, times ten, plus the argument count.
unsafe extern "C-unwind" fn main_with_args(argv: RawCell) -> RawCell {
    let vty = ARGV_TYPE.load(Ordering::SeqCst);
    let n = unsafe { tern_vector_len(vty, argv) };
    let mut total = 0;
    for i in 0..n {
        let arg = unsafe { tern_vector_get(vty, argv, i) };
        total += unsafe { tern_string_len(arg) };
        unsafe { tern_release(STRING_TYPE.load(Ordering::SeqCst), arg) };
    }
    RawCell::from_int(total * 10 + n)
}

unsafe extern "C-unwind" fn main_reads_past_the_end() -> RawCell {
    let vty = INTS_TYPE.load(Ordering::SeqCst);
    let v = unsafe { tern_vector_new(vty, 0) };
    unsafe { tern_vector_get(vty, v, 3) }
}

fn register(table: &mut SymbolTable, name: &str, address: *const c_void, sig: Signature) {
    unsafe { table.register_function(name, address, sig) };
}

#[test]
fn main_without_arguments() {
    let (heap, ids) = fixture();
    let mut table = SymbolTable::new();
    register(
        &mut table,
        "main",
        main_returns_seven as *const c_void,
        Signature::new(NO_PARAMS, ids.int),
    );
    assert_eq!(run_main(&heap, &table, None).unwrap(), 7);
    assert_eq!(run_main(&heap, &table, Some(&["ignored"])).unwrap(), 7);

    register(
        &mut table,
        "main",
        main_returns_unit as *const c_void,
        Signature::new(NO_PARAMS, ids.unit),
    );
    assert_eq!(run_main(&heap, &table, None).unwrap(), 0);
    assert_no_leaks(&heap);
}

#[test]
fn main_receives_argv() {
    let (heap, ids) = fixture();
    ARGV_TYPE.store(ids.strings_flat, Ordering::SeqCst);
    STRING_TYPE.store(ids.string, Ordering::SeqCst);
    let mut table = SymbolTable::new();
    register(
        &mut table,
        "main",
        main_with_args as *const c_void,
        Signature::new([ids.strings_flat], ids.int),
    );
    assert_eq!(run_main(&heap, &table, Some(&["ab", "cde"])).unwrap(), 52);
    assert_eq!(run_main(&heap, &table, None).unwrap(), 0);
    assert_no_leaks(&heap);
}

#[test]
fn main_signature_is_checked_before_the_call() {
    let (heap, ids) = fixture();
    let mut table = SymbolTable::new();
    register(
        &mut table,
        "main",
        main_returns_seven as *const c_void,
        Signature::new([ids.int], ids.int),
    );
    let err = run_main(&heap, &table, None).unwrap_err();
    let RuntimeError::SignatureMismatch { symbol, found, .. } = &err else {
        panic!("unexpected error {err}");
    };
    assert_eq!(symbol, "main");
    assert_eq!(found, "fn(int) -> int");

    register(
        &mut table,
        "main",
        main_returns_seven as *const c_void,
        Signature::new(NO_PARAMS, ids.string),
    );
    assert!(matches!(
        run_main(&heap, &table, None),
        Err(RuntimeError::SignatureMismatch { .. })
    ));
}

#[test]
fn missing_main_is_an_unknown_symbol() {
    let (heap, _) = fixture();
    assert_eq!(
        run_main(&heap, &SymbolTable::new(), None),
        Err(RuntimeError::UnknownSymbol("main".into()))
    );
}

#[test]
fn resolve_accepts_any_listed_signature() {
    let (heap, ids) = fixture();
    let types = heap.types();
    let mut table = SymbolTable::new();
    let sig = Signature::new([ids.string], ids.bool);
    register(&mut table, "pred", main_returns_seven as *const c_void, sig.clone());
    let (address, found) = table
        .resolve(types, "pred", &[Signature::new(NO_PARAMS, ids.int), sig.clone()])
        .unwrap();
    assert_eq!(address, main_returns_seven as *const c_void);
    assert_eq!(found, sig);
    assert_eq!(table.signature("pred"), Some(&sig));

    let err = table
        .resolve(types, "pred", &[Signature::new(NO_PARAMS, ids.int)])
        .unwrap_err();
    assert_eq!(
        err,
        RuntimeError::SignatureMismatch {
            symbol: "pred".into(),
            expected: "fn() -> int".into(),
            found: "fn(string) -> bool".into(),
        }
    );
}

#[test]
fn runtime_entry_points_bind_but_never_resolve_as_compiled_code() {
    let (heap, ids) = fixture();
    let table = SymbolTable::with_runtime_entry_points();
    assert_eq!(
        table.bind_function("tern_vector_len"),
        Some(tern_vector_len as *const c_void)
    );
    assert!(table.bind_function("tern_actor_send").is_some());
    assert!(table.signature("tern_vector_len").is_none());
    let err = table
        .resolve(heap.types(), "tern_vector_len", &[Signature::new(NO_PARAMS, ids.int)])
        .unwrap_err();
    assert!(err.to_string().ends_with("found runtime entry point"), "{err}");
}

#[test]
fn globals_own_their_values() {
    let (heap, ids) = fixture();
    let types = heap.types();
    let mut table = SymbolTable::new();
    table.define_global(types, "greeting", ids.string, str_cell(&heap, "hello"));
    table.define_global(types, "answer", ids.int, RawCell::from_int(42));
    table.define_global(types, "names", ids.strings_tree, strings(&heap, ids.strings_tree, &["a"]));

    let slot = table.bind_global("greeting").unwrap();
    assert_eq!(read_str(unsafe { *slot }), "hello");
    assert_eq!(table.global_type("answer"), Some(ids.int));
    assert_eq!(unsafe { *table.bind_global("answer").unwrap() }.as_int(), 42);

    // Redefinition releases the previous value.
    table.define_global(types, "greeting", ids.string, str_cell(&heap, "bye"));
    assert_eq!(heap.stats().live, 4);

    table.release_globals(types);
    assert!(table.bind_global("greeting").is_none());
    assert_no_leaks(&heap);
}

#[test]
fn runtime_errors_in_compiled_code_unwind() {
    let (heap, ids) = fixture();
    INTS_TYPE.store(ids.ints_flat, Ordering::SeqCst);
    let mut table = SymbolTable::new();
    register(
        &mut table,
        "main",
        main_reads_past_the_end as *const c_void,
        Signature::new(NO_PARAMS, ids.int),
    );
    let panic = catch_unwind(AssertUnwindSafe(|| run_main(&heap, &table, None))).unwrap_err();
    let message = panic
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_default();
    assert!(message.starts_with("Index out of bounds"), "{message}");
    // The abandoned vector is still live.
    assert_eq!(heap.stats().live, 1);
    let leaked = heap.leak_check();
    assert_eq!(leaked.len(), 1);
}
