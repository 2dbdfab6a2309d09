mod common;

use common::*;
use std::ffi::c_void;
use std::sync::Arc;
use tern_core::{Heap, Itype, RawCell};
use tern_runtime::collections::{string, vector};
use tern_runtime::{Callback, FoldFn, MapFn, RuntimeError, release_deep};

/// Closure environment handed to the callbacks below.
struct Env {
    heap: Arc<Heap>,
    vty: Itype,
}

fn env_ptr(env: &Env) -> *mut c_void {
    env as *const Env as *mut c_void
}

unsafe fn env_of<'a>(p: *mut c_void) -> &'a Env {
    unsafe { &*(p as *const Env) }
}

unsafe extern "C-unwind" fn scale(_: *mut c_void, e: RawCell, ctx: RawCell) -> RawCell {
    RawCell::from_int(e.as_int() * ctx.as_int())
}

unsafe extern "C-unwind" fn is_even(_: *mut c_void, e: RawCell, _: RawCell) -> RawCell {
    RawCell::from_bool(e.as_int() % 2 == 0)
}

unsafe extern "C-unwind" fn shout(p: *mut c_void, e: RawCell, _: RawCell) -> RawCell {
    let env = unsafe { env_of(p) };
    let text = read_str(e).to_uppercase();
    str_cell(&env.heap, &text)
}

unsafe extern "C-unwind" fn append(p: *mut c_void, acc: RawCell, e: RawCell, _: RawCell) -> RawCell {
    let env = unsafe { env_of(p) };
    let out = RawCell::from_handle(string::concat(
        string::expect_string(acc).unwrap(),
        string::expect_string(e).unwrap(),
    ));
    // The accumulator is owned by the callback.
    release_deep(env.heap.types(), ids_string(env), acc);
    out
}

fn ids_string(env: &Env) -> Itype {
    env.heap.types().element_type(env.vty).unwrap()
}

unsafe extern "C-unwind" fn shorter(_: *mut c_void, a: RawCell, b: RawCell, _: RawCell) -> RawCell {
    let len = |c: RawCell| string::len(string::expect_string(c).unwrap());
    RawCell::from_bool(len(a) < len(b))
}

unsafe extern "C-unwind" fn int_less(_: *mut c_void, a: RawCell, b: RawCell, _: RawCell) -> RawCell {
    RawCell::from_bool(a.as_int() < b.as_int())
}

/// Not an order at all: every pair claims to be less.
unsafe extern "C-unwind" fn always_less(_: *mut c_void, _: RawCell, _: RawCell, _: RawCell) -> RawCell {
    RawCell::from_bool(true)
}

/// `e + sum(deps)`
unsafe extern "C-unwind" fn add_deps(p: *mut c_void, e: RawCell, deps: RawCell, _: RawCell) -> RawCell {
    let env = unsafe { env_of(p) };
    let sum: i64 = read_ints(env.heap.types(), env.vty, deps).into_iter().sum();
    RawCell::from_int(e.as_int() + sum)
}

/// Concatenate the parent's result in front of `e`.
unsafe extern "C-unwind" fn prefix_parent(
    p: *mut c_void,
    e: RawCell,
    deps: RawCell,
    _: RawCell,
) -> RawCell {
    let env = unsafe { env_of(p) };
    let mut text = String::new();
    for d in vector::cells(env.heap.types(), env.vty, deps).unwrap() {
        text.push_str(&read_str(d));
    }
    text.push_str(&read_str(e));
    str_cell(&env.heap, &text)
}

fn map_cb(func: MapFn, env: &Env, ctx: RawCell) -> Callback<MapFn> {
    Callback::new(func, env_ptr(env), ctx)
}

fn fold_cb(func: FoldFn, env: &Env) -> Callback<FoldFn> {
    Callback::new(func, env_ptr(env), RawCell::NULL)
}

#[test]
fn map_and_filter_ints() {
    for backend in BACKENDS {
        let (heap, ids) = fixture();
        let types = heap.types();
        let vty = ids.ints(backend);
        let e = Env { heap: heap.clone(), vty };
        let v = ints(&heap, vty, &[1, 2, 3, 4, 5]);

        let scaled = RawCell::from_handle(
            vector::map(types, vty, vty, v, map_cb(scale, &e, RawCell::from_int(3))).unwrap(),
        );
        assert_eq!(read_ints(types, vty, scaled), [3, 6, 9, 12, 15]);

        let even = RawCell::from_handle(
            vector::filter(types, vty, v, map_cb(is_even, &e, RawCell::NULL)).unwrap(),
        );
        assert_eq!(read_ints(types, vty, even), [2, 4]);

        for c in [v, scaled, even] {
            release_deep(types, vty, c);
        }
        drop(e);
        assert_no_leaks(&heap);
    }
}

#[test]
fn map_over_strings_owns_its_results() {
    for backend in BACKENDS {
        let (heap, ids) = fixture();
        let types = heap.types();
        let vty = ids.strings(backend);
        let e = Env { heap: heap.clone(), vty };
        let v = strings(&heap, vty, &["hi", "there"]);
        let loud = RawCell::from_handle(
            vector::map(types, vty, vty, v, map_cb(shout, &e, RawCell::NULL)).unwrap(),
        );
        assert_eq!(read_strings(types, vty, loud), ["HI", "THERE"]);
        release_deep(types, vty, v);
        release_deep(types, vty, loud);
        drop(e);
        assert_no_leaks(&heap);
    }
}

#[test]
fn map_result_must_share_the_input_backend() {
    let (heap, ids) = fixture();
    let types = heap.types();
    let e = Env { heap: heap.clone(), vty: ids.ints_flat };
    let v = ints(&heap, ids.ints_flat, &[1]);
    let err = vector::map(
        types,
        ids.ints_flat,
        ids.ints_tree,
        v,
        map_cb(scale, &e, RawCell::from_int(1)),
    )
    .unwrap_err();
    assert!(matches!(err, RuntimeError::TypeMismatch { .. }));
    release_deep(types, ids.ints_flat, v);
    drop(e);
    assert_no_leaks(&heap);
}

#[test]
fn filter_of_strings_retains_survivors() {
    let (heap, ids) = fixture();
    let types = heap.types();
    let vty = ids.strings_tree;
    let v = strings(&heap, vty, &["keep"]);
    let e = Env { heap: heap.clone(), vty };
    unsafe extern "C-unwind" fn always(_: *mut c_void, _: RawCell, _: RawCell) -> RawCell {
        RawCell::from_bool(true)
    }
    let kept = RawCell::from_handle(
        vector::filter(types, vty, v, map_cb(always, &e, RawCell::NULL)).unwrap(),
    );
    release_deep(types, vty, v);
    assert_eq!(read_strings(types, vty, kept), ["keep"]);
    release_deep(types, vty, kept);
    drop(e);
    assert_no_leaks(&heap);
}

#[test]
fn reduce_threads_an_owned_accumulator() {
    for backend in BACKENDS {
        let (heap, ids) = fixture();
        let types = heap.types();
        let vty = ids.strings(backend);
        let e = Env { heap: heap.clone(), vty };
        let v = strings(&heap, vty, &["a", "b", "c"]);
        let init = str_cell(&heap, ">");
        let joined = vector::reduce(types, vty, ids.string, v, init, fold_cb(append, &e)).unwrap();
        assert_eq!(read_str(joined), ">abc");
        // `init` stays with the caller.
        assert_eq!(read_str(init), ">");
        for (ty, c) in [(ids.string, joined), (ids.string, init), (vty, v)] {
            release_deep(types, ty, c);
        }
        drop(e);
        assert_no_leaks(&heap);
    }
}

#[test]
fn reduce_of_empty_vector_returns_init() {
    let (heap, ids) = fixture();
    let types = heap.types();
    let vty = ids.strings_flat;
    let e = Env { heap: heap.clone(), vty };
    let v = strings(&heap, vty, &[]);
    let init = str_cell(&heap, "only");
    let out = vector::reduce(types, vty, ids.string, v, init, fold_cb(append, &e)).unwrap();
    assert_eq!(out, init);
    assert_eq!(init.as_handle().unwrap().rc(), 2);
    release_deep(types, ids.string, out);
    release_deep(types, ids.string, init);
    release_deep(types, vty, v);
    drop(e);
    assert_no_leaks(&heap);
}

#[test]
fn sort_is_stable() {
    for backend in BACKENDS {
        let (heap, ids) = fixture();
        let types = heap.types();
        let vty = ids.strings(backend);
        let e = Env { heap: heap.clone(), vty };
        let v = strings(&heap, vty, &["bb", "a", "cc", "d", "eee", "f"]);
        let sorted = RawCell::from_handle(vector::sort(types, vty, v, fold_cb(shorter, &e)).unwrap());
        assert_eq!(read_strings(types, vty, sorted), ["a", "d", "f", "bb", "cc", "eee"]);
        assert_eq!(read_strings(types, vty, v), ["bb", "a", "cc", "d", "eee", "f"]);
        release_deep(types, vty, v);
        release_deep(types, vty, sorted);
        drop(e);
        assert_no_leaks(&heap);
    }
}

#[test]
fn sort_orders_many_ints() {
    for backend in BACKENDS {
        let (heap, ids) = fixture();
        let types = heap.types();
        let vty = ids.ints(backend);
        let e = Env { heap: heap.clone(), vty };
        let input: Vec<i64> = (0..101).map(|i| (i * 37) % 101).collect();
        let v = ints(&heap, vty, &input);
        let sorted = RawCell::from_handle(vector::sort(types, vty, v, fold_cb(int_less, &e)).unwrap());
        assert_eq!(read_ints(types, vty, sorted), (0..101).collect::<Vec<i64>>());
        release_deep(types, vty, v);
        release_deep(types, vty, sorted);
        drop(e);
        assert_no_leaks(&heap);
    }
}

#[test]
fn sort_with_an_inconsistent_predicate_keeps_every_element() {
    for backend in BACKENDS {
        let (heap, ids) = fixture();
        let types = heap.types();
        let vty = ids.strings(backend);
        let e = Env { heap: heap.clone(), vty };
        let input: Vec<String> = (0..100).map(|i| format!("s{i}")).collect();
        let refs: Vec<&str> = input.iter().map(String::as_str).collect();
        let v = strings(&heap, vty, &refs);

        let sorted = RawCell::from_handle(vector::sort(types, vty, v, fold_cb(always_less, &e)).unwrap());
        let mut got = read_strings(types, vty, sorted);
        assert_eq!(got.len(), 100);
        got.sort();
        let mut want = input.clone();
        want.sort();
        assert_eq!(got, want);

        release_deep(types, vty, v);
        release_deep(types, vty, sorted);
        drop(e);
        assert_no_leaks(&heap);
    }
}

#[test]
fn map_dag_feeds_parent_results_forward() {
    for backend in BACKENDS {
        let (heap, ids) = fixture();
        let types = heap.types();
        let vty = ids.ints(backend);
        let e = Env { heap: heap.clone(), vty };
        let v = ints(&heap, vty, &[10, 20, 30]);
        let out = RawCell::from_handle(
            vector::map_dag(types, vty, vty, v, &[-1, 0, 0], fold_cb(add_deps, &e)).unwrap(),
        );
        assert_eq!(read_ints(types, vty, out), [10, 30, 40]);
        release_deep(types, vty, v);
        release_deep(types, vty, out);
        drop(e);
        assert_no_leaks(&heap);
    }
}

#[test]
fn map_dag_over_a_chain_of_strings() {
    for backend in BACKENDS {
        let (heap, ids) = fixture();
        let types = heap.types();
        let vty = ids.strings(backend);
        let e = Env { heap: heap.clone(), vty };
        let v = strings(&heap, vty, &["c", "a", "b"]);
        // 1 is the root, 2 follows 1, 0 follows 2.
        let out = RawCell::from_handle(
            vector::map_dag(types, vty, vty, v, &[2, -1, 1], fold_cb(prefix_parent, &e)).unwrap(),
        );
        assert_eq!(read_strings(types, vty, out), ["abc", "a", "ab"]);
        release_deep(types, vty, v);
        release_deep(types, vty, out);
        drop(e);
        assert_no_leaks(&heap);
    }
}

#[test]
fn map_dag_validates_parents() {
    let (heap, ids) = fixture();
    let types = heap.types();
    let vty = ids.ints_flat;
    let e = Env { heap: heap.clone(), vty };
    let v = ints(&heap, vty, &[1, 2, 3]);
    assert_eq!(
        vector::map_dag(types, vty, vty, v, &[-1, 0], fold_cb(add_deps, &e)),
        Err(RuntimeError::LengthMismatch { elements: 3, parents: 2 })
    );
    assert_eq!(
        vector::map_dag(types, vty, vty, v, &[-1, 5, 0], fold_cb(add_deps, &e)),
        Err(RuntimeError::InvalidParent { index: 1, parent: 5 })
    );
    assert_eq!(
        vector::map_dag(types, vty, vty, v, &[-1, -2, 0], fold_cb(add_deps, &e)),
        Err(RuntimeError::InvalidParent { index: 1, parent: -2 })
    );
    release_deep(types, vty, v);
    drop(e);
    assert_no_leaks(&heap);
}

#[test]
#[should_panic(expected = "dependency cycle")]
fn map_dag_cycle_is_fatal() {
    let (heap, ids) = fixture();
    let vty = ids.ints_flat;
    let e = Env { heap: heap.clone(), vty };
    let v = ints(&heap, vty, &[1, 2]);
    let _ = vector::map_dag(heap.types(), vty, vty, v, &[1, 0], fold_cb(add_deps, &e));
}
