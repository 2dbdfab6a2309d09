//! The fixed entry-point table called by compiled code.
//!
//! Every entry point borrows its arguments and returns an owned value.
//! Operations run on the heap bound to the calling thread. A runtime error
//! becomes a panic that unwinds to the host, which may catch it at the
//! interop boundary.

use crate::actor::system::context;
use crate::collections::higher_order::{Callback, FoldFn, MapFn};
use crate::collections::{boxed, check_index, map, string, vector};
use crate::errors::RtResult;
use crate::host::{self, json};
use crate::ownership::{release_deep, retain_value};
use std::ffi::c_void;
use std::sync::Arc;
use tern_core::{AllocHandle, Heap, Itype, RawCell};

fn heap() -> Arc<Heap> {
    match Heap::current() {
        Some(heap) => heap,
        None => panic!("runtime entry point called with no heap bound to this thread"),
    }
}

fn raise<T>(result: RtResult<T>) -> T {
    result.unwrap_or_else(|e| panic!("{e}"))
}

#[inline]
fn cell(h: AllocHandle) -> RawCell {
    RawCell::from_handle(h)
}

fn owned(heap: &Heap, ty: Itype, value: RawCell) -> RawCell {
    retain_value(heap.types(), ty, value);
    value
}

/// Negative ids map to an id no process has.
fn process_id(pid: i64) -> usize {
    usize::try_from(pid).unwrap_or(usize::MAX)
}

fn key_str(key: RawCell) -> String {
    raise(string::expect_string(key).and_then(string::to_string))
}

// ---------------------------------------------------------------------------
// Ownership
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_retain(ty: Itype, value: RawCell) {
    retain_value(heap().types(), ty, value);
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_release(ty: Itype, value: RawCell) {
    release_deep(heap().types(), ty, value);
}

// ---------------------------------------------------------------------------
// Vectors
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_vector_new(vty: Itype, capacity: i64) -> RawCell {
    cell(raise(vector::alloc(&heap(), vty, capacity.max(0) as usize)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_vector_len(vty: Itype, v: RawCell) -> i64 {
    raise(vector::len(heap().types(), vty, v)) as i64
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_vector_get(vty: Itype, v: RawCell, index: i64) -> RawCell {
    let heap = heap();
    let types = heap.types();
    let value = raise(vector::get(types, vty, v, index));
    let elem = raise(vector::vector_info(types, vty)).0;
    owned(&heap, elem.ty, value)
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_vector_set(
    vty: Itype,
    v: RawCell,
    index: i64,
    value: RawCell,
) -> RawCell {
    cell(raise(vector::set(heap().types(), vty, v, index, value)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_vector_push(vty: Itype, v: RawCell, value: RawCell) -> RawCell {
    cell(raise(vector::push_back(heap().types(), vty, v, value)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_vector_concat(vty: Itype, a: RawCell, b: RawCell) -> RawCell {
    cell(raise(vector::concat(heap().types(), vty, a, b)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_vector_subset(
    vty: Itype,
    v: RawCell,
    start: i64,
    end: i64,
) -> RawCell {
    cell(raise(vector::subset(heap().types(), vty, v, start, end)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_vector_replace(
    vty: Itype,
    v: RawCell,
    start: i64,
    end: i64,
    with: RawCell,
) -> RawCell {
    cell(raise(vector::replace_range(heap().types(), vty, v, start, end, with)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_vector_map(
    vty: Itype,
    out_vty: Itype,
    v: RawCell,
    f: MapFn,
    env: *mut c_void,
    ctx: RawCell,
) -> RawCell {
    let f = Callback::new(f, env, ctx);
    cell(raise(vector::map(heap().types(), vty, out_vty, v, f)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_vector_filter(
    vty: Itype,
    v: RawCell,
    keep: MapFn,
    env: *mut c_void,
    ctx: RawCell,
) -> RawCell {
    let keep = Callback::new(keep, env, ctx);
    cell(raise(vector::filter(heap().types(), vty, v, keep)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_vector_reduce(
    vty: Itype,
    acc_ty: Itype,
    v: RawCell,
    init: RawCell,
    f: FoldFn,
    env: *mut c_void,
    ctx: RawCell,
) -> RawCell {
    let f = Callback::new(f, env, ctx);
    raise(vector::reduce(heap().types(), vty, acc_ty, v, init, f))
}

/// `parents` points at one index (or -1) per element.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_vector_map_dag(
    vty: Itype,
    out_vty: Itype,
    v: RawCell,
    parents: *const i64,
    parents_len: usize,
    f: FoldFn,
    env: *mut c_void,
    ctx: RawCell,
) -> RawCell {
    let parents = if parents_len == 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(parents, parents_len) }
    };
    let f = Callback::new(f, env, ctx);
    cell(raise(vector::map_dag(heap().types(), vty, out_vty, v, parents, f)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_vector_sort(
    vty: Itype,
    v: RawCell,
    less: FoldFn,
    env: *mut c_void,
    ctx: RawCell,
) -> RawCell {
    let less = Callback::new(less, env, ctx);
    cell(raise(vector::sort(heap().types(), vty, v, less)))
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_string_new(bytes: *const u8, len: usize) -> RawCell {
    let data = if len == 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(bytes, len) }
    };
    cell(string::alloc_str(&heap(), data))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_string_len(s: RawCell) -> i64 {
    string::len(raise(string::expect_string(s))) as i64
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_string_byte_at(s: RawCell, index: i64) -> i64 {
    raise(string::byte_at(raise(string::expect_string(s)), index)) as i64
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_string_concat(a: RawCell, b: RawCell) -> RawCell {
    let a = raise(string::expect_string(a));
    let b = raise(string::expect_string(b));
    cell(string::concat(a, b))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_string_subset(s: RawCell, start: i64, end: i64) -> RawCell {
    cell(raise(string::subset(raise(string::expect_string(s)), start, end)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_string_replace(
    s: RawCell,
    start: i64,
    end: i64,
    with: RawCell,
) -> RawCell {
    let s = raise(string::expect_string(s));
    let with = raise(string::expect_string(with));
    cell(raise(string::replace_range(s, start, end, with)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_string_push_byte(s: RawCell, byte: i64) -> RawCell {
    cell(string::push_byte(raise(string::expect_string(s)), byte as u8))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_string_eq(a: RawCell, b: RawCell) -> bool {
    let a = raise(string::expect_string(a));
    let b = raise(string::expect_string(b));
    string::equals(a, b)
}

// ---------------------------------------------------------------------------
// Maps
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_map_new(mty: Itype, capacity: i64) -> RawCell {
    cell(raise(map::alloc(&heap(), mty, capacity.max(0) as usize)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_map_len(mty: Itype, m: RawCell) -> i64 {
    raise(map::len(heap().types(), mty, m)) as i64
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_map_get(mty: Itype, m: RawCell, key: RawCell) -> RawCell {
    let heap = heap();
    let types = heap.types();
    let value = raise(map::get(types, mty, m, &key_str(key)));
    let value_ty = raise(map::map_info(types, mty)).0.ty;
    owned(&heap, value_ty, value)
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_map_contains(mty: Itype, m: RawCell, key: RawCell) -> bool {
    raise(map::contains(heap().types(), mty, m, &key_str(key)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_map_set(
    mty: Itype,
    m: RawCell,
    key: RawCell,
    value: RawCell,
) -> RawCell {
    cell(raise(map::set(heap().types(), mty, m, &key_str(key), value)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_map_remove(mty: Itype, m: RawCell, key: RawCell) -> RawCell {
    cell(raise(map::remove(heap().types(), mty, m, &key_str(key))))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_map_concat(mty: Itype, a: RawCell, b: RawCell) -> RawCell {
    cell(raise(map::concat(heap().types(), mty, a, b)))
}

/// The entries of `m` under the `keys_len` borrowed string keys at `keys`.
/// Keys `m` does not hold are skipped.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_map_subset(
    mty: Itype,
    m: RawCell,
    keys: *const RawCell,
    keys_len: usize,
) -> RawCell {
    let keys: Vec<String> = if keys_len == 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(keys, keys_len) }
            .iter()
            .map(|&k| key_str(k))
            .collect()
    };
    let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
    cell(raise(map::subset(heap().types(), mty, m, &keys)))
}

// ---------------------------------------------------------------------------
// Structs and JSON
// ---------------------------------------------------------------------------

/// `members` points at one borrowed cell per member, in declaration order.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_struct_new(sty: Itype, members: *const RawCell) -> RawCell {
    let heap = heap();
    let types = heap.types();
    let layout = raise(boxed::struct_layout(types, sty));
    let n = layout.members.len();
    let cells: Vec<RawCell> = if n == 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(members, n) }
            .iter()
            .zip(&layout.members)
            .map(|(&c, m)| owned(&heap, m.ty, c))
            .collect()
    };
    cell(raise(boxed::from_members(&heap, sty, cells)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_struct_get(sty: Itype, s: RawCell, index: i64) -> RawCell {
    let heap = heap();
    let types = heap.types();
    let layout = raise(boxed::struct_layout(types, sty));
    let i = raise(check_index(index, layout.members.len()));
    let value = raise(boxed::member_at(types, sty, s, i));
    owned(&heap, layout.members[i].ty, value)
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_struct_update(
    sty: Itype,
    s: RawCell,
    index: i64,
    value: RawCell,
) -> RawCell {
    let heap = heap();
    let types = heap.types();
    let layout = raise(boxed::struct_layout(types, sty));
    let i = raise(check_index(index, layout.members.len()));
    cell(raise(boxed::update_member_at(types, sty, s, i, value)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_json_box(ty: Itype, value: RawCell) -> RawCell {
    cell(raise(json::box_json_value(&heap(), ty, value)))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_json_unbox(ty: Itype, boxed_json: RawCell) -> RawCell {
    raise(json::unbox_json(&heap(), ty, boxed_json))
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_print(ty: Itype, value: RawCell) {
    println!("{}", raise(host::from_runtime_value(heap().types(), ty, value)));
}

// ---------------------------------------------------------------------------
// Actors
// ---------------------------------------------------------------------------

/// Hands the owned `message` to process `pid`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_actor_send(ctx: *mut c_void, pid: i64, message: RawCell) {
    let ctx = unsafe { context(ctx) };
    raise(ctx.send(process_id(pid), message));
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_actor_stop(ctx: *mut c_void, pid: i64) {
    let ctx = unsafe { context(ctx) };
    raise(ctx.stop(process_id(pid)));
}

#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn tern_actor_self(ctx: *mut c_void) -> i64 {
    unsafe { context(ctx) }.pid() as i64
}

macro_rules! entry_points {
    ($($f:ident),* $(,)?) => {
        /// Name and address of every runtime entry point.
        pub fn entry_points() -> Vec<(&'static str, *const c_void)> {
            vec![$((stringify!($f), $f as *const c_void)),*]
        }
    };
}

entry_points![
    tern_retain,
    tern_release,
    tern_vector_new,
    tern_vector_len,
    tern_vector_get,
    tern_vector_set,
    tern_vector_push,
    tern_vector_concat,
    tern_vector_subset,
    tern_vector_replace,
    tern_vector_map,
    tern_vector_filter,
    tern_vector_reduce,
    tern_vector_map_dag,
    tern_vector_sort,
    tern_string_new,
    tern_string_len,
    tern_string_byte_at,
    tern_string_concat,
    tern_string_subset,
    tern_string_replace,
    tern_string_push_byte,
    tern_string_eq,
    tern_map_new,
    tern_map_len,
    tern_map_get,
    tern_map_contains,
    tern_map_set,
    tern_map_remove,
    tern_map_concat,
    tern_map_subset,
    tern_struct_new,
    tern_struct_get,
    tern_struct_update,
    tern_json_box,
    tern_json_unbox,
    tern_print,
    tern_actor_send,
    tern_actor_stop,
    tern_actor_self,
];
