//! Vector operations dispatched on the vector type's declared backend.
//!
//! Both backends stay linked; the type system decides per itype which one
//! a handle belongs to, and the header magic is checked against it.

use super::higher_order::{self, Callback, FoldFn, MapFn};
use super::{ElemInfo, FlatVector, PersistentVector, VectorBackend, check_index, check_range};
use crate::errors::{RtResult, RuntimeError, messages::NOT_A_VECTOR};
use std::sync::Arc;
use tern_core::{AllocHandle, Backend, Heap, Itype, RawCell, TypeKind, TypeSystem};

macro_rules! with_backend {
    ($backend:expr, $B:ident => $body:expr) => {
        match $backend {
            Backend::Flat => {
                type $B = FlatVector;
                $body
            }
            Backend::Persistent => {
                type $B = PersistentVector;
                $body
            }
        }
    };
}

pub fn vector_info(types: &dyn TypeSystem, vty: Itype) -> RtResult<(ElemInfo, Backend)> {
    match types.kind(vty) {
        Some(TypeKind::Vector { elem, backend }) => Ok((ElemInfo::of(types, elem), backend)),
        Some(_) => Err(RuntimeError::mismatch(NOT_A_VECTOR, types.name(vty))),
        None => Err(RuntimeError::UnknownType(vty)),
    }
}

fn magic_of(backend: Backend) -> u32 {
    with_backend!(backend, B => B::MAGIC)
}

fn open(
    types: &dyn TypeSystem,
    vty: Itype,
    v: RawCell,
) -> RtResult<(ElemInfo, Backend, AllocHandle)> {
    let (elem, backend) = vector_info(types, vty)?;
    let h = super::expect_magic(v, magic_of(backend), NOT_A_VECTOR)?;
    Ok((elem, backend, h))
}

pub fn alloc(heap: &Arc<Heap>, vty: Itype, capacity: usize) -> RtResult<AllocHandle> {
    let (elem, backend) = vector_info(heap.types(), vty)?;
    Ok(with_backend!(backend, B => B::alloc(heap, elem, capacity)))
}

/// Build a vector that takes ownership of `cells`.
pub fn from_cells(heap: &Arc<Heap>, vty: Itype, cells: Vec<RawCell>) -> RtResult<AllocHandle> {
    let (elem, backend) = vector_info(heap.types(), vty)?;
    Ok(with_backend!(backend, B => B::from_cells(heap, elem, cells)))
}

pub fn len(types: &dyn TypeSystem, vty: Itype, v: RawCell) -> RtResult<usize> {
    let (_, backend, h) = open(types, vty, v)?;
    Ok(with_backend!(backend, B => B::len(h)))
}

/// Borrowed element at `index`.
pub fn get(types: &dyn TypeSystem, vty: Itype, v: RawCell, index: i64) -> RtResult<RawCell> {
    let (_, backend, h) = open(types, vty, v)?;
    with_backend!(backend, B => {
        let i = check_index(index, B::len(h))?;
        B::get(h, i).ok_or(RuntimeError::IndexOutOfBounds { index, len: B::len(h) })
    })
}

pub fn cells(types: &dyn TypeSystem, vty: Itype, v: RawCell) -> RtResult<Vec<RawCell>> {
    let (_, backend, h) = open(types, vty, v)?;
    Ok(with_backend!(backend, B => B::cells(h)))
}

pub fn set(
    types: &dyn TypeSystem,
    vty: Itype,
    v: RawCell,
    index: i64,
    value: RawCell,
) -> RtResult<AllocHandle> {
    let (elem, backend, h) = open(types, vty, v)?;
    with_backend!(backend, B => {
        let i = check_index(index, B::len(h))?;
        Ok(B::set(elem, h, i, value))
    })
}

pub fn push_back(
    types: &dyn TypeSystem,
    vty: Itype,
    v: RawCell,
    value: RawCell,
) -> RtResult<AllocHandle> {
    let (elem, backend, h) = open(types, vty, v)?;
    Ok(with_backend!(backend, B => B::push_back(elem, h, value)))
}

pub fn concat(types: &dyn TypeSystem, vty: Itype, a: RawCell, b: RawCell) -> RtResult<AllocHandle> {
    let (elem, backend, ha) = open(types, vty, a)?;
    let (_, _, hb) = open(types, vty, b)?;
    Ok(with_backend!(backend, B => B::concat(elem, ha, hb)))
}

pub fn subset(
    types: &dyn TypeSystem,
    vty: Itype,
    v: RawCell,
    start: i64,
    end: i64,
) -> RtResult<AllocHandle> {
    let (elem, backend, h) = open(types, vty, v)?;
    with_backend!(backend, B => {
        let (s, e) = check_range(start, end, B::len(h))?;
        Ok(B::subset(elem, h, s, e))
    })
}

pub fn replace_range(
    types: &dyn TypeSystem,
    vty: Itype,
    v: RawCell,
    start: i64,
    end: i64,
    with: RawCell,
) -> RtResult<AllocHandle> {
    let (elem, backend, h) = open(types, vty, v)?;
    let (_, _, hw) = open(types, vty, with)?;
    with_backend!(backend, B => {
        let (s, e) = check_range(start, end, B::len(h))?;
        Ok(B::replace_range(elem, h, s, e, hw))
    })
}

/// # Safety
/// `h` must have reached RC 0 and belong to `backend`.
pub(crate) unsafe fn dispose(
    types: &dyn TypeSystem,
    elem: ElemInfo,
    backend: Backend,
    h: AllocHandle,
) {
    let expected = magic_of(backend);
    if h.magic() != expected {
        panic!(
            "disposing {:?} as a {:?} vector, header magic {:#x}",
            h,
            backend,
            h.magic()
        );
    }
    with_backend!(backend, B => unsafe { B::dispose(types, elem, h) })
}

/// Result vectors of higher-order operations use the input's backend.
fn same_backend(
    types: &dyn TypeSystem,
    backend: Backend,
    out_vty: Itype,
) -> RtResult<ElemInfo> {
    let (out_elem, out_backend) = vector_info(types, out_vty)?;
    if out_backend != backend {
        return Err(RuntimeError::mismatch(
            "result vector on the input's backend",
            types.name(out_vty),
        ));
    }
    Ok(out_elem)
}

pub fn map(
    types: &dyn TypeSystem,
    vty: Itype,
    out_vty: Itype,
    v: RawCell,
    f: Callback<MapFn>,
) -> RtResult<AllocHandle> {
    let (_, backend, h) = open(types, vty, v)?;
    let out_elem = same_backend(types, backend, out_vty)?;
    let heap = h.heap_arc();
    Ok(with_backend!(backend, B => higher_order::map::<B>(&heap, out_elem, h, f)))
}

pub fn filter(
    types: &dyn TypeSystem,
    vty: Itype,
    v: RawCell,
    f: Callback<MapFn>,
) -> RtResult<AllocHandle> {
    let (elem, backend, h) = open(types, vty, v)?;
    let heap = h.heap_arc();
    Ok(with_backend!(backend, B => higher_order::filter::<B>(&heap, elem, h, f)))
}

/// Fold with an owned accumulator; `init` is borrowed.
pub fn reduce(
    types: &dyn TypeSystem,
    vty: Itype,
    acc_ty: Itype,
    v: RawCell,
    init: RawCell,
    f: Callback<FoldFn>,
) -> RtResult<RawCell> {
    let (_, backend, h) = open(types, vty, v)?;
    let acc = ElemInfo::of(types, acc_ty);
    Ok(with_backend!(backend, B => higher_order::reduce::<B>(acc, h, init, f)))
}

pub fn map_dag(
    types: &dyn TypeSystem,
    vty: Itype,
    out_vty: Itype,
    v: RawCell,
    parents: &[i64],
    f: Callback<FoldFn>,
) -> RtResult<AllocHandle> {
    let (_, backend, h) = open(types, vty, v)?;
    let out_elem = same_backend(types, backend, out_vty)?;
    let heap = h.heap_arc();
    with_backend!(backend, B => higher_order::map_dag::<B>(&heap, out_elem, h, parents, f))
}

pub fn sort(
    types: &dyn TypeSystem,
    vty: Itype,
    v: RawCell,
    less: Callback<FoldFn>,
) -> RtResult<AllocHandle> {
    let (elem, backend, h) = open(types, vty, v)?;
    let heap = h.heap_arc();
    Ok(with_backend!(backend, B => higher_order::stable_sort::<B>(&heap, elem, h, less)))
}
