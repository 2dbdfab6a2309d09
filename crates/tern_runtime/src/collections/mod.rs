//! Heap-backed collections.
//!
//! - `flat` / `persistent` - the two vector backends behind [`VectorBackend`]
//! - `vector` - type-directed dispatch onto the right vector backend
//! - `string` - the flat layout specialized to byte-packed cells
//! - `map` - ordered table and persistent trie map behind [`MapBackend`]
//! - `boxed` - boxed JSON and boxed struct objects
//! - `higher_order` - map / filter / reduce / map_dag / stable sort
//!
//! Every operation borrows its arguments and returns a new owned handle.

pub mod boxed;
pub mod flat;
pub mod higher_order;
pub mod map;
pub mod persistent;
pub mod string;
pub mod vector;

pub use flat::FlatVector;
pub use map::{MapBackend, TableMap, TrieMap};
pub use persistent::PersistentVector;

use crate::errors::{RtResult, RuntimeError};
use crate::ownership;
use std::sync::Arc;
use tern_core::{AllocHandle, Heap, Itype, RawCell, TypeSystem};

/// Element facts every backend operation needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElemInfo {
    pub ty: Itype,
    pub heap_backed: bool,
}

impl ElemInfo {
    pub fn of(types: &dyn TypeSystem, ty: Itype) -> Self {
        Self {
            ty,
            heap_backed: types.is_heap_backed(ty),
        }
    }

    #[inline]
    pub fn retain(self, cell: RawCell) {
        if self.heap_backed {
            if let Some(h) = cell.as_handle() {
                h.retain();
            }
        }
    }

    #[inline]
    pub fn release(self, types: &dyn TypeSystem, cell: RawCell) {
        if self.heap_backed {
            ownership::release_deep(types, self.ty, cell);
        }
    }
}

/// Contract shared by the flat and persistent vector backends.
///
/// Indices are validated by the caller; backends may assume them in range.
pub trait VectorBackend {
    const MAGIC: u32;

    fn alloc(heap: &Arc<Heap>, elem: ElemInfo, capacity: usize) -> AllocHandle;

    /// Build a vector that takes ownership of `cells`.
    fn from_cells(heap: &Arc<Heap>, elem: ElemInfo, cells: Vec<RawCell>) -> AllocHandle;

    fn len(v: AllocHandle) -> usize;

    fn get(v: AllocHandle, index: usize) -> Option<RawCell>;

    /// Borrowed snapshot of the elements.
    fn cells(v: AllocHandle) -> Vec<RawCell>;

    fn set(elem: ElemInfo, v: AllocHandle, index: usize, value: RawCell) -> AllocHandle;

    fn push_back(elem: ElemInfo, v: AllocHandle, value: RawCell) -> AllocHandle;

    fn concat(elem: ElemInfo, a: AllocHandle, b: AllocHandle) -> AllocHandle;

    fn subset(elem: ElemInfo, v: AllocHandle, start: usize, end: usize) -> AllocHandle;

    fn replace_range(
        elem: ElemInfo,
        v: AllocHandle,
        start: usize,
        end: usize,
        with: AllocHandle,
    ) -> AllocHandle;

    /// A temporary vector over `cells` that the caller still owns.
    fn alias(heap: &Arc<Heap>, elem: ElemInfo, cells: &[RawCell]) -> AllocHandle;

    /// Drop a vector built by [`VectorBackend::alias`].
    fn release_alias(v: AllocHandle);

    /// Release every element and free the allocation. RC must be 0.
    ///
    /// # Safety
    /// `v` must not be used afterwards.
    unsafe fn dispose(types: &dyn TypeSystem, elem: ElemInfo, v: AllocHandle);
}

/// Reject a handle whose header names a different object kind.
pub(crate) fn expect_magic(
    cell: RawCell,
    magic: u32,
    expected: &'static str,
) -> RtResult<AllocHandle> {
    let Some(h) = cell.as_handle() else {
        return Err(RuntimeError::mismatch(expected, "null"));
    };
    if h.magic() != magic {
        return Err(RuntimeError::mismatch(expected, h.tag()));
    }
    Ok(h)
}

/// Normalize `[start, end)` against `len`.
pub(crate) fn check_range(start: i64, end: i64, len: usize) -> RtResult<(usize, usize)> {
    if start < 0 || start as usize > len {
        return Err(RuntimeError::IndexOutOfBounds { index: start, len });
    }
    if end < start || end as usize > len {
        return Err(RuntimeError::IndexOutOfBounds { index: end, len });
    }
    Ok((start as usize, end as usize))
}

pub(crate) fn check_index(index: i64, len: usize) -> RtResult<usize> {
    if index < 0 || index as usize >= len {
        return Err(RuntimeError::IndexOutOfBounds { index, len });
    }
    Ok(index as usize)
}

/// An owned cell inside a persistent structure.
///
/// Cloning retains and dropping deep-releases, so path copying inside the
/// tree keeps every reference count exact without walking shared nodes.
pub(crate) struct Slot {
    pub(crate) cell: RawCell,
    elem: ElemInfo,
}

impl Slot {
    /// Take ownership of an already counted reference.
    pub(crate) fn adopt(elem: ElemInfo, cell: RawCell) -> Self {
        Slot { cell, elem }
    }

    /// Add a reference to a borrowed cell.
    pub(crate) fn retained(elem: ElemInfo, cell: RawCell) -> Self {
        elem.retain(cell);
        Slot { cell, elem }
    }
}

impl Clone for Slot {
    fn clone(&self) -> Self {
        Slot::retained(self.elem, self.cell)
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if !self.elem.heap_backed {
            return;
        }
        if let Some(h) = self.cell.as_handle() {
            // The element may hold the last reference to its heap.
            let heap = h.heap_arc();
            ownership::release_deep(heap.types(), self.elem.ty, self.cell);
        }
    }
}
