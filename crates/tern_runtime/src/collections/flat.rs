//! Flat-array vector backend.
//!
//! Layout: slot 0 holds the element count, slot 1 the capacity in words,
//! and the cells follow the header inline. Every mutation copies all cells
//! into a fresh allocation, retaining each heap-backed element it copies.

use super::{ElemInfo, VectorBackend};
use std::sync::Arc;
use tern_core::heap::MAGIC_VECTOR;
use tern_core::{AllocHandle, Heap, RawCell, TypeSystem};

const SLOT_LEN: usize = 0;
const SLOT_CAP: usize = 1;

pub struct FlatVector;

impl FlatVector {
    fn build(heap: &Arc<Heap>, cells: &[RawCell], capacity: usize) -> AllocHandle {
        let cap = capacity.max(cells.len());
        let v = heap.allocate(cap, MAGIC_VECTOR, "vector");
        for (i, c) in cells.iter().enumerate() {
            v.set_word(i, c.bits());
        }
        v.set_slot(SLOT_LEN, cells.len() as u64);
        v.set_slot(SLOT_CAP, cap as u64);
        v
    }

    fn copy_retained(heap: &Arc<Heap>, elem: ElemInfo, cells: &[RawCell]) -> AllocHandle {
        for c in cells {
            elem.retain(*c);
        }
        Self::build(heap, cells, cells.len())
    }

    pub fn capacity(v: AllocHandle) -> usize {
        v.slot(SLOT_CAP) as usize
    }
}

impl VectorBackend for FlatVector {
    const MAGIC: u32 = MAGIC_VECTOR;

    fn alloc(heap: &Arc<Heap>, _elem: ElemInfo, capacity: usize) -> AllocHandle {
        Self::build(heap, &[], capacity)
    }

    fn from_cells(heap: &Arc<Heap>, _elem: ElemInfo, cells: Vec<RawCell>) -> AllocHandle {
        Self::build(heap, &cells, cells.len())
    }

    #[inline]
    fn len(v: AllocHandle) -> usize {
        v.slot(SLOT_LEN) as usize
    }

    #[inline]
    fn get(v: AllocHandle, index: usize) -> Option<RawCell> {
        (index < Self::len(v)).then(|| RawCell::from_bits(v.word(index)))
    }

    fn cells(v: AllocHandle) -> Vec<RawCell> {
        (0..Self::len(v))
            .map(|i| RawCell::from_bits(v.word(i)))
            .collect()
    }

    fn set(elem: ElemInfo, v: AllocHandle, index: usize, value: RawCell) -> AllocHandle {
        let mut cells = Self::cells(v);
        cells[index] = value;
        Self::copy_retained(&v.heap_arc(), elem, &cells)
    }

    fn push_back(elem: ElemInfo, v: AllocHandle, value: RawCell) -> AllocHandle {
        let mut cells = Self::cells(v);
        cells.push(value);
        Self::copy_retained(&v.heap_arc(), elem, &cells)
    }

    fn concat(elem: ElemInfo, a: AllocHandle, b: AllocHandle) -> AllocHandle {
        let mut cells = Self::cells(a);
        cells.extend(Self::cells(b));
        Self::copy_retained(&a.heap_arc(), elem, &cells)
    }

    fn subset(elem: ElemInfo, v: AllocHandle, start: usize, end: usize) -> AllocHandle {
        let cells = Self::cells(v);
        Self::copy_retained(&v.heap_arc(), elem, &cells[start..end])
    }

    fn replace_range(
        elem: ElemInfo,
        v: AllocHandle,
        start: usize,
        end: usize,
        with: AllocHandle,
    ) -> AllocHandle {
        let mut cells = Self::cells(v);
        cells.splice(start..end, Self::cells(with));
        Self::copy_retained(&v.heap_arc(), elem, &cells)
    }

    fn alias(heap: &Arc<Heap>, _elem: ElemInfo, cells: &[RawCell]) -> AllocHandle {
        Self::build(heap, cells, cells.len())
    }

    fn release_alias(v: AllocHandle) {
        if v.release() == 0 {
            // Aliased cells belong to someone else; only the container goes.
            unsafe { Heap::free(v) };
        }
    }

    unsafe fn dispose(types: &dyn TypeSystem, elem: ElemInfo, v: AllocHandle) {
        if elem.heap_backed {
            for c in Self::cells(v) {
                elem.release(types, c);
            }
        }
        unsafe { Heap::free(v) };
    }
}
