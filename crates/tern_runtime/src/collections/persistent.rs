//! Persistent-tree vector backend.
//!
//! Slot 0 of the header points at an RRB tree of owned [`Slot`]s and slot 1
//! caches the length for generated code. Push and update build a new root
//! that shares every untouched node with the original.

use super::{ElemInfo, Slot, VectorBackend};
use imbl::Vector;
use std::sync::Arc;
use tern_core::heap::MAGIC_PVECTOR;
use tern_core::{AllocHandle, Heap, RawCell, TypeSystem};

type Tree = Vector<Slot>;

const SLOT_TREE: usize = 0;
const SLOT_LEN: usize = 1;

pub struct PersistentVector;

impl PersistentVector {
    fn tree<'a>(v: AllocHandle) -> &'a Tree {
        unsafe { &*(v.slot(SLOT_TREE) as *const Tree) }
    }

    fn wrap(heap: &Arc<Heap>, tree: Tree) -> AllocHandle {
        let len = tree.len();
        let v = heap.allocate(0, MAGIC_PVECTOR, "pvector");
        v.set_slot(SLOT_TREE, Box::into_raw(Box::new(tree)) as u64);
        v.set_slot(SLOT_LEN, len as u64);
        v
    }

    /// Dropping the root releases the slots of every node no other tree shares.
    unsafe fn free_tree(v: AllocHandle) {
        drop(unsafe { Box::from_raw(v.slot(SLOT_TREE) as *mut Tree) });
        unsafe { Heap::free(v) };
    }
}

impl VectorBackend for PersistentVector {
    const MAGIC: u32 = MAGIC_PVECTOR;

    fn alloc(heap: &Arc<Heap>, _elem: ElemInfo, _capacity: usize) -> AllocHandle {
        Self::wrap(heap, Tree::new())
    }

    fn from_cells(heap: &Arc<Heap>, elem: ElemInfo, cells: Vec<RawCell>) -> AllocHandle {
        let tree: Tree = cells.into_iter().map(|c| Slot::adopt(elem, c)).collect();
        Self::wrap(heap, tree)
    }

    #[inline]
    fn len(v: AllocHandle) -> usize {
        v.slot(SLOT_LEN) as usize
    }

    #[inline]
    fn get(v: AllocHandle, index: usize) -> Option<RawCell> {
        Self::tree(v).get(index).map(|s| s.cell)
    }

    fn cells(v: AllocHandle) -> Vec<RawCell> {
        Self::tree(v).iter().map(|s| s.cell).collect()
    }

    fn set(elem: ElemInfo, v: AllocHandle, index: usize, value: RawCell) -> AllocHandle {
        let tree = Self::tree(v).update(index, Slot::retained(elem, value));
        Self::wrap(&v.heap_arc(), tree)
    }

    fn push_back(elem: ElemInfo, v: AllocHandle, value: RawCell) -> AllocHandle {
        let mut tree = Self::tree(v).clone();
        tree.push_back(Slot::retained(elem, value));
        Self::wrap(&v.heap_arc(), tree)
    }

    fn concat(_elem: ElemInfo, a: AllocHandle, b: AllocHandle) -> AllocHandle {
        let mut tree = Self::tree(a).clone();
        tree.append(Self::tree(b).clone());
        Self::wrap(&a.heap_arc(), tree)
    }

    fn subset(_elem: ElemInfo, v: AllocHandle, start: usize, end: usize) -> AllocHandle {
        let mut head = Self::tree(v).clone();
        let mut middle = head.split_off(start);
        drop(middle.split_off(end - start));
        Self::wrap(&v.heap_arc(), middle)
    }

    fn replace_range(
        _elem: ElemInfo,
        v: AllocHandle,
        start: usize,
        end: usize,
        with: AllocHandle,
    ) -> AllocHandle {
        let mut head = Self::tree(v).clone();
        let tail = head.split_off(end);
        drop(head.split_off(start));
        head.append(Self::tree(with).clone());
        head.append(tail);
        Self::wrap(&v.heap_arc(), head)
    }

    fn alias(heap: &Arc<Heap>, elem: ElemInfo, cells: &[RawCell]) -> AllocHandle {
        // Slots always own their cell, so the alias holds its own references.
        let tree: Tree = cells.iter().map(|&c| Slot::retained(elem, c)).collect();
        Self::wrap(heap, tree)
    }

    fn release_alias(v: AllocHandle) {
        if v.release() == 0 {
            unsafe { Self::free_tree(v) };
        }
    }

    unsafe fn dispose(_types: &dyn TypeSystem, _elem: ElemInfo, v: AllocHandle) {
        unsafe { Self::free_tree(v) };
    }
}
