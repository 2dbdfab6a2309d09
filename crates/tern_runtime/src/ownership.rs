//! Type-directed retain and deep release.
//!
//! Whether a cell holds a pointer, and which children a container owns, is
//! decided by the type system alone. The stored bytes are never inspected
//! to guess a kind.

use crate::collections::{ElemInfo, boxed, map, string, vector};
use crate::errors::{RtResult, RuntimeError};
use std::sync::Arc;
use tern_core::{Heap, Itype, RawCell, TypeKind, TypeSystem};

fn kind_of(types: &dyn TypeSystem, ty: Itype) -> TypeKind {
    match types.kind(ty) {
        Some(kind) => kind,
        None => panic!("ownership operation on unknown type {ty}"),
    }
}

/// Add one reference to a heap-backed value. Children are not touched.
pub fn retain_value(types: &dyn TypeSystem, ty: Itype, cell: RawCell) {
    if !kind_of(types, ty).is_heap_backed() {
        return;
    }
    if let Some(h) = cell.as_handle() {
        h.retain();
    }
}

/// Drop one reference; at zero, release every declared heap-backed child
/// and then free the container.
pub fn release_deep(types: &dyn TypeSystem, ty: Itype, cell: RawCell) {
    let kind = kind_of(types, ty);
    if !kind.is_heap_backed() {
        return;
    }
    let Some(h) = cell.as_handle() else {
        return;
    };
    if h.release() != 0 {
        return;
    }
    // Hold the heap until the whole subtree is gone.
    let _heap = h.heap_arc();
    unsafe {
        match kind {
            TypeKind::String => string::dispose(h),
            TypeKind::Vector { elem, backend } => {
                vector::dispose(types, ElemInfo::of(types, elem), backend, h)
            }
            TypeKind::Map { value, backend } => {
                map::dispose(types, ElemInfo::of(types, value), backend, h)
            }
            TypeKind::Json => boxed::dispose_json(h),
            TypeKind::Struct => boxed::dispose_struct(types, h),
            TypeKind::Unit | TypeKind::Bool | TypeKind::Int | TypeKind::Double | TypeKind::TypeId => {
                unreachable!()
            }
        }
    }
}

/// The zero value of `ty`, owned by the caller.
///
/// Scalars are all-zero bits; containers are empty; structs hold the zero
/// value of every member.
pub fn default_value(heap: &Arc<Heap>, ty: Itype) -> RtResult<RawCell> {
    let types = heap.types();
    let kind = types.kind(ty).ok_or(RuntimeError::UnknownType(ty))?;
    let h = match kind {
        TypeKind::Unit | TypeKind::Bool | TypeKind::Int | TypeKind::Double | TypeKind::TypeId => {
            return Ok(RawCell::NULL);
        }
        TypeKind::String => string::alloc_str(heap, b""),
        TypeKind::Vector { .. } => vector::alloc(heap, ty, 0)?,
        TypeKind::Map { .. } => map::alloc(heap, ty, 0)?,
        TypeKind::Json => boxed::box_json(heap, serde_json::Value::Null),
        TypeKind::Struct => {
            let layout = boxed::struct_layout(types, ty)?;
            let mut cells = Vec::with_capacity(layout.members.len());
            for m in &layout.members {
                match default_value(heap, m.ty) {
                    Ok(c) => cells.push(c),
                    Err(e) => {
                        for (done, c) in layout.members.iter().zip(cells) {
                            release_deep(types, done.ty, c);
                        }
                        return Err(e);
                    }
                }
            }
            boxed::from_members(heap, ty, cells)?
        }
    };
    Ok(RawCell::from_handle(h))
}

/// An owned runtime value released when dropped.
pub struct OwnedValue {
    heap: Arc<Heap>,
    ty: Itype,
    cell: RawCell,
}

impl OwnedValue {
    /// Take over one reference already held by the caller.
    pub fn adopt(heap: &Arc<Heap>, ty: Itype, cell: RawCell) -> Self {
        Self {
            heap: Arc::clone(heap),
            ty,
            cell,
        }
    }

    /// Add a reference to a borrowed value.
    pub fn retained(heap: &Arc<Heap>, ty: Itype, cell: RawCell) -> Self {
        retain_value(heap.types(), ty, cell);
        Self::adopt(heap, ty, cell)
    }

    #[inline]
    pub fn cell(&self) -> RawCell {
        self.cell
    }

    #[inline]
    pub fn ty(&self) -> Itype {
        self.ty
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    /// Give the reference back to the caller.
    pub fn into_raw(self) -> RawCell {
        let this = std::mem::ManuallyDrop::new(self);
        drop(unsafe { std::ptr::read(&this.heap) });
        this.cell
    }
}

impl Clone for OwnedValue {
    fn clone(&self) -> Self {
        Self::retained(&self.heap, self.ty, self.cell)
    }
}

impl Drop for OwnedValue {
    fn drop(&mut self) {
        release_deep(self.heap.types(), self.ty, self.cell);
    }
}

impl std::fmt::Debug for OwnedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OwnedValue({}, {:?})", self.heap.types().name(self.ty), self.cell)
    }
}
