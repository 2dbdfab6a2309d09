//! Boxed JSON trees and boxed structs.

use super::{ElemInfo, expect_magic};
use crate::errors::{
    RtResult, RuntimeError,
    messages::{NOT_A_STRUCT, NOT_JSON},
};
use std::sync::Arc;
use tern_core::heap::{MAGIC_JSON, MAGIC_STRUCT};
use tern_core::{AllocHandle, Heap, Itype, RawCell, StructLayout, TypeKind, TypeSystem};

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

const SLOT_JSON: usize = 0;

pub fn box_json(heap: &Arc<Heap>, value: serde_json::Value) -> AllocHandle {
    let h = heap.allocate(0, MAGIC_JSON, "json");
    h.set_slot(SLOT_JSON, Box::into_raw(Box::new(value)) as u64);
    h
}

pub fn expect_json(cell: RawCell) -> RtResult<AllocHandle> {
    expect_magic(cell, MAGIC_JSON, NOT_JSON)
}

/// Borrow the tree; valid while the box is referenced.
pub fn json_ref<'a>(h: AllocHandle) -> &'a serde_json::Value {
    unsafe { &*(h.slot(SLOT_JSON) as *const serde_json::Value) }
}

/// # Safety
/// RC must be 0 and `h` unused afterwards.
pub(crate) unsafe fn dispose_json(h: AllocHandle) {
    assert_eq!(h.magic(), MAGIC_JSON, "disposing {:?} as json", h);
    drop(unsafe { Box::from_raw(h.slot(SLOT_JSON) as *mut serde_json::Value) });
    unsafe { Heap::free(h) };
}

// ---------------------------------------------------------------------------
// Structs
// ---------------------------------------------------------------------------
//
// The byte region follows the header; slot 0 holds its size in bytes and
// slot 1 the struct's itype.

const SLOT_SIZE: usize = 0;
const SLOT_TYPE: usize = 1;

pub fn struct_layout(types: &dyn TypeSystem, sty: Itype) -> RtResult<&StructLayout> {
    match types.kind(sty) {
        Some(TypeKind::Struct) => {
            let layout = types.struct_layout(sty).ok_or(RuntimeError::UnknownType(sty))?;
            layout.assert_well_formed();
            Ok(layout)
        }
        Some(_) => Err(RuntimeError::mismatch(NOT_A_STRUCT, types.name(sty))),
        None => Err(RuntimeError::UnknownType(sty)),
    }
}

fn member_slot(layout: &StructLayout, index: usize) -> usize {
    layout.members[index].offset as usize / 8
}

fn member_index(layout: &StructLayout, name: &str) -> RtResult<usize> {
    layout
        .member_index(name)
        .ok_or_else(|| RuntimeError::UnknownMember {
            ty: layout.name.clone(),
            member: name.to_string(),
        })
}

/// A zero-filled struct of type `sty`.
pub fn alloc_struct(heap: &Arc<Heap>, sty: Itype) -> RtResult<AllocHandle> {
    let layout = struct_layout(heap.types(), sty)?;
    let words = (layout.size as usize).div_ceil(8);
    let h = heap.allocate(words, MAGIC_STRUCT, "struct");
    h.set_slot(SLOT_SIZE, layout.size as u64);
    h.set_slot(SLOT_TYPE, sty as u64);
    Ok(h)
}

/// Build a struct owning `cells`, given in declaration order.
pub fn from_members(heap: &Arc<Heap>, sty: Itype, cells: Vec<RawCell>) -> RtResult<AllocHandle> {
    let layout = struct_layout(heap.types(), sty)?;
    if cells.len() != layout.members.len() {
        let types = heap.types();
        for (m, c) in layout.members.iter().zip(&cells) {
            ElemInfo::of(types, m.ty).release(types, *c);
        }
        return Err(RuntimeError::mismatch(
            "one value per struct member",
            format!("{} values for {}", cells.len(), layout.name),
        ));
    }
    let h = alloc_struct(heap, sty)?;
    for (i, c) in cells.into_iter().enumerate() {
        h.set_word(member_slot(layout, i), c.bits());
    }
    Ok(h)
}

pub fn expect_struct(cell: RawCell) -> RtResult<AllocHandle> {
    expect_magic(cell, MAGIC_STRUCT, NOT_A_STRUCT)
}

#[inline]
pub fn struct_type(h: AllocHandle) -> Itype {
    h.slot(SLOT_TYPE) as Itype
}

fn open(types: &dyn TypeSystem, sty: Itype, s: RawCell) -> RtResult<AllocHandle> {
    let h = expect_struct(s)?;
    if struct_type(h) != sty {
        return Err(RuntimeError::mismatch(NOT_A_STRUCT, types.name(struct_type(h))));
    }
    Ok(h)
}

/// Borrowed member at declaration index `index`.
pub fn member_at(types: &dyn TypeSystem, sty: Itype, s: RawCell, index: usize) -> RtResult<RawCell> {
    let layout = struct_layout(types, sty)?;
    let h = open(types, sty, s)?;
    if index >= layout.members.len() {
        return Err(RuntimeError::IndexOutOfBounds {
            index: index as i64,
            len: layout.members.len(),
        });
    }
    Ok(RawCell::from_bits(h.word(member_slot(layout, index))))
}

pub fn member(types: &dyn TypeSystem, sty: Itype, s: RawCell, name: &str) -> RtResult<RawCell> {
    let layout = struct_layout(types, sty)?;
    member_at(types, sty, s, member_index(layout, name)?)
}

/// Copy `s` with member `index` replaced by a borrowed `value`.
///
/// Every heap-backed member of the copy is retained, including the new one.
pub fn update_member_at(
    types: &dyn TypeSystem,
    sty: Itype,
    s: RawCell,
    index: usize,
    value: RawCell,
) -> RtResult<AllocHandle> {
    let layout = struct_layout(types, sty)?;
    let src = open(types, sty, s)?;
    if index >= layout.members.len() {
        return Err(RuntimeError::IndexOutOfBounds {
            index: index as i64,
            len: layout.members.len(),
        });
    }
    let out = alloc_struct(&src.heap_arc(), sty)?;
    unsafe { out.words_slice_mut() }.copy_from_slice(unsafe { src.words_slice() });
    out.set_word(member_slot(layout, index), value.bits());
    for (i, m) in layout.members.iter().enumerate() {
        ElemInfo::of(types, m.ty).retain(RawCell::from_bits(out.word(member_slot(layout, i))));
    }
    Ok(out)
}

pub fn update_member(
    types: &dyn TypeSystem,
    sty: Itype,
    s: RawCell,
    name: &str,
    value: RawCell,
) -> RtResult<AllocHandle> {
    let layout = struct_layout(types, sty)?;
    update_member_at(types, sty, s, member_index(layout, name)?, value)
}

/// Release every heap-backed member, then free the struct.
///
/// # Safety
/// RC must be 0 and `h` unused afterwards.
pub(crate) unsafe fn dispose_struct(types: &dyn TypeSystem, h: AllocHandle) {
    assert_eq!(h.magic(), MAGIC_STRUCT, "disposing {:?} as a struct", h);
    let sty = struct_type(h);
    let Some(layout) = types.struct_layout(sty) else {
        panic!("struct {:?} carries unknown type {sty}", h);
    };
    layout.assert_well_formed();
    for (i, m) in layout.members.iter().enumerate() {
        ElemInfo::of(types, m.ty).release(types, RawCell::from_bits(h.word(member_slot(layout, i))));
    }
    unsafe { Heap::free(h) };
}
