use super::{HostValue, kind_label};
use crate::collections::{boxed, map, string, vector};
use crate::errors::{RtResult, RuntimeError};
use crate::ownership::{default_value, release_deep};
use std::collections::BTreeMap;
use std::sync::Arc;
use tern_core::{Heap, Itype, RawCell, TypeKind, TypeSystem};

fn kind_of(types: &dyn TypeSystem, ty: Itype) -> RtResult<TypeKind> {
    types.kind(ty).ok_or(RuntimeError::UnknownType(ty))
}

/// Cells converted so far; released unless handed over with `finish`.
struct Partial<'a> {
    types: &'a dyn TypeSystem,
    cells: Vec<(Itype, RawCell)>,
}

impl<'a> Partial<'a> {
    fn new(types: &'a dyn TypeSystem, capacity: usize) -> Self {
        Self {
            types,
            cells: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, ty: Itype, cell: RawCell) {
        self.cells.push((ty, cell));
    }

    fn finish(mut self) -> Vec<RawCell> {
        std::mem::take(&mut self.cells)
            .into_iter()
            .map(|(_, c)| c)
            .collect()
    }
}

impl Drop for Partial<'_> {
    fn drop(&mut self) {
        for (ty, c) in self.cells.drain(..) {
            release_deep(self.types, ty, c);
        }
    }
}

/// Build an owned runtime value of type `ty` from a host tree.
///
/// On error nothing allocated along the way survives.
pub fn to_runtime_value(heap: &Arc<Heap>, ty: Itype, value: &HostValue) -> RtResult<RawCell> {
    let types = heap.types();
    let kind = kind_of(types, ty)?;
    let mismatch = || RuntimeError::mismatch(kind_label(kind), value.kind_name());
    let h = match (kind, value) {
        (TypeKind::Unit, HostValue::Unit) => return Ok(RawCell::NULL),
        (TypeKind::Bool, HostValue::Bool(b)) => return Ok(RawCell::from_bool(*b)),
        (TypeKind::Int, HostValue::Int(i)) => return Ok(RawCell::from_int(*i)),
        (TypeKind::Double, HostValue::Double(d)) => return Ok(RawCell::from_double(*d)),
        (TypeKind::Double, HostValue::Int(i)) => return Ok(RawCell::from_double(*i as f64)),
        (TypeKind::TypeId, HostValue::TypeId(t)) => return Ok(RawCell::from_itype(*t)),
        (TypeKind::String, HostValue::Str(s)) => string::alloc_str(heap, s.as_bytes()),
        (TypeKind::String, HostValue::Bytes(b)) => string::alloc_str(heap, b),
        (TypeKind::Vector { elem, .. }, HostValue::Vector(items)) => {
            let mut cells = Partial::new(types, items.len());
            for item in items.iter() {
                cells.push(elem, to_runtime_value(heap, elem, item)?);
            }
            vector::from_cells(heap, ty, cells.finish())?
        }
        (TypeKind::Map { value: vty, .. }, HostValue::Map(entries)) => {
            let mut cells = Partial::new(types, entries.len());
            for v in entries.values() {
                cells.push(vty, to_runtime_value(heap, vty, v)?);
            }
            let entries = entries
                .keys()
                .map(|k| Arc::from(k.as_str()))
                .zip(cells.finish())
                .collect();
            map::from_entries(heap, ty, entries)?
        }
        (TypeKind::Json, HostValue::Json(v)) => boxed::box_json(heap, (**v).clone()),
        (TypeKind::Json, other) => boxed::box_json(heap, super::json::host_to_json(other)),
        (TypeKind::Struct, HostValue::Struct(members)) => {
            let layout = boxed::struct_layout(types, ty)?;
            if let Some((name, _)) = members
                .iter()
                .find(|(name, _)| layout.member_index(name).is_none())
            {
                return Err(RuntimeError::UnknownMember {
                    ty: layout.name.clone(),
                    member: name.clone(),
                });
            }
            let mut cells = Partial::new(types, layout.members.len());
            for m in &layout.members {
                let cell = match members.iter().find(|(name, _)| *name == m.name) {
                    Some((_, v)) => to_runtime_value(heap, m.ty, v)?,
                    None => default_value(heap, m.ty)?,
                };
                cells.push(m.ty, cell);
            }
            boxed::from_members(heap, ty, cells.finish())?
        }
        _ => return Err(mismatch()),
    };
    Ok(RawCell::from_handle(h))
}

/// Structural copy of a borrowed runtime value.
pub fn from_runtime_value(types: &dyn TypeSystem, ty: Itype, cell: RawCell) -> RtResult<HostValue> {
    let kind = kind_of(types, ty)?;
    Ok(match kind {
        TypeKind::Unit => HostValue::Unit,
        TypeKind::Bool => HostValue::Bool(cell.as_bool()),
        TypeKind::Int => HostValue::Int(cell.as_int()),
        TypeKind::Double => HostValue::Double(cell.as_double()),
        TypeKind::TypeId => HostValue::TypeId(cell.as_itype()),
        TypeKind::String => {
            let bytes = string::to_bytes(string::expect_string(cell)?);
            match String::from_utf8(bytes) {
                Ok(s) => HostValue::Str(Arc::from(s)),
                Err(e) => HostValue::Bytes(Arc::from(e.into_bytes())),
            }
        }
        TypeKind::Vector { elem, .. } => {
            let items = vector::cells(types, ty, cell)?
                .into_iter()
                .map(|c| from_runtime_value(types, elem, c))
                .collect::<RtResult<Vec<_>>>()?;
            HostValue::Vector(items.into())
        }
        TypeKind::Map { value, .. } => {
            let entries = map::entries(types, ty, cell)?
                .into_iter()
                .map(|(k, c)| Ok((k.to_string(), from_runtime_value(types, value, c)?)))
                .collect::<RtResult<BTreeMap<_, _>>>()?;
            HostValue::Map(Arc::new(entries))
        }
        TypeKind::Json => {
            let h = boxed::expect_json(cell)?;
            HostValue::Json(Arc::new(boxed::json_ref(h).clone()))
        }
        TypeKind::Struct => {
            let layout = boxed::struct_layout(types, ty)?;
            let members = layout
                .members
                .iter()
                .enumerate()
                .map(|(i, m)| {
                    let c = boxed::member_at(types, ty, cell, i)?;
                    Ok((m.name.clone(), from_runtime_value(types, m.ty, c)?))
                })
                .collect::<RtResult<Vec<_>>>()?;
            HostValue::Struct(members.into())
        }
    })
}
