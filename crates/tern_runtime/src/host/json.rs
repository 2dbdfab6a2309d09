//! Runtime value ⇄ `serde_json::Value`.
//!
//! Conversion is type directed in both directions and goes through the
//! host tree, so JSON never sees a raw cell.

use super::{HostValue, kind_label};
use crate::collections::boxed;
use crate::errors::{RtResult, RuntimeError};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tern_core::{AllocHandle, Heap, Itype, RawCell, TypeKind, TypeSystem};

pub fn host_to_json(value: &HostValue) -> Value {
    match value {
        HostValue::Unit => Value::Null,
        HostValue::Bool(b) => Value::Bool(*b),
        HostValue::Int(i) => Value::Number((*i).into()),
        HostValue::Double(d) => Number::from_f64(*d).map_or(Value::Null, Value::Number),
        HostValue::TypeId(t) => Value::Number((*t).into()),
        HostValue::Str(s) => Value::String(s.to_string()),
        HostValue::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
        HostValue::Vector(items) => Value::Array(items.iter().map(host_to_json).collect()),
        HostValue::Map(entries) => Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), host_to_json(v)))
                .collect::<Map<_, _>>(),
        ),
        HostValue::Json(v) => (**v).clone(),
        HostValue::Struct(members) => Value::Object(
            members
                .iter()
                .map(|(k, v)| (k.clone(), host_to_json(v)))
                .collect::<Map<_, _>>(),
        ),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Read `json` as a host value of type `ty`.
pub fn json_to_host(types: &dyn TypeSystem, ty: Itype, json: &Value) -> RtResult<HostValue> {
    let kind = types.kind(ty).ok_or(RuntimeError::UnknownType(ty))?;
    let mismatch = || RuntimeError::mismatch(kind_label(kind), json_kind(json));
    Ok(match (kind, json) {
        (TypeKind::Unit, Value::Null) => HostValue::Unit,
        (TypeKind::Bool, Value::Bool(b)) => HostValue::Bool(*b),
        (TypeKind::Int, Value::Number(n)) => HostValue::Int(n.as_i64().ok_or_else(mismatch)?),
        (TypeKind::Double, Value::Number(n)) => {
            HostValue::Double(n.as_f64().ok_or_else(mismatch)?)
        }
        (TypeKind::TypeId, Value::Number(n)) => HostValue::TypeId(
            n.as_u64()
                .and_then(|t| Itype::try_from(t).ok())
                .ok_or_else(mismatch)?,
        ),
        (TypeKind::String, Value::String(s)) => HostValue::str(s),
        (TypeKind::Vector { elem, .. }, Value::Array(items)) => HostValue::Vector(
            items
                .iter()
                .map(|item| json_to_host(types, elem, item))
                .collect::<RtResult<Vec<_>>>()?
                .into(),
        ),
        (TypeKind::Map { value, .. }, Value::Object(entries)) => HostValue::Map(Arc::new(
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), json_to_host(types, value, v)?)))
                .collect::<RtResult<BTreeMap<_, _>>>()?,
        )),
        (TypeKind::Json, v) => HostValue::Json(Arc::new(v.clone())),
        (TypeKind::Struct, Value::Object(entries)) => {
            let layout = boxed::struct_layout(types, ty)?;
            let members = layout
                .members
                .iter()
                .map(|m| {
                    let v = entries
                        .get(&m.name)
                        .ok_or_else(|| RuntimeError::KeyNotFound(m.name.clone()))?;
                    Ok((m.name.clone(), json_to_host(types, m.ty, v)?))
                })
                .collect::<RtResult<Vec<_>>>()?;
            HostValue::Struct(members.into())
        }
        _ => return Err(mismatch()),
    })
}

/// JSON rendering of a borrowed runtime value.
pub fn value_to_json(types: &dyn TypeSystem, ty: Itype, cell: RawCell) -> RtResult<Value> {
    Ok(host_to_json(&super::from_runtime_value(types, ty, cell)?))
}

/// Owned runtime value of type `ty` read from `json`.
pub fn json_to_value(heap: &Arc<Heap>, ty: Itype, json: &Value) -> RtResult<RawCell> {
    let host = json_to_host(heap.types(), ty, json)?;
    super::to_runtime_value(heap, ty, &host)
}

/// Box any runtime value as a JSON heap object.
pub fn box_json_value(heap: &Arc<Heap>, ty: Itype, cell: RawCell) -> RtResult<AllocHandle> {
    if heap.types().kind(ty) == Some(TypeKind::Json) {
        let h = boxed::expect_json(cell)?;
        h.retain();
        return Ok(h);
    }
    let json = value_to_json(heap.types(), ty, cell)?;
    Ok(boxed::box_json(heap, json))
}

/// Read a boxed JSON object back as an owned value of type `ty`.
pub fn unbox_json(heap: &Arc<Heap>, ty: Itype, boxed_cell: RawCell) -> RtResult<RawCell> {
    let h = boxed::expect_json(boxed_cell)?;
    json_to_value(heap, ty, boxed::json_ref(h))
}
