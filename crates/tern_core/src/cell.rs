//! The 8-byte runtime value cell.
//!
//! A cell carries no tag of its own: whether it holds a bool, an int, a
//! double, an itype or a heap pointer is decided by the type it is read at.
//! [`RawCell`] is the raw union exchanged with generated code; [`Cell`] is
//! the tagged form used by runtime logic once the type is known.

use crate::heap::{AllocHandle, AllocHeader};
use crate::types::{Itype, TypeKind};
use std::fmt;

#[repr(C)]
#[derive(Clone, Copy)]
pub union RawCell {
    bits: u64,
    int: i64,
    double: f64,
    ptr: *mut AllocHeader,
}

const _: () = assert!(std::mem::size_of::<RawCell>() == 8);

impl RawCell {
    pub const NULL: RawCell = RawCell { bits: 0 };

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        RawCell { bits }
    }

    #[inline]
    pub const fn from_bool(b: bool) -> Self {
        RawCell { bits: b as u64 }
    }

    #[inline]
    pub const fn from_int(i: i64) -> Self {
        RawCell { int: i }
    }

    #[inline]
    pub const fn from_double(d: f64) -> Self {
        RawCell { double: d }
    }

    #[inline]
    pub const fn from_itype(ty: Itype) -> Self {
        RawCell { bits: ty as u64 }
    }

    #[inline]
    pub fn from_handle(handle: AllocHandle) -> Self {
        RawCell {
            ptr: handle.as_ptr(),
        }
    }

    #[inline]
    pub fn bits(self) -> u64 {
        unsafe { self.bits }
    }

    /// Generated code may leave the upper bytes of a bool undefined.
    #[inline]
    pub fn as_bool(self) -> bool {
        self.bits() & 0xff != 0
    }

    #[inline]
    pub fn as_int(self) -> i64 {
        unsafe { self.int }
    }

    #[inline]
    pub fn as_double(self) -> f64 {
        unsafe { self.double }
    }

    #[inline]
    pub fn as_itype(self) -> Itype {
        self.bits() as Itype
    }

    #[inline]
    pub fn as_ptr(self) -> *mut AllocHeader {
        unsafe { self.ptr }
    }

    /// Reinterpret as a heap pointer.
    ///
    /// Only meaningful when the cell was read at a heap-backed type.
    #[inline]
    pub fn as_handle(self) -> Option<AllocHandle> {
        unsafe { AllocHandle::from_raw(self.ptr) }
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.bits() == 0
    }
}

impl Default for RawCell {
    fn default() -> Self {
        RawCell::NULL
    }
}

impl PartialEq for RawCell {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for RawCell {}

impl fmt::Debug for RawCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawCell({:#018x})", self.bits())
    }
}

/// A cell decoded at a known type.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Cell {
    Unit,
    Bool(bool),
    Int(i64),
    Double(f64),
    TypeId(Itype),
    /// Heap-backed value; `None` only for the null sentinel.
    Ref(Option<AllocHandle>),
}

impl Cell {
    pub fn decode(kind: TypeKind, raw: RawCell) -> Cell {
        match kind {
            TypeKind::Unit => Cell::Unit,
            TypeKind::Bool => Cell::Bool(raw.as_bool()),
            TypeKind::Int => Cell::Int(raw.as_int()),
            TypeKind::Double => Cell::Double(raw.as_double()),
            TypeKind::TypeId => Cell::TypeId(raw.as_itype()),
            TypeKind::String
            | TypeKind::Vector { .. }
            | TypeKind::Map { .. }
            | TypeKind::Json
            | TypeKind::Struct => Cell::Ref(raw.as_handle()),
        }
    }

    pub fn encode(self) -> RawCell {
        match self {
            Cell::Unit => RawCell::NULL,
            Cell::Bool(b) => RawCell::from_bool(b),
            Cell::Int(i) => RawCell::from_int(i),
            Cell::Double(d) => RawCell::from_double(d),
            Cell::TypeId(t) => RawCell::from_itype(t),
            Cell::Ref(Some(h)) => RawCell::from_handle(h),
            Cell::Ref(None) => RawCell::NULL,
        }
    }

    pub fn handle(self) -> Option<AllocHandle> {
        match self {
            Cell::Ref(h) => h,
            _ => None,
        }
    }
}
