//! Core types for the Tern runtime.
//!
//! This crate contains the pieces every other runtime layer builds on:
//! - `Heap` / `AllocHandle` - atomically reference-counted allocations
//! - `RawCell` / `Cell` - the 8-byte value cell shared with compiled code
//! - `TypeSystem` / `TypeTable` - the layout facts the runtime consumes
//! - `bytes` - byte-packed string words

#![allow(clippy::new_without_default)]
#![allow(clippy::missing_safety_doc)]

pub mod bytes;
pub mod cell;
pub mod heap;
pub mod types;

pub use cell::{Cell, RawCell};
pub use heap::{AllocHandle, AllocHeader, Heap, HeapGuard, HeapStats, LeakRecord};
pub use types::{
    Backend, FastHashMap, Itype, MemberInfo, StructLayout, TypeKind, TypeSystem, TypeTable,
};
