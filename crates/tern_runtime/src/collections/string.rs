//! Strings: the flat layout specialized to byte-packed cells.
//!
//! Slot 0 holds the byte length and slot 1 the capacity in words; bytes are
//! packed eight per word. Like flat vectors, every edit builds a new string.

use super::{check_index, check_range, expect_magic};
use crate::errors::{RtResult, RuntimeError, messages::NOT_A_STRING};
use std::sync::Arc;
use tern_core::bytes::{self, packed_words};
use tern_core::heap::MAGIC_STRING;
use tern_core::{AllocHandle, Heap, RawCell};

const SLOT_LEN: usize = 0;
const SLOT_CAP: usize = 1;

pub fn alloc_str(heap: &Arc<Heap>, data: &[u8]) -> AllocHandle {
    alloc_with_capacity(heap, data, data.len())
}

pub fn alloc_with_capacity(heap: &Arc<Heap>, data: &[u8], capacity: usize) -> AllocHandle {
    let cap_words = packed_words(capacity.max(data.len()));
    let s = heap.allocate(cap_words, MAGIC_STRING, "string");
    bytes::write_packed(unsafe { s.words_slice_mut() }, 0, data);
    s.set_slot(SLOT_LEN, data.len() as u64);
    s.set_slot(SLOT_CAP, cap_words as u64);
    s
}

pub fn expect_string(cell: RawCell) -> RtResult<AllocHandle> {
    expect_magic(cell, MAGIC_STRING, NOT_A_STRING)
}

#[inline]
pub fn len(s: AllocHandle) -> usize {
    s.slot(SLOT_LEN) as usize
}

pub fn to_bytes(s: AllocHandle) -> Vec<u8> {
    bytes::unpack_bytes(unsafe { s.words_slice() }, len(s))
}

pub fn to_string(s: AllocHandle) -> RtResult<String> {
    String::from_utf8(to_bytes(s)).map_err(|_| RuntimeError::InvalidUtf8)
}

pub fn byte_at(s: AllocHandle, index: i64) -> RtResult<u8> {
    let i = check_index(index, len(s))?;
    Ok(bytes::byte_at(unsafe { s.words_slice() }, i))
}

pub fn equals(a: AllocHandle, b: AllocHandle) -> bool {
    a == b || (len(a) == len(b) && to_bytes(a) == to_bytes(b))
}

pub fn concat(a: AllocHandle, b: AllocHandle) -> AllocHandle {
    let mut out = to_bytes(a);
    out.extend_from_slice(&to_bytes(b));
    alloc_str(&a.heap_arc(), &out)
}

pub fn subset(s: AllocHandle, start: i64, end: i64) -> RtResult<AllocHandle> {
    let (start, end) = check_range(start, end, len(s))?;
    let data = to_bytes(s);
    Ok(alloc_str(&s.heap_arc(), &data[start..end]))
}

pub fn replace_range(s: AllocHandle, start: i64, end: i64, with: AllocHandle) -> RtResult<AllocHandle> {
    let (start, end) = check_range(start, end, len(s))?;
    let mut data = to_bytes(s);
    data.splice(start..end, to_bytes(with));
    Ok(alloc_str(&s.heap_arc(), &data))
}

pub fn push_byte(s: AllocHandle, byte: u8) -> AllocHandle {
    let mut data = to_bytes(s);
    data.push(byte);
    alloc_str(&s.heap_arc(), &data)
}

/// # Safety
/// RC must be 0 and `s` unused afterwards.
pub(crate) unsafe fn dispose(s: AllocHandle) {
    assert_eq!(s.magic(), MAGIC_STRING, "disposing {:?} as a string", s);
    unsafe { Heap::free(s) };
}
