//! String-keyed maps.
//!
//! Two backends satisfy [`MapBackend`]: an insertion-ordered table copied
//! on every edit, and a persistent hash trie whose edits share untouched
//! nodes. Slot 0 points at the backing structure and slot 1 caches the
//! entry count.

use super::{ElemInfo, Slot, expect_magic};
use crate::errors::{RtResult, RuntimeError, messages::NOT_A_MAP};
use ahash::RandomState;
use indexmap::IndexMap;
use std::sync::Arc;
use tern_core::heap::{MAGIC_TABLE, MAGIC_TRIE};
use tern_core::types::fast_hasher;
use tern_core::{AllocHandle, Backend, Heap, Itype, RawCell, TypeKind, TypeSystem};

pub type Key = Arc<str>;

const SLOT_DATA: usize = 0;
const SLOT_LEN: usize = 1;

pub trait MapBackend {
    const MAGIC: u32;

    fn alloc(heap: &Arc<Heap>, value: ElemInfo, capacity: usize) -> AllocHandle;

    /// Build a map owning `entries`; a later duplicate key replaces an
    /// earlier one and the replaced value is released.
    fn from_entries(heap: &Arc<Heap>, value: ElemInfo, entries: Vec<(Key, RawCell)>)
    -> AllocHandle;

    fn len(m: AllocHandle) -> usize;

    fn get(m: AllocHandle, key: &str) -> Option<RawCell>;

    /// Borrowed snapshot in iteration order.
    fn entries(m: AllocHandle) -> Vec<(Key, RawCell)>;

    fn set(value: ElemInfo, m: AllocHandle, key: Key, cell: RawCell) -> AllocHandle;

    fn remove(value: ElemInfo, m: AllocHandle, key: &str) -> AllocHandle;

    /// Union of both maps; `b` wins on equal keys.
    fn concat(value: ElemInfo, a: AllocHandle, b: AllocHandle) -> AllocHandle;

    /// The entries of `m` whose key is in `keys`.
    fn subset(value: ElemInfo, m: AllocHandle, keys: &[Key]) -> AllocHandle;

    /// # Safety
    /// RC must be 0 and `m` unused afterwards.
    unsafe fn dispose(types: &dyn TypeSystem, value: ElemInfo, m: AllocHandle);
}

// ---------------------------------------------------------------------------
// Ordered table
// ---------------------------------------------------------------------------

type Table = IndexMap<Key, RawCell, RandomState>;

pub struct TableMap;

impl TableMap {
    fn table<'a>(m: AllocHandle) -> &'a Table {
        unsafe { &*(m.slot(SLOT_DATA) as *const Table) }
    }

    fn wrap(heap: &Arc<Heap>, table: Table) -> AllocHandle {
        let len = table.len();
        let m = heap.allocate(0, MAGIC_TABLE, "table");
        m.set_slot(SLOT_DATA, Box::into_raw(Box::new(table)) as u64);
        m.set_slot(SLOT_LEN, len as u64);
        m
    }

    fn copy_retained(heap: &Arc<Heap>, value: ElemInfo, table: Table) -> AllocHandle {
        for c in table.values() {
            value.retain(*c);
        }
        Self::wrap(heap, table)
    }
}

impl MapBackend for TableMap {
    const MAGIC: u32 = MAGIC_TABLE;

    fn alloc(heap: &Arc<Heap>, _value: ElemInfo, capacity: usize) -> AllocHandle {
        Self::wrap(heap, Table::with_capacity_and_hasher(capacity, fast_hasher()))
    }

    fn from_entries(
        heap: &Arc<Heap>,
        value: ElemInfo,
        entries: Vec<(Key, RawCell)>,
    ) -> AllocHandle {
        let mut table = Table::with_capacity_and_hasher(entries.len(), fast_hasher());
        for (k, c) in entries {
            if let Some(old) = table.insert(k, c) {
                value.release(heap.types(), old);
            }
        }
        Self::wrap(heap, table)
    }

    #[inline]
    fn len(m: AllocHandle) -> usize {
        m.slot(SLOT_LEN) as usize
    }

    fn get(m: AllocHandle, key: &str) -> Option<RawCell> {
        Self::table(m).get(key).copied()
    }

    fn entries(m: AllocHandle) -> Vec<(Key, RawCell)> {
        Self::table(m)
            .iter()
            .map(|(k, c)| (Arc::clone(k), *c))
            .collect()
    }

    fn set(value: ElemInfo, m: AllocHandle, key: Key, cell: RawCell) -> AllocHandle {
        let mut table = Self::table(m).clone();
        table.insert(key, cell);
        Self::copy_retained(&m.heap_arc(), value, table)
    }

    fn remove(value: ElemInfo, m: AllocHandle, key: &str) -> AllocHandle {
        let mut table = Self::table(m).clone();
        table.shift_remove(key);
        Self::copy_retained(&m.heap_arc(), value, table)
    }

    fn concat(value: ElemInfo, a: AllocHandle, b: AllocHandle) -> AllocHandle {
        let mut table = Self::table(a).clone();
        for (k, c) in Self::table(b) {
            table.insert(Arc::clone(k), *c);
        }
        Self::copy_retained(&a.heap_arc(), value, table)
    }

    fn subset(value: ElemInfo, m: AllocHandle, keys: &[Key]) -> AllocHandle {
        let src = Self::table(m);
        let mut table = Table::with_capacity_and_hasher(keys.len(), fast_hasher());
        for k in keys {
            if let Some(c) = src.get(&**k) {
                table.insert(Arc::clone(k), *c);
            }
        }
        Self::copy_retained(&m.heap_arc(), value, table)
    }

    unsafe fn dispose(types: &dyn TypeSystem, value: ElemInfo, m: AllocHandle) {
        let table = unsafe { Box::from_raw(m.slot(SLOT_DATA) as *mut Table) };
        if value.heap_backed {
            for c in table.values() {
                value.release(types, *c);
            }
        }
        drop(table);
        unsafe { Heap::free(m) };
    }
}

// ---------------------------------------------------------------------------
// Persistent trie map
// ---------------------------------------------------------------------------

type Trie = imbl::GenericHashMap<Key, Slot, RandomState, imbl::shared_ptr::DefaultSharedPtr>;

pub struct TrieMap;

impl TrieMap {
    fn trie<'a>(m: AllocHandle) -> &'a Trie {
        unsafe { &*(m.slot(SLOT_DATA) as *const Trie) }
    }

    fn wrap(heap: &Arc<Heap>, trie: Trie) -> AllocHandle {
        let len = trie.len();
        let m = heap.allocate(0, MAGIC_TRIE, "trie");
        m.set_slot(SLOT_DATA, Box::into_raw(Box::new(trie)) as u64);
        m.set_slot(SLOT_LEN, len as u64);
        m
    }
}

impl MapBackend for TrieMap {
    const MAGIC: u32 = MAGIC_TRIE;

    fn alloc(heap: &Arc<Heap>, _value: ElemInfo, _capacity: usize) -> AllocHandle {
        Self::wrap(heap, Trie::with_hasher(fast_hasher()))
    }

    fn from_entries(
        heap: &Arc<Heap>,
        value: ElemInfo,
        entries: Vec<(Key, RawCell)>,
    ) -> AllocHandle {
        let mut trie = Trie::with_hasher(fast_hasher());
        for (k, c) in entries {
            // A replaced slot releases its value on drop.
            trie.insert(k, Slot::adopt(value, c));
        }
        Self::wrap(heap, trie)
    }

    #[inline]
    fn len(m: AllocHandle) -> usize {
        m.slot(SLOT_LEN) as usize
    }

    fn get(m: AllocHandle, key: &str) -> Option<RawCell> {
        Self::trie(m).get(key).map(|s| s.cell)
    }

    fn entries(m: AllocHandle) -> Vec<(Key, RawCell)> {
        Self::trie(m)
            .iter()
            .map(|(k, s)| (Arc::clone(k), s.cell))
            .collect()
    }

    fn set(value: ElemInfo, m: AllocHandle, key: Key, cell: RawCell) -> AllocHandle {
        let trie = Self::trie(m).update(key, Slot::retained(value, cell));
        Self::wrap(&m.heap_arc(), trie)
    }

    fn remove(_value: ElemInfo, m: AllocHandle, key: &str) -> AllocHandle {
        let trie = Self::trie(m).without(key);
        Self::wrap(&m.heap_arc(), trie)
    }

    fn concat(_value: ElemInfo, a: AllocHandle, b: AllocHandle) -> AllocHandle {
        let mut trie = Self::trie(a).clone();
        for (k, s) in Self::trie(b).iter() {
            trie.insert(Arc::clone(k), s.clone());
        }
        Self::wrap(&a.heap_arc(), trie)
    }

    fn subset(_value: ElemInfo, m: AllocHandle, keys: &[Key]) -> AllocHandle {
        let src = Self::trie(m);
        let mut trie = Trie::with_hasher(fast_hasher());
        for k in keys {
            if let Some(s) = src.get(&**k) {
                trie.insert(Arc::clone(k), s.clone());
            }
        }
        Self::wrap(&m.heap_arc(), trie)
    }

    unsafe fn dispose(_types: &dyn TypeSystem, _value: ElemInfo, m: AllocHandle) {
        drop(unsafe { Box::from_raw(m.slot(SLOT_DATA) as *mut Trie) });
        unsafe { Heap::free(m) };
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

macro_rules! with_map_backend {
    ($backend:expr, $M:ident => $body:expr) => {
        match $backend {
            Backend::Flat => {
                type $M = TableMap;
                $body
            }
            Backend::Persistent => {
                type $M = TrieMap;
                $body
            }
        }
    };
}

pub fn map_info(types: &dyn TypeSystem, mty: Itype) -> RtResult<(ElemInfo, Backend)> {
    match types.kind(mty) {
        Some(TypeKind::Map { value, backend }) => Ok((ElemInfo::of(types, value), backend)),
        Some(_) => Err(RuntimeError::mismatch(NOT_A_MAP, types.name(mty))),
        None => Err(RuntimeError::UnknownType(mty)),
    }
}

fn magic_of(backend: Backend) -> u32 {
    with_map_backend!(backend, M => M::MAGIC)
}

fn open(
    types: &dyn TypeSystem,
    mty: Itype,
    m: RawCell,
) -> RtResult<(ElemInfo, Backend, AllocHandle)> {
    let (value, backend) = map_info(types, mty)?;
    let h = expect_magic(m, magic_of(backend), NOT_A_MAP)?;
    Ok((value, backend, h))
}

pub fn alloc(heap: &Arc<Heap>, mty: Itype, capacity: usize) -> RtResult<AllocHandle> {
    let (value, backend) = map_info(heap.types(), mty)?;
    Ok(with_map_backend!(backend, M => M::alloc(heap, value, capacity)))
}

pub fn from_entries(
    heap: &Arc<Heap>,
    mty: Itype,
    entries: Vec<(Key, RawCell)>,
) -> RtResult<AllocHandle> {
    let (value, backend) = map_info(heap.types(), mty)?;
    Ok(with_map_backend!(backend, M => M::from_entries(heap, value, entries)))
}

pub fn len(types: &dyn TypeSystem, mty: Itype, m: RawCell) -> RtResult<usize> {
    let (_, backend, h) = open(types, mty, m)?;
    Ok(with_map_backend!(backend, M => M::len(h)))
}

/// Borrowed value stored under `key`.
pub fn get(types: &dyn TypeSystem, mty: Itype, m: RawCell, key: &str) -> RtResult<RawCell> {
    let (_, backend, h) = open(types, mty, m)?;
    with_map_backend!(backend, M => M::get(h, key))
        .ok_or_else(|| RuntimeError::KeyNotFound(key.to_string()))
}

pub fn contains(types: &dyn TypeSystem, mty: Itype, m: RawCell, key: &str) -> RtResult<bool> {
    let (_, backend, h) = open(types, mty, m)?;
    Ok(with_map_backend!(backend, M => M::get(h, key)).is_some())
}

pub fn entries(types: &dyn TypeSystem, mty: Itype, m: RawCell) -> RtResult<Vec<(Key, RawCell)>> {
    let (_, backend, h) = open(types, mty, m)?;
    Ok(with_map_backend!(backend, M => M::entries(h)))
}

pub fn set(
    types: &dyn TypeSystem,
    mty: Itype,
    m: RawCell,
    key: &str,
    cell: RawCell,
) -> RtResult<AllocHandle> {
    let (value, backend, h) = open(types, mty, m)?;
    Ok(with_map_backend!(backend, M => M::set(value, h, Key::from(key), cell)))
}

pub fn remove(types: &dyn TypeSystem, mty: Itype, m: RawCell, key: &str) -> RtResult<AllocHandle> {
    let (value, backend, h) = open(types, mty, m)?;
    Ok(with_map_backend!(backend, M => M::remove(value, h, key)))
}

pub fn concat(types: &dyn TypeSystem, mty: Itype, a: RawCell, b: RawCell) -> RtResult<AllocHandle> {
    let (value, backend, ha) = open(types, mty, a)?;
    let (_, _, hb) = open(types, mty, b)?;
    Ok(with_map_backend!(backend, M => M::concat(value, ha, hb)))
}

pub fn subset(
    types: &dyn TypeSystem,
    mty: Itype,
    m: RawCell,
    keys: &[&str],
) -> RtResult<AllocHandle> {
    let (value, backend, h) = open(types, mty, m)?;
    let keys: Vec<Key> = keys.iter().map(|k| Key::from(*k)).collect();
    Ok(with_map_backend!(backend, M => M::subset(value, h, &keys)))
}

/// # Safety
/// `h` must have reached RC 0 and belong to `backend`.
pub(crate) unsafe fn dispose(
    types: &dyn TypeSystem,
    value: ElemInfo,
    backend: Backend,
    h: AllocHandle,
) {
    let expected = magic_of(backend);
    if h.magic() != expected {
        panic!(
            "disposing {:?} as a {:?} map, header magic {:#x}",
            h,
            backend,
            h.magic()
        );
    }
    with_map_backend!(backend, M => unsafe { M::dispose(types, value, h) })
}
