#![allow(dead_code)]

use std::sync::Arc;
use tern_core::{Backend, Heap, Itype, RawCell, TypeSystem, TypeTable};
use tern_runtime::collections::{string, vector};

/// Itypes registered by [`fixture`], always in the same order.
#[derive(Clone, Copy, Debug)]
pub struct Ids {
    pub unit: Itype,
    pub bool: Itype,
    pub int: Itype,
    pub double: Itype,
    pub string: Itype,
    pub json: Itype,
    pub ints_flat: Itype,
    pub ints_tree: Itype,
    pub strings_flat: Itype,
    pub strings_tree: Itype,
    pub nested_flat: Itype,
    pub nested_tree: Itype,
    pub int_table: Itype,
    pub int_trie: Itype,
    pub string_table: Itype,
    pub string_trie: Itype,
    pub person: Itype,
    pub team: Itype,
}

impl Ids {
    pub fn ints(&self, backend: Backend) -> Itype {
        match backend {
            Backend::Flat => self.ints_flat,
            Backend::Persistent => self.ints_tree,
        }
    }

    pub fn strings(&self, backend: Backend) -> Itype {
        match backend {
            Backend::Flat => self.strings_flat,
            Backend::Persistent => self.strings_tree,
        }
    }

    pub fn string_map(&self, backend: Backend) -> Itype {
        match backend {
            Backend::Flat => self.string_table,
            Backend::Persistent => self.string_trie,
        }
    }

    pub fn int_map(&self, backend: Backend) -> Itype {
        match backend {
            Backend::Flat => self.int_table,
            Backend::Persistent => self.int_trie,
        }
    }
}

pub const BACKENDS: [Backend; 2] = [Backend::Flat, Backend::Persistent];

pub fn fixture() -> (Arc<Heap>, Ids) {
    let mut t = TypeTable::new();
    let unit = t.unit();
    let bool = t.bool();
    let int = t.int();
    let double = t.double();
    let string = t.string();
    let json = t.json();
    let ints_flat = t.vector_with(int, Backend::Flat);
    let ints_tree = t.vector_with(int, Backend::Persistent);
    let strings_flat = t.vector_with(string, Backend::Flat);
    let strings_tree = t.vector_with(string, Backend::Persistent);
    let nested_flat = t.vector_with(strings_flat, Backend::Flat);
    let nested_tree = t.vector_with(strings_tree, Backend::Persistent);
    let int_table = t.map_with(int, Backend::Flat);
    let int_trie = t.map_with(int, Backend::Persistent);
    let string_table = t.map_with(string, Backend::Flat);
    let string_trie = t.map_with(string, Backend::Persistent);
    let person = t.struct_type(
        "Person",
        &[("name", string), ("age", int), ("tags", strings_flat)],
    );
    let team = t.struct_type("Team", &[("lead", person), ("scores", int_table)]);
    let ids = Ids {
        unit,
        bool,
        int,
        double,
        string,
        json,
        ints_flat,
        ints_tree,
        strings_flat,
        strings_tree,
        nested_flat,
        nested_tree,
        int_table,
        int_trie,
        string_table,
        string_trie,
        person,
        team,
    };
    (Heap::new(Arc::new(t)), ids)
}

pub fn str_cell(heap: &Arc<Heap>, s: &str) -> RawCell {
    RawCell::from_handle(string::alloc_str(heap, s.as_bytes()))
}

pub fn read_str(cell: RawCell) -> String {
    string::to_string(string::expect_string(cell).unwrap()).unwrap()
}

pub fn ints(heap: &Arc<Heap>, vty: Itype, values: &[i64]) -> RawCell {
    let cells = values.iter().map(|&i| RawCell::from_int(i)).collect();
    RawCell::from_handle(vector::from_cells(heap, vty, cells).unwrap())
}

pub fn strings(heap: &Arc<Heap>, vty: Itype, values: &[&str]) -> RawCell {
    let cells = values.iter().map(|s| str_cell(heap, s)).collect();
    RawCell::from_handle(vector::from_cells(heap, vty, cells).unwrap())
}

pub fn read_ints(types: &dyn TypeSystem, vty: Itype, v: RawCell) -> Vec<i64> {
    vector::cells(types, vty, v)
        .unwrap()
        .into_iter()
        .map(|c| c.as_int())
        .collect()
}

pub fn read_strings(types: &dyn TypeSystem, vty: Itype, v: RawCell) -> Vec<String> {
    vector::cells(types, vty, v)
        .unwrap()
        .into_iter()
        .map(read_str)
        .collect()
}

pub fn assert_no_leaks(heap: &Heap) {
    let leaks = heap.leak_check();
    assert!(
        leaks.is_empty(),
        "leaked allocations:\n{}",
        leaks
            .iter()
            .map(|l| l.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    );
    assert_eq!(heap.stats().live, 0);
}
