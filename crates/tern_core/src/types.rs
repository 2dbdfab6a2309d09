//! Type facts consumed from the type system.
//!
//! The runtime never inspects stored bytes to decide what a value is. Every
//! decision (is it heap-backed, where do struct members live, which backend
//! does a vector use) goes through a [`TypeSystem`] lookup keyed by an
//! [`Itype`].

use ahash::RandomState;
use hashbrown::HashMap;
use std::hash::Hash;

/// Stable integer handle for a semantic type.
pub type Itype = u32;

pub type FastHashMap<K, V> = HashMap<K, V, RandomState>;

pub fn fast_hasher() -> RandomState {
    RandomState::with_seeds(0, 0, 0, 0)
}

pub fn fast_map_new<K: Eq + Hash, V>() -> FastHashMap<K, V> {
    HashMap::with_hasher(fast_hasher())
}

/// Collection backend of a vector or map type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Contiguous cells, copied on every mutation.
    Flat,
    /// Structurally shared tree.
    Persistent,
}

impl Default for Backend {
    #[cfg(not(feature = "persistent-collections"))]
    fn default() -> Self {
        Backend::Flat
    }

    #[cfg(feature = "persistent-collections")]
    fn default() -> Self {
        Backend::Persistent
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Unit,
    Bool,
    Int,
    Double,
    /// An itype carried as a value.
    TypeId,
    String,
    Vector { elem: Itype, backend: Backend },
    Map { value: Itype, backend: Backend },
    Json,
    Struct,
}

impl TypeKind {
    /// Whether a cell of this kind holds a pointer to a heap allocation.
    pub fn is_heap_backed(&self) -> bool {
        matches!(
            self,
            TypeKind::String
                | TypeKind::Vector { .. }
                | TypeKind::Map { .. }
                | TypeKind::Json
                | TypeKind::Struct
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberInfo {
    pub name: String,
    pub ty: Itype,
    /// Byte offset of the member's 8-byte cell inside the struct region.
    pub offset: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructLayout {
    pub name: String,
    /// Size of the byte region in bytes, a multiple of 8.
    pub size: u32,
    pub members: Vec<MemberInfo>,
}

impl StructLayout {
    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }

    /// Panics unless every member cell is 8-byte aligned and lies inside
    /// the `size`-byte region.
    pub fn assert_well_formed(&self) {
        for m in &self.members {
            assert!(
                m.offset % 8 == 0 && u64::from(m.offset) + 8 <= u64::from(self.size),
                "malformed layout for struct {}: member {} at offset {} in a {}-byte region",
                self.name,
                m.name,
                m.offset,
                self.size
            );
        }
    }
}

/// Lookup interface onto the external type system.
pub trait TypeSystem: Send + Sync {
    fn kind(&self, ty: Itype) -> Option<TypeKind>;

    fn struct_layout(&self, ty: Itype) -> Option<&StructLayout>;

    fn name(&self, ty: Itype) -> String;

    fn is_heap_backed(&self, ty: Itype) -> bool {
        self.kind(ty).is_some_and(|k| k.is_heap_backed())
    }

    fn element_type(&self, ty: Itype) -> Option<Itype> {
        match self.kind(ty)? {
            TypeKind::Vector { elem, .. } => Some(elem),
            _ => None,
        }
    }

    fn value_type(&self, ty: Itype) -> Option<Itype> {
        match self.kind(ty)? {
            TypeKind::Map { value, .. } => Some(value),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
struct TypeEntry {
    kind: TypeKind,
    layout: Option<StructLayout>,
}

/// Interning type registry populated by the host.
///
/// Structurally equal kinds map to the same itype; structs are interned by
/// name.
#[derive(Clone, Debug)]
pub struct TypeTable {
    entries: Vec<TypeEntry>,
    interned: FastHashMap<TypeKind, Itype>,
    structs: FastHashMap<String, Itype>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            interned: fast_map_new(),
            structs: fast_map_new(),
        }
    }

    pub fn intern(&mut self, kind: TypeKind) -> Itype {
        assert!(
            kind != TypeKind::Struct,
            "struct types are registered through struct_type"
        );
        if let Some(&ty) = self.interned.get(&kind) {
            return ty;
        }
        let ty = self.push(TypeEntry { kind, layout: None });
        self.interned.insert(kind, ty);
        ty
    }

    fn push(&mut self, entry: TypeEntry) -> Itype {
        let ty = self.entries.len() as Itype;
        self.entries.push(entry);
        ty
    }

    pub fn unit(&mut self) -> Itype {
        self.intern(TypeKind::Unit)
    }

    pub fn bool(&mut self) -> Itype {
        self.intern(TypeKind::Bool)
    }

    pub fn int(&mut self) -> Itype {
        self.intern(TypeKind::Int)
    }

    pub fn double(&mut self) -> Itype {
        self.intern(TypeKind::Double)
    }

    pub fn type_id(&mut self) -> Itype {
        self.intern(TypeKind::TypeId)
    }

    pub fn string(&mut self) -> Itype {
        self.intern(TypeKind::String)
    }

    pub fn json(&mut self) -> Itype {
        self.intern(TypeKind::Json)
    }

    pub fn vector_of(&mut self, elem: Itype) -> Itype {
        self.vector_with(elem, Backend::default())
    }

    pub fn vector_with(&mut self, elem: Itype, backend: Backend) -> Itype {
        self.intern(TypeKind::Vector { elem, backend })
    }

    pub fn map_of(&mut self, value: Itype) -> Itype {
        self.map_with(value, Backend::default())
    }

    pub fn map_with(&mut self, value: Itype, backend: Backend) -> Itype {
        self.intern(TypeKind::Map { value, backend })
    }

    /// Register a struct, one 8-byte cell per member in declaration order.
    pub fn struct_type(&mut self, name: &str, members: &[(&str, Itype)]) -> Itype {
        if let Some(&ty) = self.structs.get(name) {
            return ty;
        }
        let members: Vec<MemberInfo> = members
            .iter()
            .enumerate()
            .map(|(i, (member, ty))| MemberInfo {
                name: (*member).to_string(),
                ty: *ty,
                offset: (i * 8) as u32,
            })
            .collect();
        let layout = StructLayout {
            name: name.to_string(),
            size: (members.len() * 8) as u32,
            members,
        };
        let ty = self.push(TypeEntry {
            kind: TypeKind::Struct,
            layout: Some(layout),
        });
        self.structs.insert(name.to_string(), ty);
        ty
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TypeSystem for TypeTable {
    fn kind(&self, ty: Itype) -> Option<TypeKind> {
        self.entries.get(ty as usize).map(|e| e.kind)
    }

    fn struct_layout(&self, ty: Itype) -> Option<&StructLayout> {
        self.entries.get(ty as usize)?.layout.as_ref()
    }

    fn name(&self, ty: Itype) -> String {
        let Some(entry) = self.entries.get(ty as usize) else {
            return format!("<unknown type {ty}>");
        };
        match entry.kind {
            TypeKind::Unit => "unit".into(),
            TypeKind::Bool => "bool".into(),
            TypeKind::Int => "int".into(),
            TypeKind::Double => "double".into(),
            TypeKind::TypeId => "type".into(),
            TypeKind::String => "string".into(),
            TypeKind::Json => "json".into(),
            TypeKind::Vector { elem, .. } => format!("[{}]", self.name(elem)),
            TypeKind::Map { value, .. } => format!("{{string: {}}}", self.name(value)),
            TypeKind::Struct => entry
                .layout
                .as_ref()
                .map(|l| l.name.clone())
                .unwrap_or_else(|| "struct".into()),
        }
    }
}
