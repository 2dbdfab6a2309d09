//! Symbol binding between the host, compiled code and the runtime.
//!
//! Compiled entry points are registered by name together with the
//! signature the compiler gave them. Every lookup that leads to a call
//! checks that signature first; a mismatch is reported before any compiled
//! code runs.

use crate::collections::{string, vector};
use crate::errors::{RtResult, RuntimeError};
use crate::ffi;
use crate::ownership::release_deep;
use indexmap::IndexMap;
use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::sync::Arc;
use tern_core::types::{FastHashMap, fast_map_new};
use tern_core::{Heap, Itype, RawCell, TypeKind, TypeSystem};

/// `() -> int | unit`
pub type MainFn = unsafe extern "C-unwind" fn() -> RawCell;
/// `([string]) -> int | unit`
pub type MainArgsFn = unsafe extern "C-unwind" fn(RawCell) -> RawCell;
/// `(context) -> state`
pub type InitFn = unsafe extern "C-unwind" fn(*mut c_void) -> RawCell;
/// `(context, state, message) -> state`
pub type HandlerFn = unsafe extern "C-unwind" fn(*mut c_void, RawCell, RawCell) -> RawCell;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: Vec<Itype>,
    pub ret: Itype,
}

impl Signature {
    pub fn new(params: impl Into<Vec<Itype>>, ret: Itype) -> Self {
        Self {
            params: params.into(),
            ret,
        }
    }

    pub fn render(&self, types: &dyn TypeSystem) -> String {
        let params: Vec<String> = self.params.iter().map(|&p| types.name(p)).collect();
        format!("fn({}) -> {}", params.join(", "), types.name(self.ret))
    }
}

#[derive(Clone, Debug)]
struct FunctionEntry {
    address: usize,
    /// `None` for runtime entry points, whose C signatures have no itype.
    signature: Option<Signature>,
}

struct GlobalEntry {
    ty: Itype,
    cell: Box<UnsafeCell<RawCell>>,
}

pub struct SymbolTable {
    functions: FastHashMap<String, FunctionEntry>,
    globals: IndexMap<String, GlobalEntry>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            functions: fast_map_new(),
            globals: IndexMap::new(),
        }
    }

    /// A table that already resolves every `tern_*` runtime entry point.
    pub fn with_runtime_entry_points() -> Self {
        let mut table = Self::new();
        for (name, address) in ffi::entry_points() {
            table.functions.insert(
                name.to_string(),
                FunctionEntry {
                    address: address as usize,
                    signature: None,
                },
            );
        }
        table
    }

    /// # Safety
    /// `address` must be a function with the calling convention implied by
    /// `signature` and must stay valid for as long as the table is used.
    pub unsafe fn register_function(
        &mut self,
        name: &str,
        address: *const c_void,
        signature: Signature,
    ) {
        assert!(!address.is_null(), "null address registered for {name}");
        self.functions.insert(
            name.to_string(),
            FunctionEntry {
                address: address as usize,
                signature: Some(signature),
            },
        );
    }

    pub fn bind_function(&self, name: &str) -> Option<*const c_void> {
        self.functions
            .get(name)
            .map(|f| f.address as *const c_void)
    }

    pub fn signature(&self, name: &str) -> Option<&Signature> {
        self.functions.get(name)?.signature.as_ref()
    }

    /// Bind `name`, requiring one of `accepted` signatures.
    pub fn resolve(
        &self,
        types: &dyn TypeSystem,
        name: &str,
        accepted: &[Signature],
    ) -> RtResult<(*const c_void, Signature)> {
        let expected = accepted
            .iter()
            .map(|s| s.render(types))
            .collect::<Vec<_>>()
            .join(" or ");
        self.resolve_with(types, name, &expected, |s| accepted.contains(s))
    }

    /// Bind `name`, requiring its signature to satisfy `check`.
    pub fn resolve_with(
        &self,
        types: &dyn TypeSystem,
        name: &str,
        expected: &str,
        check: impl Fn(&Signature) -> bool,
    ) -> RtResult<(*const c_void, Signature)> {
        let entry = self
            .functions
            .get(name)
            .ok_or_else(|| RuntimeError::UnknownSymbol(name.to_string()))?;
        let mismatch = |found: String| RuntimeError::SignatureMismatch {
            symbol: name.to_string(),
            expected: expected.to_string(),
            found,
        };
        match &entry.signature {
            Some(found) if check(found) => Ok((entry.address as *const c_void, found.clone())),
            Some(found) => Err(mismatch(found.render(types))),
            None => Err(mismatch("runtime entry point".to_string())),
        }
    }

    /// Define a global holding the owned `value`. A previous value under the
    /// same name is released.
    pub fn define_global(&mut self, types: &dyn TypeSystem, name: &str, ty: Itype, value: RawCell) {
        let entry = GlobalEntry {
            ty,
            cell: Box::new(UnsafeCell::new(value)),
        };
        if let Some(old) = self.globals.insert(name.to_string(), entry) {
            release_deep(types, old.ty, old.cell.into_inner());
        }
    }

    /// Stable address of a global's cell, valid until `release_globals`.
    pub fn bind_global(&self, name: &str) -> Option<*mut RawCell> {
        self.globals.get(name).map(|g| g.cell.get())
    }

    pub fn global_type(&self, name: &str) -> Option<Itype> {
        self.globals.get(name).map(|g| g.ty)
    }

    /// Release every global in reverse definition order.
    pub fn release_globals(&mut self, types: &dyn TypeSystem) {
        while let Some((_, g)) = self.globals.pop() {
            release_deep(types, g.ty, g.cell.into_inner());
        }
    }
}

/// Run the program's `main` on `heap` and return its exit value.
///
/// `main` takes no parameters or one `[string]`, and returns `int` or `unit`
/// (read as 0). `args` is only passed to the second form.
pub fn run_main(heap: &Arc<Heap>, symbols: &SymbolTable, args: Option<&[&str]>) -> RtResult<i64> {
    let types = heap.types();
    let is_argv = |ty: Itype| {
        types
            .element_type(ty)
            .is_some_and(|elem| types.kind(elem) == Some(TypeKind::String))
    };
    let (address, signature) = symbols.resolve_with(
        types,
        "main",
        "fn() -> int|unit or fn([string]) -> int|unit",
        |s| {
            matches!(types.kind(s.ret), Some(TypeKind::Int | TypeKind::Unit))
                && match s.params.as_slice() {
                    [] => true,
                    [argv] => is_argv(*argv),
                    _ => false,
                }
        },
    )?;

    let _guard = Heap::enter(heap);
    let result = match signature.params.first() {
        None => {
            let main: MainFn = unsafe { std::mem::transmute(address) };
            unsafe { main() }
        }
        Some(&argv_ty) => {
            let cells: Vec<RawCell> = args
                .unwrap_or_default()
                .iter()
                .map(|a| RawCell::from_handle(string::alloc_str(heap, a.as_bytes())))
                .collect();
            let argv = RawCell::from_handle(vector::from_cells(heap, argv_ty, cells)?);
            let main: MainArgsFn = unsafe { std::mem::transmute(address) };
            let result = unsafe { main(argv) };
            release_deep(types, argv_ty, argv);
            result
        }
    };
    Ok(match types.kind(signature.ret) {
        Some(TypeKind::Int) => result.as_int(),
        _ => 0,
    })
}
