//! Tern runtime: collections, ownership, host interop and actors.

#![allow(clippy::new_without_default)]
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::collapsible_if)]

pub mod actor;
pub mod collections;
pub mod config;
pub mod errors;
pub mod ffi;
pub mod host;
pub mod ownership;
pub mod symbols;

pub use actor::{ActorSystem, ProcessDecl, ProcessOutcome, ProcessState, Sender, Topology};
pub use collections::higher_order::{Callback, FoldFn, MapFn};
pub use config::RuntimeConfig;
pub use errors::{RtResult, RuntimeError};
pub use host::{HostValue, from_runtime_value, to_runtime_value};
pub use ownership::{OwnedValue, default_value, release_deep, retain_value};
pub use symbols::{Signature, SymbolTable, run_main};
pub use tern_core::{Backend, Cell, Heap, Itype, RawCell, TypeKind, TypeSystem, TypeTable};
