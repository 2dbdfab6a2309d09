//! Runtime errors surfaced at the interop boundary.

use std::fmt;
use tern_core::Itype;

pub mod messages {
    pub const NOT_A_VECTOR: &str = "Not a vector";
    pub const NOT_A_MAP: &str = "Not a map";
    pub const NOT_A_STRING: &str = "Not a string";
    pub const NOT_A_STRUCT: &str = "Not a struct";
    pub const NOT_JSON: &str = "Not a json value";
    pub const INDEX_OUT_OF_BOUNDS: &str = "Index out of bounds";
    pub const KEY_NOT_FOUND: &str = "Key not found";
    pub const TYPE_MISMATCH: &str = "Type mismatch";
    pub const SIGNATURE_MISMATCH: &str = "Signature mismatch";
}

use messages::*;

#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeError {
    TypeMismatch { expected: &'static str, found: String },
    IndexOutOfBounds { index: i64, len: usize },
    KeyNotFound(String),
    UnknownType(Itype),
    UnknownMember { ty: String, member: String },
    LengthMismatch { elements: usize, parents: usize },
    InvalidParent { index: usize, parent: i64 },
    InvalidUtf8,
    UnknownSymbol(String),
    SignatureMismatch { symbol: String, expected: String, found: String },
    UnknownProcess(usize),
    ProcessPanicked { process: String, message: String },
}

pub type RtResult<T> = Result<T, RuntimeError>;

impl RuntimeError {
    pub fn mismatch(expected: &'static str, found: impl Into<String>) -> Self {
        RuntimeError::TypeMismatch {
            expected,
            found: found.into(),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::TypeMismatch { expected, found } => {
                write!(f, "{TYPE_MISMATCH}: {expected}, found {found}")
            }
            RuntimeError::IndexOutOfBounds { index, len } => {
                write!(f, "{INDEX_OUT_OF_BOUNDS}: index {index}, length {len}")
            }
            RuntimeError::KeyNotFound(key) => write!(f, "{KEY_NOT_FOUND}: {key:?}"),
            RuntimeError::UnknownType(ty) => write!(f, "Unknown type handle {ty}"),
            RuntimeError::UnknownMember { ty, member } => {
                write!(f, "Struct {ty} has no member {member:?}")
            }
            RuntimeError::LengthMismatch { elements, parents } => write!(
                f,
                "Elements and parents differ in length: {elements} vs {parents}"
            ),
            RuntimeError::InvalidParent { index, parent } => {
                write!(f, "Element {index} names invalid parent {parent}")
            }
            RuntimeError::InvalidUtf8 => write!(f, "String is not valid UTF-8"),
            RuntimeError::UnknownSymbol(name) => write!(f, "Unknown symbol {name:?}"),
            RuntimeError::SignatureMismatch {
                symbol,
                expected,
                found,
            } => write!(
                f,
                "{SIGNATURE_MISMATCH} for {symbol}: expected {expected}, found {found}"
            ),
            RuntimeError::UnknownProcess(pid) => write!(f, "Unknown process #{pid}"),
            RuntimeError::ProcessPanicked { process, message } => {
                write!(f, "Process {process} terminated abnormally: {message}")
            }
        }
    }
}

impl std::error::Error for RuntimeError {}
