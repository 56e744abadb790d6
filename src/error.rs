//! The closed set of outcomes the storage engine can report.
//!
//! Every fallible function in this crate returns `Result<T, Error>`. There is no recovery inside
//! the B-Tree or cursor layers: a failure from a nested call is always propagated verbatim, after
//! releasing whatever pages the caller had pinned locally.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    NotFound(String),
    Duplicate(String),
    CellNo(String),
    PageNo(String),
    CorruptHeader(String),
    NoMem(String),
    CantMove(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::NotFound(msg) => write!(f, "not found: {}", msg),
            Error::Duplicate(msg) => write!(f, "duplicate key: {}", msg),
            Error::CellNo(msg) => write!(f, "invalid cell index: {}", msg),
            Error::PageNo(msg) => write!(f, "invalid page number: {}", msg),
            Error::CorruptHeader(msg) => write!(f, "corrupt file header: {}", msg),
            Error::NoMem(msg) => write!(f, "allocation failure: {}", msg),
            Error::CantMove(msg) => write!(f, "cursor can't move: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

/// Builds an `Error` variant from a format string, matching the call-site grammar used
/// throughout this crate: `err!(Variant, "message {}", arg)`.
macro_rules! err {
    ($variant:ident, $($arg:tt)*) => {
        $crate::error::Error::$variant(format!($($arg)*))
    };
}

pub(crate) use err;
