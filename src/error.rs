//! # Error hierarchy
//!
//! A single `thiserror`-derived enum covering everything a `Store` operation can fail with.
//! Matches the idiom used throughout this crate's ancestry: each subsystem gets a flat error
//! enum with a `#[error(...)]` message per variant, and an `impl From<std::io::Error>` so `?`
//! composes naturally with positioned I/O.

use std::fmt;

/// Errors produced by any `extentkv` operation.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A positioned read, write, or file-length query failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `get`/`del` looked up a key that is not present in the index.
    #[error("key not found")]
    NotFound,

    /// On open, a key entry referenced an extent offset that does not exist, or an on-disk
    /// record decoded to an impossible value. The store should not be used further.
    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    /// An internal invariant was violated (e.g. an attempt to read a free extent, or a write of
    /// the wrong size into an extent). The operation that triggered this is the unit of retry.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Crate-local result alias, used internally the same way `STDRESULT`/`DYNERR` aliases are used
/// in sibling storage crates.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn corrupt(msg: impl fmt::Display) -> Self {
        Error::CorruptIndex(msg.to_string())
    }
    pub(crate) fn invariant(msg: impl fmt::Display) -> Self {
        Error::InvariantViolation(msg.to_string())
    }
}
