//! # `extentkv`
//!
//! A small, single-file, embedded key→value store. `extentkv` persists a mapping from
//! arbitrary-length byte-string keys to arbitrary-length byte-string values in one regular file on
//! a local filesystem. It is embedded in a single process, reached through [`Store`], and is not a
//! network service.
//!
//! ## Architecture
//!
//! The store is built in three layers, leaves first:
//! * [`codec`] — positioned byte I/O and the fixed-layout record codec every on-disk structure
//!   rides on.
//! * [`extent`] — the block allocator: a linked chain of extent tables managing free/used byte
//!   ranges of the file.
//! * [`directory`] — the key directory: a linked chain of key tables plus the in-memory index,
//!   layered entirely on top of the allocator.
//!
//! [`store::Store`] ties these together: it owns the file handle, reads or creates the file
//! header, and bootstraps the allocator and directory on open.
//!
//! There is no internal locking. A `Store` is meant to be reached through one owning `&mut`
//! handle per process; concurrent access from multiple handles is undefined behavior and must be
//! mediated by the embedding application.

pub mod codec;
pub mod directory;
pub mod error;
pub mod extent;
pub mod store;

pub use error::{Error, Result};
pub use store::{Store, StoreStats};
