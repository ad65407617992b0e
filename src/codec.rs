//! # Positioned byte I/O & fixed-layout codec
//!
//! Every on-disk structure in `extentkv` is a small packed, little-endian record read or written
//! at an absolute file offset. This module is the thin layer that turns those records into bytes
//! and back, on top of `positioned-io`'s `ReadAt`/`WriteAt` traits (the same positioned-I/O
//! abstraction used elsewhere in this lineage for working with on-disk structures without holding
//! a `&mut` file handle or a shared cursor).
//!
//! No buffering or caching is attempted here; a write past the current end of file is expected to
//! extend it with zero-filled bytes, which is exactly what `pwrite`-backed positioned writes give
//! us for free on a regular file.

use positioned_io::{ReadAt, WriteAt};

use crate::error::{Error, Result};

/// A fixed-size, packed, little-endian on-disk record.
///
/// Implementors must encode/decode exactly `SIZE` bytes; this is intentionally not a generic
/// derive (the record set is small and fixed, and a hand-written impl keeps the exact byte
/// layout next to the struct it belongs to).
pub trait Record: Sized {
    /// Encoded size in bytes. Must match `to_bytes().len()` exactly.
    const SIZE: usize;

    fn to_bytes(&self) -> Vec<u8>;
    fn from_bytes(buf: &[u8]) -> Self;
}

/// Read a fixed-layout record at `offset`.
pub fn read_record<T: Record, R: ReadAt>(reader: &R, offset: i64) -> Result<T> {
    let mut buf = vec![0u8; T::SIZE];
    reader
        .read_exact_at(offset as u64, &mut buf)
        .map_err(Error::Io)?;
    Ok(T::from_bytes(&buf))
}

/// Write a fixed-layout record at `offset`, extending the file with zeros if `offset` is beyond
/// the current end of file.
pub fn write_record<T: Record, W: WriteAt>(writer: &W, offset: i64, rec: &T) -> Result<()> {
    let buf = rec.to_bytes();
    debug_assert_eq!(buf.len(), T::SIZE);
    writer.write_all_at(offset as u64, &buf).map_err(Error::Io)?;
    Ok(())
}

/// Write `len` zero bytes at `offset`. Used to reserve a fresh extent's payload region when it is
/// carved out of the end of the file.
pub fn write_zeros<W: WriteAt>(writer: &W, offset: i64, len: i64) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    let zeros = vec![0u8; len as usize];
    writer.write_all_at(offset as u64, &zeros).map_err(Error::Io)?;
    Ok(())
}

/// Write an arbitrary byte slice at `offset` (key bytes, value bytes, ...).
pub fn write_bytes<W: WriteAt>(writer: &W, offset: i64, data: &[u8]) -> Result<()> {
    writer.write_all_at(offset as u64, data).map_err(Error::Io)?;
    Ok(())
}

/// Read exactly `len` bytes at `offset`.
pub fn read_bytes<R: ReadAt>(reader: &R, offset: i64, len: i64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact_at(offset as u64, &mut buf)
        .map_err(Error::Io)?;
    Ok(buf)
}

fn read_i64(buf: &[u8]) -> i64 {
    i64::from_le_bytes(buf.try_into().expect("8 byte slice"))
}

/// Splits off 8 bytes from the front of `buf` and parses them as an `i64`.
pub(crate) fn take_i64(buf: &mut &[u8]) -> i64 {
    let (head, tail) = buf.split_at(8);
    *buf = tail;
    read_i64(head)
}

/// Splits off 1 byte from the front of `buf`.
pub(crate) fn take_u8(buf: &mut &[u8]) -> u8 {
    let (head, tail) = buf.split_at(1);
    *buf = tail;
    head[0]
}
