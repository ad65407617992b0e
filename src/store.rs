//! # Root record & lifecycle
//!
//! Reads or creates the file header, bootstraps the extent allocator and key directory on open,
//! and is the single owning handle through which callers reach the store. See `SPEC_FULL.md`
//! §4.D.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;

use log::info;

use crate::codec::{self, Record};
use crate::directory::KeyDirectory;
use crate::error::Result;
use crate::extent::ExtentAllocator;

/// The file header at offset 0: pointers to the root of each linked chain.
#[derive(Clone, Copy, Debug)]
struct FileHeader {
    free_table_start: i64,
    data_start: i64,
}

impl Record for FileHeader {
    const SIZE: usize = 16;
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.free_table_start.to_le_bytes());
        buf.extend_from_slice(&self.data_start.to_le_bytes());
        buf
    }
    fn from_bytes(buf: &[u8]) -> Self {
        let mut cur = buf;
        let free_table_start = codec::take_i64(&mut cur);
        let data_start = codec::take_i64(&mut cur);
        FileHeader {
            free_table_start,
            data_start,
        }
    }
}

/// A small operational summary returned by [`Store::stat`].
#[derive(Clone, Copy, Debug)]
pub struct StoreStats {
    pub key_count: usize,
    pub extent_table_count: usize,
    pub key_table_count: usize,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "keys: {}, extent tables: {}, key tables: {}",
            self.key_count, self.extent_table_count, self.key_table_count
        )
    }
}

/// An open, single-file embedded key-value store.
///
/// There is no internal locking: `Store` is meant to be reached through one owning `&mut`
/// handle per process. Concurrent access from multiple handles (in this process or another) is
/// undefined behavior and must be mediated by the embedding application.
pub struct Store {
    file: File,
    alloc: ExtentAllocator,
    dir: KeyDirectory,
}

impl Store {
    /// Opens the store file at `path`, creating and initializing it if it does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => Self::open_existing(file),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(path)?;
                Self::bootstrap_new(file)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Initializes a freshly created, empty file: header, first extent table, first key table.
    fn bootstrap_new(file: File) -> Result<Self> {
        let header_start = 0i64;
        let free_table_start = FileHeader::SIZE as i64;

        let mut header = FileHeader {
            free_table_start,
            data_start: 0,
        };
        codec::write_record(&file, header_start, &header)?;

        // The file is exactly `free_table_start` bytes long at this point: the header was just
        // written contiguously from offset 0, and nothing else has been written yet.
        let mut alloc = ExtentAllocator::bootstrap(&file, free_table_start, free_table_start)?;
        let (dir, data_start) = KeyDirectory::bootstrap(&file, &mut alloc)?;

        header.data_start = data_start;
        codec::write_record(&file, header_start, &header)?;

        info!("initialized new store at free_table_start={free_table_start} data_start={data_start}");
        Ok(Store { file, alloc, dir })
    }

    /// Rebuilds in-memory state from an existing file: header, then allocator, then directory.
    fn open_existing(file: File) -> Result<Self> {
        let header: FileHeader = codec::read_record(&file, 0)?;
        let file_end = file.metadata()?.len() as i64;
        let alloc = ExtentAllocator::recover(&file, header.free_table_start, file_end)?;
        let dir = KeyDirectory::recover(&file, &alloc, header.data_start)?;
        info!("reopened existing store, data_start={}", header.data_start);
        Ok(Store { file, alloc, dir })
    }

    /// Inserts or overwrites `key` with `value`.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.dir.set(&self.file, &mut self.alloc, key, value)
    }

    /// Returns a copy of the value currently stored for `key`, or `Error::NotFound`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.dir.get(&self.file, key)
    }

    /// Removes `key` if present. A no-op (returns `Ok`) if `key` is absent.
    pub fn del(&mut self, key: &[u8]) -> Result<()> {
        self.dir.del(&self.file, &mut self.alloc, key)
    }

    /// Releases the underlying file handle. Equivalent to dropping the store, spelled out for
    /// callers that want an explicit close point.
    pub fn close(self) -> Result<()> {
        Ok(())
    }

    /// A small operational summary: key count, extent-table chain length, key-table chain
    /// length. Backs the CLI's `stat` subcommand.
    pub fn stat(&self) -> StoreStats {
        StoreStats {
            key_count: self.dir.key_count(),
            extent_table_count: self.alloc.extent_table_count(),
            key_table_count: self.dir.key_table_count(),
        }
    }

    #[cfg(test)]
    pub(crate) fn free_extent_sizes(&self) -> Vec<i64> {
        self.alloc.free_extent_sizes()
    }
    #[cfg(test)]
    pub(crate) fn contains(&self, key: &[u8]) -> bool {
        self.dir.contains(key)
    }
    #[cfg(test)]
    pub(crate) fn free_key_entry_count(&self) -> usize {
        self.dir.free_key_entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.bin");
        (dir, path)
    }

    #[test]
    fn fresh_store_has_one_extent_table_and_one_key_table() {
        let (_dir, path) = scratch();
        let store = Store::open(&path).unwrap();
        assert_eq!(store.stat().extent_table_count, 1);
        assert_eq!(store.stat().key_table_count, 1);
        assert_eq!(store.stat().key_count, 0);
    }

    #[test]
    fn set_then_get_round_trips_in_process() {
        let (_dir, path) = scratch();
        let mut store = Store::open(&path).unwrap();
        store.set(b"hello", b"world").unwrap();
        assert!(store.contains(b"hello"));
        assert_eq!(store.get(b"hello").unwrap(), b"world");
    }

    #[test]
    fn delete_returns_key_entry_and_extents_to_free_lists() {
        let (_dir, path) = scratch();
        let mut store = Store::open(&path).unwrap();
        store.set(b"hello", b"0123456789").unwrap();
        store.del(b"hello").unwrap();
        assert!(!store.contains(b"hello"));
        assert_eq!(
            store.free_key_entry_count(),
            crate::directory::KEY_TABLE_CAP as usize
        );
        assert!(store.free_extent_sizes().iter().any(|&s| s == 5));
        assert!(store.free_extent_sizes().iter().any(|&s| s == 10));
    }

    #[test]
    fn reopen_rebuilds_index_from_disk() {
        let (_dir, path) = scratch();
        {
            let mut store = Store::open(&path).unwrap();
            store.set(b"a", b"1").unwrap();
            store.set(b"b", b"2").unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert!(store.contains(b"a"));
        assert!(store.contains(b"b"));
        assert_eq!(store.get(b"a").unwrap(), b"1");
        assert_eq!(store.get(b"b").unwrap(), b"2");
    }
}
