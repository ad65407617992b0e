//! # Key directory
//!
//! A linked chain of fixed-capacity *key tables*, each holding *key entries* that point at two
//! extents (key bytes, value bytes), plus the in-memory index mapping keys to their on-disk
//! entry. Layered entirely on top of `extent::ExtentAllocator`. See `SPEC_FULL.md` §4.C.

use std::collections::{HashMap, VecDeque};

use log::{info, trace};
use positioned_io::{ReadAt, WriteAt};

use crate::codec::{self, Record};
use crate::error::{Error, Result};
use crate::extent::{ExtentAllocator, ExtentHandle};

/// Number of key entries per key table. Part of the on-disk format.
pub const KEY_TABLE_CAP: i64 = 500;

/// Header preceding each key table's array of entries.
#[derive(Clone, Copy, Debug)]
struct KeyTableHeader {
    next: i64,
    capacity: i64,
}

impl Record for KeyTableHeader {
    const SIZE: usize = 16;
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.next.to_le_bytes());
        buf.extend_from_slice(&self.capacity.to_le_bytes());
        buf
    }
    fn from_bytes(buf: &[u8]) -> Self {
        let mut cur = buf;
        let next = codec::take_i64(&mut cur);
        let capacity = codec::take_i64(&mut cur);
        KeyTableHeader { next, capacity }
    }
}

/// A single on-disk key entry: `free` is nonzero when unused; otherwise `key_extent_loc` and
/// `value_extent_loc` are descriptor offsets resolved through the allocator.
#[derive(Clone, Copy, Debug)]
struct KeyEntryRecord {
    free: u8,
    key_extent_loc: i64,
    value_extent_loc: i64,
}

impl Record for KeyEntryRecord {
    const SIZE: usize = 17;
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(self.free);
        buf.extend_from_slice(&self.key_extent_loc.to_le_bytes());
        buf.extend_from_slice(&self.value_extent_loc.to_le_bytes());
        buf
    }
    fn from_bytes(buf: &[u8]) -> Self {
        let mut cur = buf;
        let free = codec::take_u8(&mut cur);
        let key_extent_loc = codec::take_i64(&mut cur);
        let value_extent_loc = codec::take_i64(&mut cur);
        KeyEntryRecord {
            free,
            key_extent_loc,
            value_extent_loc,
        }
    }
}

const BLANK_KEY_ENTRY: KeyEntryRecord = KeyEntryRecord {
    free: 1,
    key_extent_loc: 0,
    value_extent_loc: 0,
};

/// In-memory view of a key entry: its on-disk slot plus the extents it currently points at.
#[derive(Clone, Copy)]
struct KeyEntryHandle {
    slot: i64,
    key_extent: ExtentHandle,
    value_extent: ExtentHandle,
}

/// The key→entry index and free-entry bookkeeping layered on the extent allocator.
pub struct KeyDirectory {
    key_tables: Vec<i64>,
    free_key_entries: VecDeque<i64>,
    index: HashMap<Vec<u8>, KeyEntryHandle>,
}

impl KeyDirectory {
    /// Creates the first key table for a brand-new store. Returns the offset of that table,
    /// which the caller (`Store`) must persist as `file_header.data_start`.
    pub fn bootstrap<F: ReadAt + WriteAt>(
        file: &F,
        alloc: &mut ExtentAllocator,
    ) -> Result<(Self, i64)> {
        let mut dir = KeyDirectory {
            key_tables: Vec::new(),
            free_key_entries: VecDeque::new(),
            index: HashMap::new(),
        };
        let table_start = dir.grow_table_chain(file, alloc)?;
        Ok((dir, table_start))
    }

    /// Rebuilds the index and free-entry list by walking the key-table chain starting at
    /// `data_start`. The allocator must already be recovered, since key entries resolve extent
    /// offsets through it.
    pub fn recover<F: ReadAt>(
        file: &F,
        alloc: &ExtentAllocator,
        data_start: i64,
    ) -> Result<Self> {
        let mut dir = KeyDirectory {
            key_tables: Vec::new(),
            free_key_entries: VecDeque::new(),
            index: HashMap::new(),
        };
        if data_start == 0 {
            return Ok(dir);
        }
        let mut table_start = data_start;
        loop {
            let header: KeyTableHeader = codec::read_record(file, table_start)?;
            dir.key_tables.push(table_start);
            let mut offset = table_start + KeyTableHeader::SIZE as i64;
            for _ in 0..header.capacity {
                let rec: KeyEntryRecord = codec::read_record(file, offset)?;
                if rec.free != 0 {
                    dir.free_key_entries.push_back(offset);
                } else {
                    let key_extent = alloc.resolve(rec.key_extent_loc)?;
                    let value_extent = alloc.resolve(rec.value_extent_loc)?;
                    let key_bytes = codec::read_bytes(file, key_extent.start, key_extent.size)?;
                    dir.index.insert(
                        key_bytes,
                        KeyEntryHandle {
                            slot: offset,
                            key_extent,
                            value_extent,
                        },
                    );
                }
                offset += KeyEntryRecord::SIZE as i64;
            }
            if header.next == 0 {
                break;
            }
            table_start = header.next;
        }
        trace!(
            "recovered key directory: {} tables, {} keys, {} free entries",
            dir.key_tables.len(),
            dir.index.len(),
            dir.free_key_entries.len()
        );
        Ok(dir)
    }

    /// Extends the key-table chain by one table, allocated through the extent allocator.
    /// Returns the new table's offset.
    fn grow_table_chain<F: ReadAt + WriteAt>(
        &mut self,
        file: &F,
        alloc: &mut ExtentAllocator,
    ) -> Result<i64> {
        let table_size = KeyTableHeader::SIZE as i64 + KEY_TABLE_CAP * KeyEntryRecord::SIZE as i64;
        let extent = alloc.allocate(file, table_size)?;
        let start = extent.start;

        let header = KeyTableHeader {
            next: 0,
            capacity: KEY_TABLE_CAP,
        };
        codec::write_record(file, start, &header)?;
        let mut offset = start + KeyTableHeader::SIZE as i64;
        for _ in 0..KEY_TABLE_CAP {
            codec::write_record(file, offset, &BLANK_KEY_ENTRY)?;
            self.free_key_entries.push_back(offset);
            offset += KeyEntryRecord::SIZE as i64;
        }

        if let Some(&last) = self.key_tables.last() {
            let mut last_header: KeyTableHeader = codec::read_record(file, last)?;
            last_header.next = start;
            codec::write_record(file, last, &last_header)?;
        }
        self.key_tables.push(start);
        info!(
            "grew key-table chain to {} tables at offset {start}",
            self.key_tables.len()
        );
        Ok(start)
    }

    /// Inserts or overwrites `key` with `value`.
    pub fn set<F: ReadAt + WriteAt>(
        &mut self,
        file: &F,
        alloc: &mut ExtentAllocator,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        if let Some(&handle) = self.index.get(key) {
            let updated = self.update_existing(file, alloc, handle, key, value)?;
            self.index.insert(key.to_vec(), updated);
            return Ok(());
        }

        if self.free_key_entries.is_empty() {
            self.grow_table_chain(file, alloc)?;
        }
        let slot = self
            .free_key_entries
            .pop_front()
            .ok_or_else(|| Error::invariant("no free key entry after growing chain"))?;

        // Allocate the key extent and the value extent as two sequential calls against the
        // allocator's own end-of-file tracking, so the second never lands on top of the first
        // even when both extend the file (see `ExtentAllocator::allocate`).
        let key_extent = alloc.allocate(file, key.len() as i64)?;
        let value_extent = alloc.allocate(file, value.len() as i64)?;
        codec::write_bytes(file, key_extent.start, key)?;
        codec::write_bytes(file, value_extent.start, value)?;
        let rec = KeyEntryRecord {
            free: 0,
            key_extent_loc: key_extent.loc,
            value_extent_loc: value_extent.loc,
        };
        codec::write_record(file, slot, &rec)?;

        self.index.insert(
            key.to_vec(),
            KeyEntryHandle {
                slot,
                key_extent,
                value_extent,
            },
        );
        Ok(())
    }

    /// Writes `key`/`value` payloads into a pre-existing entry's extents, resizing either extent
    /// if its length changed, and rewrites the key-entry record only if an extent moved. Mirrors
    /// `SPEC_FULL.md` §4.C.1 "Update".
    fn update_existing<F: ReadAt + WriteAt>(
        &mut self,
        file: &F,
        alloc: &mut ExtentAllocator,
        mut handle: KeyEntryHandle,
        key: &[u8],
        value: &[u8],
    ) -> Result<KeyEntryHandle> {
        let mut dirty = false;
        let key_len = key.len() as i64;
        let value_len = value.len() as i64;

        // As in `set`, the key-extent resize and the value-extent resize are two independent
        // calls against the allocator's own end-of-file tracking; if both extents happen to grow
        // in the same update, the second still lands past the first instead of aliasing it.
        if handle.key_extent.size != key_len {
            let (shrunk, new_handle) = alloc.resize(file, handle.key_extent, key_len)?;
            // `resize` returns the trailing free remainder as its second element when shrinking;
            // the entry must keep pointing at the shrunk-in-place handle, not that remainder.
            handle.key_extent = shrunk.unwrap_or(new_handle);
            dirty = true;
        }

        if handle.value_extent.size != value_len {
            let (shrunk, new_handle) = alloc.resize(file, handle.value_extent, value_len)?;
            handle.value_extent = shrunk.unwrap_or(new_handle);
            dirty = true;
        }

        codec::write_bytes(file, handle.key_extent.start, key)?;
        codec::write_bytes(file, handle.value_extent.start, value)?;

        if dirty {
            let rec = KeyEntryRecord {
                free: 0,
                key_extent_loc: handle.key_extent.loc,
                value_extent_loc: handle.value_extent.loc,
            };
            codec::write_record(file, handle.slot, &rec)?;
        }
        Ok(handle)
    }

    /// Returns a copy of the value currently stored for `key`.
    pub fn get<F: ReadAt>(&self, file: &F, key: &[u8]) -> Result<Vec<u8>> {
        let handle = self.index.get(key).ok_or(Error::NotFound)?;
        codec::read_bytes(file, handle.value_extent.start, handle.value_extent.size)
    }

    /// Removes `key` if present. Frees both extents, blanks the key-entry record, and returns
    /// the slot to the free-entry list. A no-op (returns `Ok`) if `key` is absent.
    pub fn del<F: WriteAt>(&mut self, file: &F, alloc: &mut ExtentAllocator, key: &[u8]) -> Result<()> {
        let handle = match self.index.remove(key) {
            Some(h) => h,
            None => return Ok(()),
        };
        alloc.free(file, handle.key_extent)?;
        alloc.free(file, handle.value_extent)?;
        codec::write_record(file, handle.slot, &BLANK_KEY_ENTRY)?;
        self.free_key_entries.push_back(handle.slot);
        Ok(())
    }

    /// Number of key tables currently in the chain.
    pub fn key_table_count(&self) -> usize {
        self.key_tables.len()
    }

    /// Number of keys currently present in the index.
    pub fn key_count(&self) -> usize {
        self.index.len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &[u8]) -> bool {
        self.index.contains_key(key)
    }
    #[cfg(test)]
    pub(crate) fn free_key_entry_count(&self) -> usize {
        self.free_key_entries.len()
    }
}
