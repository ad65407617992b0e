//! # Extent allocator
//!
//! Manages a linked chain of fixed-capacity *extent tables*, each holding `EXTENT_TABLE_CAP`
//! *extent descriptors* (free/used, start offset, size). Serves allocation, free, and resize
//! requests against byte ranges of the store file, growing the file when no reusable free extent
//! fits. See `SPEC_FULL.md` §4.B for the full contract.

use std::collections::{HashMap, VecDeque};

use log::{debug, info, trace};
use positioned_io::{ReadAt, WriteAt};

use crate::codec::{self, Record};
use crate::error::{Error, Result};

/// Number of extent descriptors per extent table. Part of the on-disk format; changing it breaks
/// compatibility with existing store files.
pub const EXTENT_TABLE_CAP: i64 = 1024;

/// Header preceding each extent table's array of descriptors.
#[derive(Clone, Copy, Debug)]
pub struct ExtentTableHeader {
    pub next: i64,
    pub capacity: i64,
}

impl Record for ExtentTableHeader {
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
        ExtentTableHeader { next, capacity }
    }
}

/// A single on-disk extent descriptor: `free` is nonzero for free-or-uninitialized, zero for
/// used; `start`/`size` describe the payload range when `size > 0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtentEntry {
    pub free: u8,
    pub start: i64,
    pub size: i64,
}

impl Record for ExtentEntry {
    const SIZE: usize = 17;
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(self.free);
        buf.extend_from_slice(&self.start.to_le_bytes());
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf
    }
    fn from_bytes(buf: &[u8]) -> Self {
        let mut cur = buf;
        let free = codec::take_u8(&mut cur);
        let start = codec::take_i64(&mut cur);
        let size = codec::take_i64(&mut cur);
        ExtentEntry { free, start, size }
    }
}

/// An in-memory view of an extent descriptor, tagged with the descriptor's own file offset
/// (`loc`) so it can be rewritten in place. `loc` is what the key directory stores as
/// `key_extent_loc`/`value_extent_loc`.
#[derive(Clone, Copy, Debug)]
pub struct ExtentHandle {
    pub loc: i64,
    pub start: i64,
    pub size: i64,
}

impl ExtentHandle {
    fn from_entry(loc: i64, entry: ExtentEntry) -> Self {
        ExtentHandle {
            loc,
            start: entry.start,
            size: entry.size,
        }
    }
}

/// Manages every extent table in the chain and the free lists derived from them.
///
/// `by_offset` is the sole owner of descriptor state (the "arena" described in `SPEC_FULL.md`
/// §9); `free_extents` and `free_descriptor_slots` hold only the `loc` offsets of entries found
/// in `by_offset`, keeping allocation O(1) against the free lists rather than O(all descriptors).
pub struct ExtentAllocator {
    free_table_start: i64,
    by_offset: HashMap<i64, ExtentEntry>,
    free_extents: VecDeque<i64>,
    free_descriptor_slots: VecDeque<i64>,
    extent_tables: Vec<i64>,
    /// Current end of the underlying file. Owned and kept current by the allocator itself so
    /// that two allocations issued back-to-back within one logical operation (e.g. a key extent
    /// then a value extent in `KeyDirectory::set`) never race against a caller-supplied snapshot
    /// of the file length — each extending allocation bumps this in place before returning.
    file_end: i64,
}

impl ExtentAllocator {
    /// Bootstraps a brand-new store: writes the first extent table at `start` (immediately after
    /// the file header, which the caller has already written contiguously from offset 0) and
    /// returns an allocator whose `free_table_start` is `start`. `file_end` is the file's length
    /// at this point (equal to `start`, since nothing follows the header yet).
    pub fn bootstrap<F: ReadAt + WriteAt>(file: &F, start: i64, file_end: i64) -> Result<Self> {
        let mut alloc = ExtentAllocator {
            free_table_start: start,
            by_offset: HashMap::new(),
            free_extents: VecDeque::new(),
            free_descriptor_slots: VecDeque::new(),
            extent_tables: Vec::new(),
            file_end,
        };
        alloc.write_new_table(file)?;
        Ok(alloc)
    }

    /// Rebuilds allocator state by walking the extent-table chain starting at `free_table_start`.
    /// The file is authoritative; any in-memory state from a prior session is discarded.
    /// `file_end` is the file's true current length as queried by the caller (the chain of
    /// descriptors alone does not tell us where the file actually ends).
    pub fn recover<F: ReadAt>(file: &F, free_table_start: i64, file_end: i64) -> Result<Self> {
        let mut alloc = ExtentAllocator {
            free_table_start,
            by_offset: HashMap::new(),
            free_extents: VecDeque::new(),
            free_descriptor_slots: VecDeque::new(),
            extent_tables: Vec::new(),
            file_end,
        };
        let mut table_start = free_table_start;
        loop {
            let header: ExtentTableHeader = codec::read_record(file, table_start)?;
            alloc.extent_tables.push(table_start);
            let mut offset = table_start + ExtentTableHeader::SIZE as i64;
            for _ in 0..header.capacity {
                let entry: ExtentEntry = codec::read_record(file, offset)?;
                alloc.by_offset.insert(offset, entry);
                if entry.size == 0 {
                    alloc.free_descriptor_slots.push_back(offset);
                } else if entry.free != 0 {
                    alloc.free_extents.push_back(offset);
                }
                offset += ExtentEntry::SIZE as i64;
            }
            if header.next == 0 {
                break;
            }
            table_start = header.next;
        }
        debug!(
            "recovered extent allocator: {} tables, {} free extents, {} free slots",
            alloc.extent_tables.len(),
            alloc.free_extents.len(),
            alloc.free_descriptor_slots.len()
        );
        Ok(alloc)
    }

    pub fn free_table_start(&self) -> i64 {
        self.free_table_start
    }

    fn lookup(&self, loc: i64) -> Option<ExtentEntry> {
        self.by_offset.get(&loc).copied()
    }

    /// Resolves a descriptor offset (as stored in a key entry) into a handle, failing with
    /// `CorruptIndex` if the offset is unknown to the allocator.
    pub fn resolve(&self, loc: i64) -> Result<ExtentHandle> {
        match self.lookup(loc) {
            Some(entry) if entry.free == 0 => Ok(ExtentHandle::from_entry(loc, entry)),
            Some(_) => Err(Error::corrupt(format!(
                "extent at {loc} referenced by a key entry is marked free"
            ))),
            None => Err(Error::corrupt(format!(
                "extent descriptor at {loc} not found"
            ))),
        }
    }

    /// Writes a fresh, empty extent table at the current end of file, registers its descriptors
    /// as free metadata slots, links the previous last table to it (if any), and advances
    /// `self.file_end` past the new table.
    fn write_new_table<F: ReadAt + WriteAt>(&mut self, file: &F) -> Result<()> {
        let start = self.file_end;
        let header = ExtentTableHeader {
            next: 0,
            capacity: EXTENT_TABLE_CAP,
        };
        codec::write_record(file, start, &header)?;
        let mut offset = start + ExtentTableHeader::SIZE as i64;
        let blank = ExtentEntry {
            free: 1,
            start: 0,
            size: 0,
        };
        for _ in 0..EXTENT_TABLE_CAP {
            codec::write_record(file, offset, &blank)?;
            self.by_offset.insert(offset, blank);
            self.free_descriptor_slots.push_back(offset);
            offset += ExtentEntry::SIZE as i64;
        }
        self.file_end = offset;
        if let Some(&last) = self.extent_tables.last() {
            let mut last_header: ExtentTableHeader = codec::read_record(file, last)?;
            last_header.next = start;
            codec::write_record(file, last, &last_header)?;
        }
        self.extent_tables.push(start);
        info!(
            "grew extent-table chain to {} tables at offset {start}",
            self.extent_tables.len()
        );
        Ok(())
    }

    /// Extends the extent-table chain by appending a new table at the current end of file.
    fn grow_table_chain<F: ReadAt + WriteAt>(&mut self, file: &F) -> Result<()> {
        self.write_new_table(file)
    }

    /// Takes a free metadata slot, growing the table chain first if none are available.
    fn take_descriptor_slot<F: ReadAt + WriteAt>(&mut self, file: &F) -> Result<i64> {
        if self.free_descriptor_slots.is_empty() {
            self.grow_table_chain(file)?;
        }
        self.free_descriptor_slots
            .pop_front()
            .ok_or_else(|| Error::invariant("no descriptor slot available after growing chain"))
    }

    fn persist<F: WriteAt>(&mut self, file: &F, loc: i64, entry: ExtentEntry) -> Result<()> {
        codec::write_record(file, loc, &entry)?;
        self.by_offset.insert(loc, entry);
        Ok(())
    }

    /// First-fit allocation per `SPEC_FULL.md` §4.B.1. End-of-file tracking is owned by the
    /// allocator itself (`self.file_end`), not snapshotted by the caller, so that two allocations
    /// issued back-to-back in one operation never race against a stale length.
    pub fn allocate<F: ReadAt + WriteAt>(&mut self, file: &F, size: i64) -> Result<ExtentHandle> {
        trace!("allocate({size})");
        let mut chosen: Option<(usize, i64, ExtentEntry)> = None;
        for (idx, &loc) in self.free_extents.iter().enumerate() {
            let entry = self.lookup(loc).ok_or_else(|| {
                Error::invariant(format!("free list references unknown extent at {loc}"))
            })?;
            if entry.size == size || entry.size > size {
                chosen = Some((idx, loc, entry));
                break;
            }
        }

        if let Some((idx, loc, entry)) = chosen {
            self.free_extents.remove(idx);
            if entry.size == size {
                let used = ExtentEntry {
                    free: 0,
                    start: entry.start,
                    size: entry.size,
                };
                self.persist(file, loc, used)?;
                return Ok(ExtentHandle::from_entry(loc, used));
            }
            // entry.size > size: split.
            let used = ExtentEntry {
                free: 0,
                start: entry.start,
                size,
            };
            self.persist(file, loc, used)?;
            let slot = self.take_descriptor_slot(file)?;
            let remainder = ExtentEntry {
                free: 1,
                start: entry.start + size,
                size: entry.size - size,
            };
            self.persist(file, slot, remainder)?;
            self.free_extents.push_back(slot);
            return Ok(ExtentHandle::from_entry(loc, used));
        }

        // No free extent fits: extend the file at the allocator's own end-of-file cursor, then
        // advance that cursor past the new payload before returning, so a second back-to-back
        // allocate() in the same caller operation lands past this one instead of aliasing it.
        // `take_descriptor_slot` must run first: it may itself grow the extent-table chain,
        // which advances `self.file_end` past the freshly written table.
        let slot = self.take_descriptor_slot(file)?;
        let file_end = self.file_end;
        let used = ExtentEntry {
            free: 0,
            start: file_end,
            size,
        };
        codec::write_zeros(file, file_end, size)?;
        self.persist(file, slot, used)?;
        self.file_end = file_end + size;
        debug!("allocated {size} bytes at {file_end} (new extent)");
        Ok(ExtentHandle::from_entry(slot, used))
    }

    /// Marks `handle` free and adds it to the free-extent list. Payload bytes are left as-is.
    pub fn free<F: WriteAt>(&mut self, file: &F, handle: ExtentHandle) -> Result<()> {
        let freed = ExtentEntry {
            free: 1,
            start: handle.start,
            size: handle.size,
        };
        self.persist(file, handle.loc, freed)?;
        self.free_extents.push_back(handle.loc);
        trace!("freed extent at {} (size {})", handle.loc, handle.size);
        Ok(())
    }

    /// Resizes `handle` to `new_size`. Returns `(stale_handle, new_handle)`:
    /// - unchanged size: `(None, handle)`.
    /// - growing: `(None, new_handle)` — `handle` is invalidated and its payload is not copied.
    /// - shrinking: `(Some(handle), trailing_free_handle)` — `handle` is still valid at its
    ///   (now smaller) size.
    pub fn resize<F: ReadAt + WriteAt>(
        &mut self,
        file: &F,
        handle: ExtentHandle,
        new_size: i64,
    ) -> Result<(Option<ExtentHandle>, ExtentHandle)> {
        if handle.size == new_size {
            return Ok((None, handle));
        }
        if new_size > handle.size {
            let new_handle = self.allocate(file, new_size)?;
            self.free(file, handle)?;
            return Ok((None, new_handle));
        }
        // Shrink in place, producing a trailing free extent.
        let shrunk = ExtentEntry {
            free: 0,
            start: handle.start,
            size: new_size,
        };
        self.persist(file, handle.loc, shrunk)?;
        let slot = self.take_descriptor_slot(file)?;
        let remainder = ExtentEntry {
            free: 1,
            start: handle.start + new_size,
            size: handle.size - new_size,
        };
        self.persist(file, slot, remainder)?;
        self.free_extents.push_back(slot);
        Ok((
            Some(ExtentHandle::from_entry(handle.loc, shrunk)),
            ExtentHandle::from_entry(slot, remainder),
        ))
    }

    /// Number of extent tables currently in the chain.
    pub fn extent_table_count(&self) -> usize {
        self.extent_tables.len()
    }

    #[cfg(test)]
    pub(crate) fn free_extent_count(&self) -> usize {
        self.free_extents.len()
    }
    #[cfg(test)]
    pub(crate) fn free_extent_sizes(&self) -> Vec<i64> {
        self.free_extents
            .iter()
            .map(|loc| self.by_offset[loc].size)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_free_reuses_exact_fit() {
        let file = tempfile::tempfile().unwrap();
        let mut alloc = ExtentAllocator::bootstrap(&file, 16, 16).unwrap();
        let h1 = alloc.allocate(&file, 10).unwrap();
        assert_eq!(h1.size, 10);
        alloc.free(&file, h1).unwrap();
        assert_eq!(alloc.free_extent_count(), 1);
        let h2 = alloc.allocate(&file, 10).unwrap();
        assert_eq!(h2.loc, h1.loc);
        assert_eq!(alloc.free_extent_count(), 0);
    }

    #[test]
    fn allocate_splits_larger_free_extent() {
        let file = tempfile::tempfile().unwrap();
        let mut alloc = ExtentAllocator::bootstrap(&file, 16, 16).unwrap();
        let big = alloc.allocate(&file, 10).unwrap();
        let (shrunk, trailing) = alloc.resize(&file, big, 2).unwrap();
        assert!(shrunk.is_some());
        assert_eq!(trailing.size, 8);
        let small = alloc.allocate(&file, 8).unwrap();
        assert_eq!(small.size, 8);
        assert_eq!(small.loc, trailing.loc);
    }

    #[test]
    fn extent_table_chain_grows_past_capacity() {
        let file = tempfile::tempfile().unwrap();
        let mut alloc = ExtentAllocator::bootstrap(&file, 16, 16).unwrap();
        for _ in 0..EXTENT_TABLE_CAP {
            alloc.allocate(&file, 1).unwrap();
        }
        assert_eq!(alloc.extent_table_count(), 1);
        alloc.allocate(&file, 1).unwrap();
        assert_eq!(alloc.extent_table_count(), 2);
    }

    #[test]
    fn back_to_back_allocations_never_alias() {
        // Regression test: two allocate() calls issued in sequence while free_extents is empty
        // must each land at a distinct, non-overlapping offset, even though both extend the
        // file. This mirrors KeyDirectory::set allocating a key extent then a value extent for
        // a brand-new key.
        let file = tempfile::tempfile().unwrap();
        let mut alloc = ExtentAllocator::bootstrap(&file, 16, 16).unwrap();
        let a = alloc.allocate(&file, 7).unwrap();
        let b = alloc.allocate(&file, 4).unwrap();
        assert_ne!(a.start, b.start);
        assert!(a.start + a.size <= b.start || b.start + b.size <= a.start);
    }
}
