//! The translation layer between on-disk file offsets and in-memory virtual
//! addresses for one loaded image.
//!
//! An [`AddressSpace`] owns the raw byte buffer plus an ordered list of
//! section/segment records. It is built once per image and immutable after
//! construction; the locator strategies share it read-only. All translation
//! and read operations fail explicitly when the input falls outside every
//! mapped record or a read would cross the buffer end — this is the single
//! chokepoint the heuristics go through, so corrupt input produces contained
//! errors instead of out-of-bounds effects.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

bitflags! {
    /// Access permissions of one mapped record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Perms: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXEC = 0b100;
    }
}

/// One section/segment mapping: a half-open virtual range backed by a file
/// offset in the image buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub virt_start: u64,
    pub virt_end: u64,
    pub file_offset: u64,
    pub perms: Perms,
    pub name: Option<String>,
}

impl Record {
    pub fn contains_virt(&self, addr: u64) -> bool {
        addr >= self.virt_start && addr < self.virt_end
    }

    pub fn len(&self) -> u64 {
        self.virt_end - self.virt_start
    }

    pub fn is_empty(&self) -> bool {
        self.virt_start == self.virt_end
    }
}

/// Byte buffer plus bidirectional offset/address mapping for one image.
#[derive(Debug, Clone)]
pub struct AddressSpace {
    data: Vec<u8>,
    records: Vec<Record>,
}

impl AddressSpace {
    /// Build an address space from a buffer and its mapping records.
    ///
    /// Records are sorted by virtual start; empty records are dropped so
    /// every valid address maps to exactly one record.
    pub fn new(data: Vec<u8>, mut records: Vec<Record>) -> Self {
        records.retain(|r| !r.is_empty());
        records.sort_by_key(|r| r.virt_start);
        Self { data, records }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Translate a virtual address to a file offset.
    pub fn virt_to_file(&self, addr: u64) -> Result<u64> {
        let record = self
            .records
            .iter()
            .find(|r| r.contains_virt(addr))
            .ok_or(Error::Unmapped { addr })?;
        Ok(record.file_offset + (addr - record.virt_start))
    }

    /// Translate a file offset to a virtual address.
    pub fn file_to_virt(&self, offset: u64) -> Result<u64> {
        let record = self
            .records
            .iter()
            .find(|r| offset >= r.file_offset && offset < r.file_offset + r.len())
            .ok_or(Error::UnmappedOffset { offset })?;
        Ok(record.virt_start + (offset - record.file_offset))
    }

    /// True when `addr` falls inside some mapped record.
    pub fn contains_virt(&self, addr: u64) -> bool {
        self.records.iter().any(|r| r.contains_virt(addr))
    }

    /// Read `len` bytes at a virtual address.
    pub fn read_bytes(&self, addr: u64, len: usize) -> Result<&[u8]> {
        let offset = self.virt_to_file(addr)? as usize;
        if offset.checked_add(len).map_or(true, |end| end > self.data.len()) {
            return Err(Error::Truncated {
                offset: offset as u64,
                needed: len,
            });
        }
        Ok(&self.data[offset..offset + len])
    }

    pub fn read_u32(&self, addr: u64) -> Result<u32> {
        let bytes = self.read_bytes(addr, 4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u64(&self, addr: u64) -> Result<u64> {
        let bytes = self.read_bytes(addr, 8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// Read a pointer-sized value at a virtual address.
    pub fn read_ptr(&self, addr: u64, ptr_size: u8) -> Result<u64> {
        match ptr_size {
            4 => self.read_u32(addr).map(u64::from),
            _ => self.read_u64(addr),
        }
    }

    /// Records marked executable.
    pub fn executable_records(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|r| r.perms.contains(Perms::EXEC))
    }

    /// Readable, non-executable records (where pointer tables live).
    pub fn data_records(&self) -> impl Iterator<Item = &Record> {
        self.records
            .iter()
            .filter(|r| r.perms.contains(Perms::READ) && !r.perms.contains(Perms::EXEC))
    }

    /// True when the format supplied an executable/data classification.
    ///
    /// The cross-reference strategy needs at least one executable record to
    /// validate candidate function pointers against; formats that cannot
    /// classify (wasm linear memory, stripped images) report false.
    pub fn has_classification(&self) -> bool {
        self.records.iter().any(|r| r.perms.contains(Perms::EXEC))
    }
}
