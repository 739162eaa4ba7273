//! Basement Nodes
//!
//! A basement is the leaf-level partition: packed leaf entries in ascending
//! key order. Entry bytes live in a single arena; the index records offsets
//! into it, so the two are always cloned and moved together as one value.

use std::fmt;

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::error::{FtError, Result};

use super::leafentry::{scan_entry, LeafEntry, CLEAN_HEADER, MVCC_HEADER};
use super::Comparator;

/// Position of one entry inside the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    offset: usize,
    len: usize,
    key_offset: usize,
    key_len: usize,
}

#[derive(Clone, Default)]
pub struct Basement {
    pool: Vec<u8>,
    slots: Vec<Slot>,
}

impl Basement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt `count` packed entries laid end to end in `pool`.
    ///
    /// Every entry is walked once to build the index; the pool must hold
    /// exactly `count` entries and nothing else.
    pub fn from_packed(pool: Vec<u8>, count: usize) -> Result<Self> {
        // Smallest entry is a clean entry with empty key and value (9 bytes).
        if count > pool.len() / 9 {
            return Err(FtError::BadFormat(format!(
                "basement claims {} entries in {} bytes",
                count,
                pool.len()
            )));
        }
        let mut slots = Vec::with_capacity(count);
        let mut rb = ReadBuffer::new(&pool);
        for _ in 0..count {
            let offset = rb.position();
            let extent = scan_entry(&mut rb)?;
            slots.push(Slot {
                offset,
                len: extent.len,
                key_offset: offset + extent.key_offset,
                key_len: extent.key_len,
            });
        }
        rb.expect_end("basement")?;
        Ok(Self { pool, slots })
    }

    /// Build from entries already in ascending key order
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LeafEntry>) -> Result<Self> {
        let mut basement = Self::new();
        for entry in entries {
            basement.push(entry)?;
        }
        Ok(basement)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Append an entry; the caller keeps keys ascending
    pub fn push(&mut self, entry: &LeafEntry) -> Result<()> {
        let slot = self.append(entry)?;
        self.slots.push(slot);
        Ok(())
    }

    /// Append one already-packed entry, validating its shape
    pub fn push_encoded(&mut self, bytes: &[u8]) -> Result<()> {
        let extent = scan_entry(&mut ReadBuffer::new(bytes))?;
        if extent.len != bytes.len() {
            return Err(FtError::BadFormat(format!(
                "packed leaf entry is {} bytes but holds {} trailing bytes",
                bytes.len(),
                bytes.len() - extent.len
            )));
        }
        let offset = self.pool.len();
        self.pool.extend_from_slice(bytes);
        self.slots.push(Slot {
            offset,
            len: extent.len,
            key_offset: offset + extent.key_offset,
            key_len: extent.key_len,
        });
        Ok(())
    }

    /// Insert in key order, replacing any entry with an equal key
    pub fn insert(&mut self, entry: &LeafEntry, cmp: &Comparator) -> Result<()> {
        let position = self.search(entry.key(), cmp);
        let slot = self.append(entry)?;
        match position {
            Ok(i) => self.slots[i] = slot,
            Err(i) => self.slots.insert(i, slot),
        }
        Ok(())
    }

    /// Index of the entry whose key equals `key`
    pub fn find(&self, key: &[u8], cmp: &Comparator) -> Option<usize> {
        self.search(key, cmp).ok()
    }

    pub fn key(&self, i: usize) -> Option<&[u8]> {
        let slot = self.slots.get(i)?;
        Some(&self.pool[slot.key_offset..slot.key_offset + slot.key_len])
    }

    /// Packed bytes of entry `i`
    pub fn entry_bytes(&self, i: usize) -> Option<&[u8]> {
        let slot = self.slots.get(i)?;
        Some(&self.pool[slot.offset..slot.offset + slot.len])
    }

    pub fn entry(&self, i: usize) -> Option<Result<LeafEntry>> {
        self.entry_bytes(i).map(LeafEntry::decode)
    }

    pub fn entries(&self) -> Result<Vec<LeafEntry>> {
        self.iter_encoded().map(LeafEntry::decode).collect()
    }

    /// Packed entries in key order
    pub fn iter_encoded(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.slots
            .iter()
            .map(move |slot| &self.pool[slot.offset..slot.offset + slot.len])
    }

    pub fn entry_sizes(&self) -> Vec<usize> {
        self.slots.iter().map(|slot| slot.len).collect()
    }

    /// Bytes the entries occupy once packed
    pub fn disk_size(&self) -> usize {
        self.slots.iter().map(|slot| slot.len).sum()
    }

    /// Arena bytes still referenced from the index (replaced entries leave
    /// dead space behind until the basement is rebuilt)
    pub fn live_fraction(&self) -> f64 {
        if self.pool.is_empty() {
            1.0
        } else {
            self.disk_size() as f64 / self.pool.len() as f64
        }
    }

    pub(crate) fn write_entries(&self, wb: &mut WriteBuffer) {
        for bytes in self.iter_encoded() {
            wb.put_bytes(bytes);
        }
    }

    fn append(&mut self, entry: &LeafEntry) -> Result<Slot> {
        let bytes = entry.encode()?;
        let offset = self.pool.len();
        self.pool.extend_from_slice(&bytes);
        Ok(Slot {
            offset,
            len: bytes.len(),
            key_offset: offset + key_header_len(entry),
            key_len: entry.key().len(),
        })
    }

    fn search(&self, key: &[u8], cmp: &Comparator) -> std::result::Result<usize, usize> {
        self.slots.binary_search_by(|slot| {
            let probe = &self.pool[slot.key_offset..slot.key_offset + slot.key_len];
            cmp(probe, key)
        })
    }
}

fn key_header_len(entry: &LeafEntry) -> usize {
    match entry {
        LeafEntry::Clean { .. } => CLEAN_HEADER,
        LeafEntry::Mvcc { .. } => MVCC_HEADER,
    }
}

impl PartialEq for Basement {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter_encoded()
                .zip(other.iter_encoded())
                .all(|(a, b)| a == b)
    }
}

impl fmt::Debug for Basement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Basement")
            .field("entries", &self.len())
            .field("disk_size", &self.disk_size())
            .finish()
    }
}
