//! Block allocation
//!
//! Hands out byte ranges on a device. Node blocks are copy-on-write: every
//! write gets a fresh range and the previous one is freed.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{FtError, Result};

use super::BlockLocation;

pub trait BlockAllocator: Send + Sync {
    /// Reserve at least `size` bytes
    fn allocate(&self, size: u64) -> Result<BlockLocation>;

    /// Return a range obtained from `allocate`
    fn free(&self, location: BlockLocation);
}

/// Append-only allocator with aligned offsets
///
/// Freed ranges are counted but never reused.
#[derive(Debug)]
pub struct BumpAllocator {
    alignment: u64,
    next_offset: AtomicU64,
    freed_bytes: AtomicU64,
}

impl BumpAllocator {
    /// Allocate from `base` upward; `alignment` must be a power of two
    pub fn new(base: u64, alignment: u64) -> Result<Self> {
        if !alignment.is_power_of_two() {
            return Err(FtError::InvalidState(format!(
                "block alignment {} is not a power of two",
                alignment
            )));
        }
        Ok(Self {
            alignment,
            next_offset: AtomicU64::new(align_up(base, alignment)),
            freed_bytes: AtomicU64::new(0),
        })
    }

    /// End of the highest range handed out so far
    pub fn high_water_mark(&self) -> u64 {
        self.next_offset.load(Ordering::SeqCst)
    }

    pub fn freed_bytes(&self) -> u64 {
        self.freed_bytes.load(Ordering::SeqCst)
    }
}

impl BlockAllocator for BumpAllocator {
    fn allocate(&self, size: u64) -> Result<BlockLocation> {
        let reserved = align_up(size.max(1), self.alignment);
        let offset = self.next_offset.fetch_add(reserved, Ordering::SeqCst);
        Ok(BlockLocation { offset, size })
    }

    fn free(&self, location: BlockLocation) {
        self.freed_bytes
            .fetch_add(align_up(location.size.max(1), self.alignment), Ordering::SeqCst);
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}
