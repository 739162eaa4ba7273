//! Checksum primitive
//!
//! Every checksum stored in a node block is a 64-bit seeded xxHash folded down
//! to 32 bits. The streaming form is folded into write buffers while a
//! serializer runs; the one-shot form verifies on the read side. Both produce
//! identical values for identical bytes regardless of how the input was split.

use std::fmt;

use xxhash_rust::xxh64::{xxh64, Xxh64};

use crate::error::{FtError, Result};

/// Seed shared by all writers and verifiers ("tokunode").
pub const CHECKSUM_SEED: u64 = 0x746f_6b75_6e6f_6465;

/// Size of a stored checksum in bytes
pub const CHECKSUM_SIZE: usize = 4;

/// Streaming checksum accumulator
#[derive(Clone)]
pub struct Checksum {
    inner: Xxh64,
}

impl Checksum {
    pub fn new() -> Self {
        Self {
            inner: Xxh64::new(CHECKSUM_SEED),
        }
    }

    /// Fold more bytes into the running state (order-dependent)
    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    /// Current checksum value; the accumulator can keep absorbing bytes.
    pub fn finish(&self) -> u32 {
        fold(self.inner.digest())
    }
}

impl Default for Checksum {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checksum")
            .field("value", &format_args!("{:#010x}", self.finish()))
            .finish()
    }
}

/// One-shot checksum, equal to `Checksum::new()` + `update(bytes)` + `finish()`
pub fn checksum(bytes: &[u8]) -> u32 {
    fold(xxh64(bytes, CHECKSUM_SEED))
}

fn fold(hash: u64) -> u32 {
    ((hash >> 32) as u32) ^ (hash as u32)
}

/// Split off and verify a trailing checksum covering everything before it.
///
/// Returns the covered bytes on success.
pub fn verify_trailing<'a>(bytes: &'a [u8], region: &str) -> Result<&'a [u8]> {
    if bytes.len() < CHECKSUM_SIZE {
        return Err(FtError::BadFormat(format!(
            "{}: {} bytes is too short to hold a checksum",
            region,
            bytes.len()
        )));
    }
    let (body, tail) = bytes.split_at(bytes.len() - CHECKSUM_SIZE);
    let stored = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    let computed = checksum(body);
    if stored != computed {
        return Err(FtError::checksum(region, stored, computed));
    }
    Ok(body)
}
