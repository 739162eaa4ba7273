//! Buffer Module
//!
//! Bounds-checked cursors over node bytes.
//!
//! ## Discipline
//! Every serializer first computes the exact byte size of what it is about to
//! write, allocates a [`WriteBuffer`] of exactly that capacity, writes, and
//! finishes with the cursor landing exactly at the end. Writing past capacity
//! is a programming error and panics.
//!
//! A [`ReadBuffer`] is the mirror image over received bytes. Reading past the
//! end is a format error (`BadFormat`), never a panic, and variable-length
//! fields are returned as views into the underlying buffer.
//!
//! All integers are little-endian:
//! ```text
//! ┌────────┬─────────┬─────────┬──────────────────────────┐
//! │ u8 (1) │ u32 (4) │ u64 (8) │ len u32 (4) | bytes[len] │
//! └────────┴─────────┴─────────┴──────────────────────────┘
//! ```

mod reader;
mod writer;

pub use reader::ReadBuffer;
pub use writer::WriteBuffer;

use crate::error::{FtError, Result};

/// Allocate an empty vector able to hold `len` bytes without reallocating.
///
/// Read paths size buffers from on-disk fields; allocation failure is
/// reported instead of aborting the process.
pub(crate) fn try_alloc(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|e| {
        FtError::OutOfMemory(format!("failed to reserve {} bytes: {}", len, e))
    })?;
    Ok(buf)
}
