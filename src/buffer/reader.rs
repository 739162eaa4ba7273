//! Read Buffer
//!
//! Cursor over received bytes. Every accessor fails with `BadFormat` instead
//! of reading past the end.

use crate::error::{FtError, Result};

/// Borrowing read cursor
#[derive(Debug, Clone)]
pub struct ReadBuffer<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ReadBuffer<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1, "u8")?[0])
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let b = self.take(4, "u32")?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        let b = self.take(8, "u64")?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    /// View of the next `len` bytes
    pub fn get_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len, "byte string")
    }

    /// View of a `len u32`-prefixed byte string
    pub fn get_len_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = self.get_u32()? as usize;
        self.take(len, "length-prefixed bytes")
    }

    /// View of everything not yet consumed; the cursor moves to the end.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    /// Bytes consumed since an earlier `position()`
    pub fn since(&self, start: usize) -> &'a [u8] {
        &self.buf[start.min(self.pos)..self.pos]
    }

    /// Fail unless every byte was consumed
    pub fn expect_end(&self, what: &str) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(FtError::BadFormat(format!(
                "{}: {} unexpected trailing bytes",
                what,
                self.remaining()
            )))
        }
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(FtError::BadFormat(format!(
                "truncated {}: need {} bytes at offset {}, only {} remain",
                what,
                len,
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }
}
