//! Block devices
//!
//! Byte-addressed storage the node store reads blocks from and writes blocks
//! to. Offsets and lengths always come from the allocator.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::buffer::try_alloc;
use crate::error::Result;

/// Positioned block I/O
pub trait BlockDevice: Send + Sync {
    /// Read exactly `len` bytes at `offset`
    fn read_block(&self, offset: u64, len: usize) -> Result<Bytes>;

    fn write_block(&self, offset: u64, bytes: &[u8]) -> Result<()>;

    /// Flush written blocks to stable storage
    fn sync(&self) -> Result<()>;

    /// Current size of the device in bytes
    fn len(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

// =============================================================================
// File
// =============================================================================

/// Device backed by a single file
///
/// The handle's cursor is shared, so a seek and the following read or write
/// happen under one lock.
pub struct FileDevice {
    file: Mutex<File>,
}

impl FileDevice {
    /// Open or create the file at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl BlockDevice for FileDevice {
    fn read_block(&self, offset: u64, len: usize) -> Result<Bytes> {
        let mut buf = try_alloc(len)?;
        buf.resize(len, 0);
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(Bytes::from(buf))
    }

    fn write_block(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }
}

// =============================================================================
// Memory
// =============================================================================

/// Device backed by a growable in-memory buffer
#[derive(Default)]
pub struct MemoryDevice {
    data: RwLock<Vec<u8>>,
}

impl MemoryDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the device contents
    pub fn contents(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl BlockDevice for MemoryDevice {
    fn read_block(&self, offset: u64, len: usize) -> Result<Bytes> {
        let data = self.data.read();
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= data.len() => Ok(Bytes::copy_from_slice(&data[start..end])),
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read of {} bytes at {} past end of {}-byte device",
                    len,
                    offset,
                    data.len()
                ),
            )
            .into()),
        }
    }

    fn write_block(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.write();
        let start = offset as usize;
        let end = start + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.data.read().len() as u64)
    }
}
