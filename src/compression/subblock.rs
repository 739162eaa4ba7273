//! Sub-block engine
//!
//! A sub-block is an independently compressed, checksummed chunk. Two on-disk
//! shapes exist:
//!
//! ```text
//! Framed (node info and each partition):
//! ┌────────────┬────────────┬──────────────────┬──────────────────────────┐
//! │ csize u32  │ usize u32  │ compressed bytes │ checksum(csize|usize|..) │
//! └────────────┴────────────┴──────────────────┴──────────────────────────┘
//!
//! Chunked (a flat buffer split into up to MAX_SUB_BLOCKS chunks):
//! ┌───────┬─────────────────────────────────┬────────────────────────────┐
//! │ n u32 │ (csize, usize, xsum) u32 x3 * n │ compressed chunk 0 .. n-1  │
//! └───────┴─────────────────────────────────┴────────────────────────────┘
//! (xsum covers the chunk's compressed bytes only)
//! ```

use std::ops::Range;

use crate::buffer::{try_alloc, ReadBuffer, WriteBuffer};
use crate::checksum::{checksum, Checksum};
use crate::error::{FtError, Result};

use super::{CompressionMethod, WorkerPool};

/// Preferred uncompressed size of one chunk
pub const TARGET_SUB_BLOCK_SIZE: usize = 512 * 1024;

/// Default upper bound on the number of chunks a buffer is split into
pub const MAX_SUB_BLOCKS: usize = 8;

/// Chunk sizes grow in steps of this many bytes
pub const SUB_BLOCK_ALIGNMENT: usize = 32;

/// No legitimate chunk reaches this size, compressed or not
pub const MAX_SUB_BLOCK_SIZE: usize = 1 << 30;

/// Chunk counts beyond this in a chunk table are treated as corruption
const MAX_CHUNKS_ON_DISK: usize = 1024;

/// Bytes a frame adds around its compressed payload: two sizes and a checksum
pub const FRAME_OVERHEAD: usize = 12;

/// Bytes per chunk-table entry
const CHUNK_ENTRY_SIZE: usize = 12;

// =============================================================================
// Chunking
// =============================================================================

/// How a buffer of `total` bytes is cut into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub total: usize,
    pub chunk_size: usize,
    pub n_chunks: usize,
}

impl ChunkPlan {
    /// Byte ranges of each chunk; the last one takes the remainder
    pub fn ranges(&self) -> Vec<Range<usize>> {
        (0..self.n_chunks)
            .map(|i| {
                let start = (i * self.chunk_size).min(self.total);
                let end = if i + 1 == self.n_chunks {
                    self.total
                } else {
                    (start + self.chunk_size).min(self.total)
                };
                start..end
            })
            .collect()
    }
}

/// Pick chunk size and count for a buffer of `total` bytes.
///
/// Small buffers become a single chunk; an empty buffer becomes one empty
/// chunk. Larger ones get `total / target`
/// chunks (capped at `max_chunks`), each sized `total / n` rounded up in
/// alignment steps until the chunks cover the whole buffer.
pub fn choose_chunking(total: usize, max_chunks: usize) -> Result<ChunkPlan> {
    if max_chunks == 0 {
        return Err(FtError::InvalidState(
            "chunk limit must be at least 1".to_string(),
        ));
    }

    let n_chunks = total / TARGET_SUB_BLOCK_SIZE;
    if n_chunks <= 1 {
        return Ok(ChunkPlan {
            total,
            chunk_size: total,
            n_chunks: 1,
        });
    }

    let n_chunks = n_chunks.min(max_chunks);
    let mut chunk_size = total / n_chunks;
    let deficit = total - chunk_size * n_chunks;
    if deficit > 0 {
        chunk_size += SUB_BLOCK_ALIGNMENT * deficit.div_ceil(SUB_BLOCK_ALIGNMENT * n_chunks);
    }
    if chunk_size > MAX_SUB_BLOCK_SIZE {
        return Err(FtError::SizeOutOfBounds(format!(
            "{} bytes in {} chunks needs {}-byte chunks (limit {})",
            total, n_chunks, chunk_size, MAX_SUB_BLOCK_SIZE
        )));
    }

    Ok(ChunkPlan {
        total,
        chunk_size,
        n_chunks,
    })
}

/// Exact size of a chunk table for `n_chunks` chunks
pub fn chunk_header_size(n_chunks: usize) -> usize {
    4 + CHUNK_ENTRY_SIZE * n_chunks
}

// =============================================================================
// Sub-block
// =============================================================================

/// One compressed chunk plus the sizes needed to frame and verify it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubBlock {
    pub uncompressed_size: usize,
    /// Worst-case compressed size estimated before compressing
    pub compressed_size_bound: usize,
    pub compressed: Vec<u8>,
    /// Checksum over `compressed` alone (chunk-table form)
    pub xsum: u32,
}

impl SubBlock {
    pub fn compress(method: CompressionMethod, raw: &[u8]) -> Result<Self> {
        if raw.len() > MAX_SUB_BLOCK_SIZE {
            return Err(FtError::SizeOutOfBounds(format!(
                "sub-block of {} bytes exceeds {}",
                raw.len(),
                MAX_SUB_BLOCK_SIZE
            )));
        }
        let compressed_size_bound = method.compress_bound(raw.len());
        let compressed = method.compress(raw)?;
        if compressed.len() > compressed_size_bound {
            return Err(FtError::Compression(format!(
                "{:?} produced {} bytes, over its bound of {}",
                method,
                compressed.len(),
                compressed_size_bound
            )));
        }
        if compressed.len() > MAX_SUB_BLOCK_SIZE {
            return Err(FtError::SizeOutOfBounds(format!(
                "compressed sub-block of {} bytes exceeds {}",
                compressed.len(),
                MAX_SUB_BLOCK_SIZE
            )));
        }
        let xsum = checksum(&compressed);
        Ok(Self {
            uncompressed_size: raw.len(),
            compressed_size_bound,
            compressed,
            xsum,
        })
    }

    /// On-disk size in the framed shape
    pub fn framed_len(&self) -> usize {
        FRAME_OVERHEAD + self.compressed.len()
    }

    pub fn write_framed(&self, wb: &mut WriteBuffer) {
        wb.start_checksum();
        wb.put_u32(self.compressed.len() as u32);
        wb.put_u32(self.uncompressed_size as u32);
        wb.put_bytes(&self.compressed);
        wb.put_checksum();
    }

    pub fn to_framed_bytes(&self) -> Vec<u8> {
        let mut wb = WriteBuffer::new(self.framed_len());
        self.write_framed(&mut wb);
        wb.finish()
    }
}

/// A framed sub-block whose checksum has been verified
#[derive(Debug, Clone, Copy)]
pub struct FramedSubBlock<'a> {
    pub compressed: &'a [u8],
    pub uncompressed_size: usize,
}

impl<'a> FramedSubBlock<'a> {
    /// Read and verify one frame at the cursor
    pub fn read(rb: &mut ReadBuffer<'a>, region: &str) -> Result<Self> {
        let start = rb.position();
        let csize = rb.get_u32()? as usize;
        let usize_ = rb.get_u32()? as usize;
        check_sub_block_sizes(region, csize, usize_)?;
        let compressed = rb.get_bytes(csize)?;
        let covered = rb.since(start);
        let stored = rb.get_u32()?;
        let computed = checksum(covered);
        if stored != computed {
            return Err(FtError::checksum(region, stored, computed));
        }
        Ok(Self {
            compressed,
            uncompressed_size: usize_,
        })
    }

    /// Parse a buffer holding exactly one frame
    pub fn parse(bytes: &'a [u8], region: &str) -> Result<Self> {
        let mut rb = ReadBuffer::new(bytes);
        let frame = Self::read(&mut rb, region)?;
        rb.expect_end(region)?;
        Ok(frame)
    }

    pub fn decompress(&self, method: CompressionMethod) -> Result<Vec<u8>> {
        method.decompress(self.compressed, self.uncompressed_size)
    }
}

fn check_sub_block_sizes(region: &str, compressed: usize, uncompressed: usize) -> Result<()> {
    if compressed > MAX_SUB_BLOCK_SIZE || uncompressed > MAX_SUB_BLOCK_SIZE {
        return Err(FtError::SizeOutOfBounds(format!(
            "{}: declared sizes {} compressed / {} uncompressed exceed {}",
            region, compressed, uncompressed, MAX_SUB_BLOCK_SIZE
        )));
    }
    Ok(())
}

// =============================================================================
// Chunked form
// =============================================================================

/// Compress every chunk of `data` independently across the pool
pub fn compress_all(
    data: &[u8],
    plan: &ChunkPlan,
    method: CompressionMethod,
    pool: &WorkerPool,
) -> Result<Vec<SubBlock>> {
    debug_assert_eq!(plan.total, data.len());
    let ranges = plan.ranges();
    pool.sized_for(data.len())
        .map(&ranges, |_, range| SubBlock::compress(method, &data[range.clone()]))
        .into_iter()
        .collect()
}

/// Exact on-disk size of a chunk table plus its chunks
pub fn chunked_len(blocks: &[SubBlock]) -> usize {
    chunk_header_size(blocks.len()) + blocks.iter().map(|b| b.compressed.len()).sum::<usize>()
}

pub fn write_chunked(wb: &mut WriteBuffer, blocks: &[SubBlock]) {
    wb.put_u32(blocks.len() as u32);
    for block in blocks {
        wb.put_u32(block.compressed.len() as u32);
        wb.put_u32(block.uncompressed_size as u32);
        wb.put_u32(block.xsum);
    }
    for block in blocks {
        wb.put_bytes(&block.compressed);
    }
}

struct StoredChunk<'a> {
    compressed: &'a [u8],
    uncompressed_size: usize,
    xsum: u32,
}

/// Read a chunk table at the cursor and return the concatenated chunks
pub fn decompress_all(
    rb: &mut ReadBuffer<'_>,
    method: CompressionMethod,
    pool: &WorkerPool,
) -> Result<Vec<u8>> {
    let n_chunks = rb.get_u32()? as usize;
    if n_chunks == 0 || n_chunks > MAX_CHUNKS_ON_DISK {
        return Err(FtError::BadFormat(format!(
            "chunk table declares {} chunks",
            n_chunks
        )));
    }
    if n_chunks * CHUNK_ENTRY_SIZE > rb.remaining() {
        return Err(FtError::BadFormat(format!(
            "chunk table of {} entries overruns the block",
            n_chunks
        )));
    }

    let mut table = Vec::with_capacity(n_chunks);
    for i in 0..n_chunks {
        let csize = rb.get_u32()? as usize;
        let usize_ = rb.get_u32()? as usize;
        let xsum = rb.get_u32()?;
        check_sub_block_sizes(&format!("chunk {}", i), csize, usize_)?;
        table.push((csize, usize_, xsum));
    }

    let mut chunks = Vec::with_capacity(n_chunks);
    let mut total = 0usize;
    for &(csize, usize_, xsum) in &table {
        chunks.push(StoredChunk {
            compressed: rb.get_bytes(csize)?,
            uncompressed_size: usize_,
            xsum,
        });
        total += usize_;
    }

    let decoded = pool.sized_for(total).map(&chunks, |i, chunk| {
        let computed = checksum(chunk.compressed);
        if computed != chunk.xsum {
            return Err(FtError::checksum(format!("chunk {}", i), chunk.xsum, computed));
        }
        method.decompress(chunk.compressed, chunk.uncompressed_size)
    });

    let mut out = try_alloc(total)?;
    for part in decoded {
        out.extend_from_slice(&part?);
    }
    Ok(out)
}

/// Checksum a frame stores over its two sizes and compressed bytes, for
/// assembling frames outside [`SubBlock::write_framed`].
pub fn frame_checksum(compressed: &[u8], uncompressed_size: usize) -> u32 {
    let mut sum = Checksum::new();
    sum.update(&(compressed.len() as u32).to_le_bytes());
    sum.update(&(uncompressed_size as u32).to_le_bytes());
    sum.update(compressed);
    sum.finish()
}
