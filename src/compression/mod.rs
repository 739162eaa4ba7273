//! Compression Module
//!
//! Compression backends, the bounded worker pool used to fan out independent
//! (de)compression jobs, and the sub-block engine that frames compressed
//! chunks with their sizes and checksums.
//!
//! The method is an environment-wide setting and is never recorded inside a
//! block, so every decompression call is told which method to use.
//!
//! ## Method Tags
//! - 0:  no compression
//! - 7:  snappy
//! - 8:  zlib (default; also the default for environments with no stored tag)
//! - 9:  lz4 block
//! - 11: zlib without the zlib wrapper/checksum (raw deflate)

mod pool;
pub mod subblock;

use std::io::{Read, Write};

use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, ZlibEncoder};
use flate2::Compression;

use crate::buffer::try_alloc;
use crate::error::{FtError, Result};

pub use pool::{WorkerPool, PARALLEL_MIN_BYTES};
pub use subblock::{choose_chunking, ChunkPlan, FramedSubBlock, SubBlock};

/// Compression method, selected per environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CompressionMethod {
    None = 0,
    Snappy = 7,
    Zlib = 8,
    Lz4 = 9,
    ZlibRaw = 11,
}

impl CompressionMethod {
    /// Method assumed for environments that never persisted a tag
    pub const LEGACY_DEFAULT: CompressionMethod = CompressionMethod::Zlib;

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(CompressionMethod::None),
            7 => Ok(CompressionMethod::Snappy),
            8 => Ok(CompressionMethod::Zlib),
            9 => Ok(CompressionMethod::Lz4),
            11 => Ok(CompressionMethod::ZlibRaw),
            _ => Err(FtError::BadFormat(format!(
                "unknown compression method tag {}",
                tag
            ))),
        }
    }

    /// Resolve the tag stored in an environment header, if any
    pub fn from_stored_tag(tag: Option<u8>) -> Result<Self> {
        match tag {
            Some(tag) => Self::from_tag(tag),
            None => Ok(Self::LEGACY_DEFAULT),
        }
    }

    /// Worst-case compressed size for `len` input bytes
    pub fn compress_bound(self, len: usize) -> usize {
        match self {
            CompressionMethod::None => len,
            CompressionMethod::Snappy => snap::raw::max_compress_len(len),
            CompressionMethod::Zlib | CompressionMethod::ZlibRaw => {
                len + (len >> 12) + (len >> 14) + (len >> 25) + 13
            }
            CompressionMethod::Lz4 => lz4_flex::block::get_maximum_output_size(len),
        }
    }

    pub fn compress(self, input: &[u8]) -> Result<Vec<u8>> {
        match self {
            CompressionMethod::None => Ok(input.to_vec()),
            CompressionMethod::Snappy => snap::raw::Encoder::new()
                .compress_vec(input)
                .map_err(|e| FtError::Compression(format!("snappy: {}", e))),
            CompressionMethod::Zlib => {
                let out = Vec::with_capacity(self.compress_bound(input.len()));
                let mut encoder = ZlibEncoder::new(out, Compression::default());
                encoder.write_all(input)?;
                Ok(encoder.finish()?)
            }
            CompressionMethod::ZlibRaw => {
                let out = Vec::with_capacity(self.compress_bound(input.len()));
                let mut encoder = DeflateEncoder::new(out, Compression::default());
                encoder.write_all(input)?;
                Ok(encoder.finish()?)
            }
            CompressionMethod::Lz4 => Ok(lz4_flex::block::compress(input)),
        }
    }

    /// Decompress into exactly `expected_len` bytes.
    ///
    /// Any disagreement between the stream and `expected_len` is corruption.
    pub fn decompress(self, input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let mut out = try_alloc(expected_len)?;
        match self {
            CompressionMethod::None => out.extend_from_slice(input),
            CompressionMethod::Snappy => {
                let declared = snap::raw::decompress_len(input).map_err(|e| corrupt(self, e))?;
                if declared != expected_len {
                    return Err(length_mismatch(self, declared, expected_len));
                }
                out.resize(expected_len, 0);
                snap::raw::Decoder::new()
                    .decompress(input, &mut out)
                    .map_err(|e| corrupt(self, e))?;
            }
            CompressionMethod::Zlib => {
                ZlibDecoder::new(input)
                    .take(expected_len as u64 + 1)
                    .read_to_end(&mut out)
                    .map_err(|e| corrupt(self, e))?;
            }
            CompressionMethod::ZlibRaw => {
                DeflateDecoder::new(input)
                    .take(expected_len as u64 + 1)
                    .read_to_end(&mut out)
                    .map_err(|e| corrupt(self, e))?;
            }
            CompressionMethod::Lz4 => {
                out.resize(expected_len, 0);
                let written = lz4_flex::block::decompress_into(input, &mut out)
                    .map_err(|e| corrupt(self, e))?;
                out.truncate(written);
            }
        }
        if out.len() != expected_len {
            return Err(length_mismatch(self, out.len(), expected_len));
        }
        Ok(out)
    }
}

fn corrupt(method: CompressionMethod, err: impl std::fmt::Display) -> FtError {
    FtError::BadFormat(format!("{:?} stream is corrupt: {}", method, err))
}

fn length_mismatch(method: CompressionMethod, actual: usize, expected: usize) -> FtError {
    FtError::BadFormat(format!(
        "{:?} stream decompressed to {} bytes, expected {}",
        method, actual, expected
    ))
}
