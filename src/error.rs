//! Error types for ftnode
//!
//! Provides a unified error type for node encoding and decoding.

use thiserror::Error;

/// Result type alias using FtError
pub type Result<T> = std::result::Result<T, FtError>;

/// Unified error type for node (de)serialization
#[derive(Debug, Error)]
pub enum FtError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Corruption
    // -------------------------------------------------------------------------
    /// Magic missing, or structural fields inconsistent with the bytes present.
    #[error("Bad node format: {0}")]
    BadFormat(String),

    #[error("Checksum mismatch in {region}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        region: String,
        stored: u32,
        computed: u32,
    },

    /// A declared size exceeded a sanity bound no legitimate block reaches.
    #[error("Size out of bounds: {0}")]
    SizeOutOfBounds(String),

    // -------------------------------------------------------------------------
    // Version Errors
    // -------------------------------------------------------------------------
    #[error("Layout version {version} is too old (oldest readable version is {min_supported})")]
    VersionTooOld { version: u32, min_supported: u32 },

    #[error("Layout version {version} is too new (this build reads up to version {current})")]
    VersionTooNew { version: u32, current: u32 },

    // -------------------------------------------------------------------------
    // Resource Errors
    // -------------------------------------------------------------------------
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Compression error: {0}")]
    Compression(String),

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("Invalid node state: {0}")]
    InvalidState(String),
}

impl FtError {
    /// True when the error means the bytes on disk cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            FtError::BadFormat(_)
                | FtError::ChecksumMismatch { .. }
                | FtError::SizeOutOfBounds(_)
                | FtError::VersionTooOld { .. }
                | FtError::VersionTooNew { .. }
        )
    }

    pub(crate) fn checksum(region: impl Into<String>, stored: u32, computed: u32) -> Self {
        FtError::ChecksumMismatch {
            region: region.into(),
            stored,
            computed,
        }
    }
}
