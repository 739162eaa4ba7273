//! # ftnode
//!
//! On-disk page format for fractal-tree (B-epsilon tree) nodes:
//! - Compressed, checksummed, versioned node blocks
//! - Per-partition sub-blocks that can be decoded lazily
//! - Header-only reads that skip partitions a lookup does not need
//! - Transparent upgrade from older layouts
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        NodeStore                            │
//! │        (block numbers, copy-on-write writes, reads)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        NodeCodec                            │
//! │     (header, node info, partitions, legacy upgrade)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ Sub-blocks  │          │    Node     │
//!   │ (compress,  │          │ (basements, │
//!   │  checksum)  │          │  messages)  │
//!   └──────┬──────┘          └─────────────┘
//!          │
//!          ▼
//!   ┌─────────────┐
//!   │ Block device│
//!   │ (file, mem) │
//!   └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod checksum;
pub mod buffer;
pub mod compression;
pub mod node;
pub mod serialize;
pub mod storage;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{FtError, Result};
pub use config::CodecConfig;
pub use compression::CompressionMethod;
pub use node::{BlockNum, Msn, Node};
pub use serialize::{FetchPlan, NodeCodec, SerializedNode};
pub use storage::NodeStore;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of ftnode
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
