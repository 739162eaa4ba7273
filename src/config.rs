//! Configuration for ftnode
//!
//! Codec and node-store settings with sensible defaults.

use crate::compression::CompressionMethod;

/// Node size recorded in new nodes (4 MB)
pub const DEFAULT_NODE_SIZE: u32 = 4 * 1024 * 1024;

/// Leaf rebalance budget per basement (128 KB)
pub const DEFAULT_BASEMENT_SIZE: usize = 128 * 1024;

/// Prefix read by the header-only fast path (32 KB)
pub const DEFAULT_HEADER_READ_LIMIT: usize = 32 * 1024;

/// Upper bound on compression workers when sized from the machine
const MAX_DEFAULT_WORKERS: usize = 8;

/// Main configuration for a node codec and its store
#[derive(Debug, Clone)]
pub struct CodecConfig {
    // -------------------------------------------------------------------------
    // Encoding
    // -------------------------------------------------------------------------
    /// Environment-wide compression method; never stored inside a block
    pub compression_method: CompressionMethod,

    /// Target bytes per basement when a leaf is rebalanced
    pub basement_size: usize,

    /// `node_size` recorded in nodes created by the store
    pub node_size: u32,

    // -------------------------------------------------------------------------
    // Decoding
    // -------------------------------------------------------------------------
    /// Bytes read up front by the header-only fast path
    pub header_read_limit: usize,

    // -------------------------------------------------------------------------
    // Resources
    // -------------------------------------------------------------------------
    /// Threads used to (de)compress partitions and chunks; 1 runs inline.
    /// Nodes smaller than [`PARALLEL_MIN_BYTES`](crate::compression::PARALLEL_MIN_BYTES)
    /// always run inline.
    pub worker_threads: usize,

    /// Alignment of block offsets handed out by the allocator
    pub block_alignment: u64,
}

impl Default for CodecConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_DEFAULT_WORKERS);
        Self {
            compression_method: CompressionMethod::Zlib,
            basement_size: DEFAULT_BASEMENT_SIZE,
            node_size: DEFAULT_NODE_SIZE,
            header_read_limit: DEFAULT_HEADER_READ_LIMIT,
            worker_threads: workers,
            block_alignment: 4096,
        }
    }
}

impl CodecConfig {
    /// Create a new config builder
    pub fn builder() -> CodecConfigBuilder {
        CodecConfigBuilder::default()
    }
}

/// Builder for CodecConfig
#[derive(Default)]
pub struct CodecConfigBuilder {
    config: CodecConfig,
}

impl CodecConfigBuilder {
    /// Set the compression method
    pub fn compression_method(mut self, method: CompressionMethod) -> Self {
        self.config.compression_method = method;
        self
    }

    /// Set the basement size budget (in bytes)
    pub fn basement_size(mut self, size: usize) -> Self {
        self.config.basement_size = size;
        self
    }

    /// Set the node size recorded in new nodes (in bytes)
    pub fn node_size(mut self, size: u32) -> Self {
        self.config.node_size = size;
        self
    }

    /// Set the fast-path prefix bound (in bytes)
    pub fn header_read_limit(mut self, limit: usize) -> Self {
        self.config.header_read_limit = limit;
        self
    }

    /// Set the number of worker threads (at least 1)
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.config.worker_threads = threads.max(1);
        self
    }

    /// Set the block alignment (a power of two)
    pub fn block_alignment(mut self, alignment: u64) -> Self {
        self.config.block_alignment = alignment;
        self
    }

    pub fn build(self) -> CodecConfig {
        self.config
    }
}
