//! Node Store
//!
//! Ties a codec, a block device and an allocator together.
//!
//! ## Responsibilities
//! - Hand out block numbers for new nodes
//! - Write nodes copy-on-write and track where each block number lives
//! - Read nodes back (header-only read first, full read as fallback)
//! - Fetch partitions a read left on disk

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::config::CodecConfig;
use crate::error::{FtError, Result};
use crate::node::{BlockNum, Node};
use crate::serialize::{FetchPlan, NodeCodec};

use super::{BlockAllocator, BlockDevice, BlockLocation, BumpAllocator, FileDevice, MemoryDevice};

/// Stores nodes as blocks on a device
///
/// ## Concurrency:
/// - `translation`: Protected by RwLock (many concurrent readers, exclusive writer)
/// - `next_blocknum`: Atomic counter (lock-free)
/// - All methods use `&self` except those that mutate a caller's node
pub struct NodeStore {
    device: Arc<dyn BlockDevice>,
    allocator: Arc<dyn BlockAllocator>,
    codec: NodeCodec,
    config: CodecConfig,

    /// Where the latest copy of each block lives
    translation: RwLock<HashMap<BlockNum, BlockLocation>>,

    /// Next block number for new nodes (atomic, lock-free)
    next_blocknum: AtomicU64,
}

impl NodeStore {
    pub fn new(
        device: Arc<dyn BlockDevice>,
        allocator: Arc<dyn BlockAllocator>,
        codec: NodeCodec,
        config: CodecConfig,
    ) -> Self {
        Self {
            device,
            allocator,
            codec,
            config,
            translation: RwLock::new(HashMap::new()),
            next_blocknum: AtomicU64::new(1),
        }
    }

    /// Store backed by memory
    pub fn in_memory(config: CodecConfig) -> Result<Self> {
        let allocator = BumpAllocator::new(0, config.block_alignment)?;
        let codec = NodeCodec::new(&config);
        Ok(Self::new(
            Arc::new(MemoryDevice::new()),
            Arc::new(allocator),
            codec,
            config,
        ))
    }

    /// Store backed by the file at `path`.
    ///
    /// New blocks are appended after the file's current end.
    pub fn open_file(path: &Path, config: CodecConfig) -> Result<Self> {
        let device = FileDevice::open(path)?;
        let allocator = BumpAllocator::new(device.len()?, config.block_alignment)?;
        let codec = NodeCodec::new(&config);
        Ok(Self::new(Arc::new(device), Arc::new(allocator), codec, config))
    }

    /// Replace the codec (e.g. to install a comparator)
    pub fn with_codec(mut self, codec: NodeCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn codec(&self) -> &NodeCodec {
        &self.codec
    }

    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    // =========================================================================
    // Block numbers
    // =========================================================================

    pub fn allocate_blocknum(&self) -> BlockNum {
        BlockNum(self.next_blocknum.fetch_add(1, Ordering::SeqCst))
    }

    /// Empty leaf with a fresh block number and the configured node size
    pub fn create_leaf(&self) -> Node {
        let mut node = Node::empty_leaf(self.allocate_blocknum());
        node.node_size = self.config.node_size;
        node
    }

    /// Record a block written by someone else
    pub fn register(&self, blocknum: BlockNum, location: BlockLocation) {
        self.translation.write().insert(blocknum, location);
        self.next_blocknum.fetch_max(blocknum.0 + 1, Ordering::SeqCst);
    }

    pub fn location(&self, blocknum: BlockNum) -> Option<BlockLocation> {
        self.translation.read().get(&blocknum).copied()
    }

    pub fn block_count(&self) -> usize {
        self.translation.read().len()
    }

    // =========================================================================
    // Nodes
    // =========================================================================

    /// Serialize `node`, write it to a fresh location and mark it clean.
    ///
    /// The previous location of the block, if any, is freed once the new one
    /// is in place.
    pub fn write_node(&self, node: &mut Node, rebalance: bool) -> Result<BlockLocation> {
        let serialized = self
            .codec
            .serialize_node_to_memory(node, self.config.basement_size, rebalance)?;
        let size = serialized.bytes.len() as u64;
        let location = self.allocator.allocate(size)?;
        self.device.write_block(location.offset, &serialized.bytes)?;

        let previous = self.translation.write().insert(node.blocknum, location);
        if let Some(previous) = previous {
            self.allocator.free(previous);
        }
        node.mark_clean();

        debug!(
            blocknum = node.blocknum.0,
            offset = location.offset,
            size,
            "Wrote node"
        );
        Ok(location)
    }

    pub fn read_node(&self, blocknum: BlockNum, plan: &FetchPlan) -> Result<Node> {
        let location = self.lookup(blocknum)?;
        self.codec
            .deserialize_node(self.device.as_ref(), blocknum, location, plan)
    }

    /// Make one partition of a node read from this store available
    pub fn fetch_partition(&self, node: &mut Node, child: usize) -> Result<()> {
        let location = self.lookup(node.blocknum)?;
        self.codec
            .fetch_partition(self.device.as_ref(), location, node, child)
    }

    pub fn sync(&self) -> Result<()> {
        self.device.sync()
    }

    fn lookup(&self, blocknum: BlockNum) -> Result<BlockLocation> {
        self.location(blocknum).ok_or_else(|| {
            FtError::InvalidState(format!("block {} has never been written", blocknum.0))
        })
    }
}
