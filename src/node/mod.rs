//! Node Module
//!
//! In-memory form of a fractal-tree node.
//!
//! ## Structure
//! ```text
//! Node (height 0 = leaf, > 0 = internal)
//! ├── pivots[n - 1]      separator keys, ascending under the tree comparator
//! └── partitions[n]      one per child
//!     ├── blocknum       internal nodes only: the child's block
//!     ├── location       (start, size) of the partition inside the last block
//!     └── state
//!         ├── Available(Basement | MessageBuffer)
//!         ├── Compressed(framed sub-block bytes)
//!         ├── OnDisk
//!         └── Invalid
//! ```
//!
//! A partition owns exactly one representation at a time; the enum makes any
//! other combination unrepresentable.

pub mod basement;
pub mod leafentry;
pub mod msgbuf;
pub mod rebalance;

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::config::DEFAULT_NODE_SIZE;
use crate::error::{FtError, Result};
use crate::serialize::{BUILD_ID, LAYOUT_VERSION};

pub use basement::Basement;
pub use leafentry::{LeafEntry, TxnOp, TxnRecord};
pub use msgbuf::{Message, MessageBuffer, MessageKind, Xids};
pub use rebalance::{plan_basements, rebalance_leaf};

/// Total order over user keys
pub type Comparator = Arc<dyn Fn(&[u8], &[u8]) -> Ordering + Send + Sync>;

/// Plain lexicographic byte order
pub fn bytewise() -> Comparator {
    Arc::new(|a: &[u8], b: &[u8]| a.cmp(b))
}

// =============================================================================
// Identifiers
// =============================================================================

/// Logical block number of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockNum(pub u64);

/// Message sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Msn(pub u64);

impl Msn {
    pub const ZERO: Msn = Msn(0);
    /// Smallest number handed out to live messages; everything below is
    /// reserved for messages upgraded from layouts that lacked sequence numbers.
    pub const MIN: Msn = Msn(1 << 62);
    pub const MAX: Msn = Msn(u64::MAX);
}

/// Transaction id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TxnId(pub u64);

// =============================================================================
// Partitions
// =============================================================================

/// Where a partition's framed sub-block sits inside its node's block.
/// Offsets are relative to the start of the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionLocation {
    pub start: u32,
    pub size: u32,
}

impl PartitionLocation {
    pub fn end(&self) -> u64 {
        self.start as u64 + self.size as u64
    }
}

/// Decoded partition payload
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionData {
    Leaf(Basement),
    Internal(MessageBuffer),
}

/// Materialization state of one partition
#[derive(Clone, PartialEq)]
pub enum PartitionState {
    Available(PartitionData),
    /// The partition's framed sub-block, exactly as it appears on disk
    Compressed(Bytes),
    OnDisk,
    Invalid,
}

impl PartitionState {
    pub fn name(&self) -> &'static str {
        match self {
            PartitionState::Available(_) => "available",
            PartitionState::Compressed(_) => "compressed",
            PartitionState::OnDisk => "on-disk",
            PartitionState::Invalid => "invalid",
        }
    }
}

impl fmt::Debug for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionState::Available(data) => f.debug_tuple("Available").field(data).finish(),
            PartitionState::Compressed(frame) => {
                write!(f, "Compressed({} bytes)", frame.len())
            }
            PartitionState::OnDisk => f.write_str("OnDisk"),
            PartitionState::Invalid => f.write_str("Invalid"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// Child block, set for internal nodes only
    pub blocknum: Option<BlockNum>,
    pub location: PartitionLocation,
    pub state: PartitionState,
}

impl Partition {
    pub fn leaf(basement: Basement) -> Self {
        Self {
            blocknum: None,
            location: PartitionLocation::default(),
            state: PartitionState::Available(PartitionData::Leaf(basement)),
        }
    }

    pub fn internal(child: BlockNum, buffer: MessageBuffer) -> Self {
        Self {
            blocknum: Some(child),
            location: PartitionLocation::default(),
            state: PartitionState::Available(PartitionData::Internal(buffer)),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state, PartitionState::Available(_))
    }
}

// =============================================================================
// Node
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub blocknum: BlockNum,
    pub height: u32,
    pub layout_version: u32,
    pub layout_version_original: u32,
    pub build_id: u32,
    pub max_msn_applied: Msn,
    pub node_size: u32,
    pub flags: u32,
    pub pivots: Vec<Vec<u8>>,
    pub partitions: Vec<Partition>,
    pub dirty: bool,
}

impl Node {
    /// Leaf with a single empty basement
    pub fn empty_leaf(blocknum: BlockNum) -> Self {
        Self::with_partitions(blocknum, 0, Vec::new(), vec![Partition::leaf(Basement::new())])
    }

    /// Leaf holding `basements`, separated by `pivots`
    pub fn new_leaf(blocknum: BlockNum, pivots: Vec<Vec<u8>>, basements: Vec<Basement>) -> Result<Self> {
        check_shape(pivots.len(), basements.len())?;
        let partitions = basements.into_iter().map(Partition::leaf).collect();
        Ok(Self::with_partitions(blocknum, 0, pivots, partitions))
    }

    /// Internal node of the given height with one buffer per child
    pub fn new_internal(
        blocknum: BlockNum,
        height: u32,
        pivots: Vec<Vec<u8>>,
        children: Vec<(BlockNum, MessageBuffer)>,
    ) -> Result<Self> {
        if height == 0 {
            return Err(FtError::InvalidState(
                "internal nodes must have height > 0".to_string(),
            ));
        }
        check_shape(pivots.len(), children.len())?;
        let partitions = children
            .into_iter()
            .map(|(child, buffer)| Partition::internal(child, buffer))
            .collect();
        Ok(Self::with_partitions(blocknum, height, pivots, partitions))
    }

    fn with_partitions(
        blocknum: BlockNum,
        height: u32,
        pivots: Vec<Vec<u8>>,
        partitions: Vec<Partition>,
    ) -> Self {
        Self {
            blocknum,
            height,
            layout_version: LAYOUT_VERSION,
            layout_version_original: LAYOUT_VERSION,
            build_id: BUILD_ID,
            max_msn_applied: Msn::ZERO,
            node_size: DEFAULT_NODE_SIZE,
            flags: 0,
            pivots,
            partitions,
            dirty: true,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.height == 0
    }

    pub fn n_children(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn partition(&self, child: usize) -> Result<&Partition> {
        self.partitions.get(child).ok_or_else(|| out_of_range(child, self.partitions.len()))
    }

    pub fn partition_mut(&mut self, child: usize) -> Result<&mut Partition> {
        let n = self.partitions.len();
        self.partitions.get_mut(child).ok_or_else(|| out_of_range(child, n))
    }

    /// Decoded basement of a leaf partition, if available
    pub fn basement(&self, child: usize) -> Option<&Basement> {
        match &self.partitions.get(child)?.state {
            PartitionState::Available(PartitionData::Leaf(basement)) => Some(basement),
            _ => None,
        }
    }

    pub fn basement_mut(&mut self, child: usize) -> Option<&mut Basement> {
        match &mut self.partitions.get_mut(child)?.state {
            PartitionState::Available(PartitionData::Leaf(basement)) => Some(basement),
            _ => None,
        }
    }

    /// Decoded message buffer of an internal partition, if available
    pub fn message_buffer(&self, child: usize) -> Option<&MessageBuffer> {
        match &self.partitions.get(child)?.state {
            PartitionState::Available(PartitionData::Internal(buffer)) => Some(buffer),
            _ => None,
        }
    }

    pub fn message_buffer_mut(&mut self, child: usize) -> Option<&mut MessageBuffer> {
        match &mut self.partitions.get_mut(child)?.state {
            PartitionState::Available(PartitionData::Internal(buffer)) => Some(buffer),
            _ => None,
        }
    }

    pub fn child_blocknum(&self, child: usize) -> Option<BlockNum> {
        self.partitions.get(child)?.blocknum
    }

    pub fn all_available(&self) -> bool {
        self.partitions.iter().all(Partition::is_available)
    }

    /// Index of the child whose key range covers `key`
    pub fn which_child(&self, key: &[u8], cmp: &Comparator) -> usize {
        self.pivots
            .iter()
            .position(|pivot| cmp(key, pivot) != Ordering::Greater)
            .unwrap_or(self.partitions.len().saturating_sub(1))
    }
}

fn check_shape(n_pivots: usize, n_children: usize) -> Result<()> {
    if n_children == 0 || n_pivots + 1 != n_children {
        return Err(FtError::InvalidState(format!(
            "{} pivots cannot separate {} children",
            n_pivots, n_children
        )));
    }
    Ok(())
}

fn out_of_range(child: usize, n: usize) -> FtError {
    FtError::InvalidState(format!("child {} out of range for a node with {} children", child, n))
}
