//! Serialize Module
//!
//! Turns a [`Node`](crate::node::Node) into one contiguous block and back.
//!
//! ## Block Format (layout 20)
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │ Header: magic, versions, build id, partition table, checksum       │
//! ├────────────────────────────────────────────────────────────────────┤
//! │ Node info frame: pivots, child block numbers, node-wide scalars    │
//! ├────────────────────────────────────────────────────────────────────┤
//! │ Partition 0 frame                                                  │
//! ├────────────────────────────────────────────────────────────────────┤
//! │ ...                                                                │
//! ├────────────────────────────────────────────────────────────────────┤
//! │ Partition n-1 frame (ends exactly at the end of the block)         │
//! └────────────────────────────────────────────────────────────────────┘
//!
//! frame: csize u32 | usize u32 | compressed bytes | checksum u32
//! ```
//!
//! ## Read paths
//! - Header-only: read a bounded prefix, decode header and info, and only
//!   the partitions the fetch plan asks for. Anything else stays compressed
//!   (if it was in the prefix) or on disk.
//! - Full: read the whole block and decode it, upgrading legacy layouts.
//!
//! ## Decode stages
//! ```text
//! ReadingHeader -> HeaderOk -> DecodingCurrentFormat | UpgradingFromLegacy
//!               -> PartitionsPending -> PartitionsAvailable
//! ```
//! A failure at any stage is logged with the stage and a hex dump of the
//! bytes being decoded.

mod codec;
pub mod header;
pub mod info;
pub mod partition;
mod upgrade;
pub mod version;

use std::fmt;

use tracing::error;

use crate::error::FtError;
use crate::node::{bytewise, BlockNum, Comparator, Node, PartitionLocation};

pub use codec::NodeCodec;
pub use header::{deserialize_header, header_size, serialize_header, NodeHeader};
pub use info::{deserialize_info, serialize_info, NodeInfo};
pub use partition::{deserialize_partition, serialize_partition};
pub use upgrade::{MsnSource, UpgradeMsnCounter};
pub use version::{
    legacy_header_size, schema, LayoutSchema, BUILD_ID, LAYOUT_VERSION, MIN_SUPPORTED_VERSION,
};

/// Corrupt blocks are dumped up to this many bytes
const MAX_DUMP_BYTES: usize = 64 * 1024;
const DUMP_LINE_BYTES: usize = 32;

// =============================================================================
// Fetch plans
// =============================================================================

/// Which partitions a read should decode right away
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    /// Header and node info only
    Minimal,
    All,
    Children(Vec<usize>),
    /// The child covering one key
    Key(Vec<u8>),
    /// Every child overlapping `[start, end]`
    Range { start: Vec<u8>, end: Vec<u8> },
}

impl FetchPlan {
    /// Per-child decision for a node with the given pivots
    pub fn wanted(&self, node: &Node, cmp: Option<&Comparator>) -> Vec<bool> {
        let n = node.n_children();
        match self {
            FetchPlan::Minimal => vec![false; n],
            FetchPlan::All => vec![true; n],
            FetchPlan::Children(children) => {
                let mut wanted = vec![false; n];
                for &child in children {
                    if let Some(slot) = wanted.get_mut(child) {
                        *slot = true;
                    }
                }
                wanted
            }
            FetchPlan::Key(key) => {
                let child = node.which_child(key, &resolve(cmp));
                (0..n).map(|i| i == child).collect()
            }
            FetchPlan::Range { start, end } => {
                let cmp = resolve(cmp);
                let first = node.which_child(start, &cmp);
                let last = node.which_child(end, &cmp);
                (0..n).map(|i| i >= first && i <= last).collect()
            }
        }
    }
}

fn resolve(cmp: Option<&Comparator>) -> Comparator {
    cmp.cloned().unwrap_or_else(bytewise)
}

/// A serialized node and where each partition landed inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedNode {
    pub bytes: Vec<u8>,
    pub partitions: Vec<PartitionLocation>,
}

// =============================================================================
// Corruption reporting
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    ReadingHeader,
    HeaderOk,
    DecodingCurrentFormat,
    UpgradingFromLegacy,
    PartitionsPending,
    PartitionsAvailable,
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecodeStage::ReadingHeader => "reading header",
            DecodeStage::HeaderOk => "header ok",
            DecodeStage::DecodingCurrentFormat => "decoding current format",
            DecodeStage::UpgradingFromLegacy => "upgrading from legacy format",
            DecodeStage::PartitionsPending => "partitions pending",
            DecodeStage::PartitionsAvailable => "partitions available",
        };
        f.write_str(name)
    }
}

/// Hex dump, 32 bytes per line with offsets, capped at 64 KiB
pub fn hex_dump(bytes: &[u8]) -> String {
    let shown = &bytes[..bytes.len().min(MAX_DUMP_BYTES)];
    let mut out = String::with_capacity(shown.len() * 2 + shown.len() / DUMP_LINE_BYTES * 10);
    for (line, chunk) in shown.chunks(DUMP_LINE_BYTES).enumerate() {
        out.push_str(&format!("{:08x}: {}\n", line * DUMP_LINE_BYTES, hex::encode(chunk)));
    }
    if shown.len() < bytes.len() {
        out.push_str(&format!("... {} more bytes\n", bytes.len() - shown.len()));
    }
    out
}

pub(crate) fn report_corruption(blocknum: BlockNum, stage: DecodeStage, bytes: &[u8], err: &FtError) {
    if err.is_corruption() {
        error!(
            blocknum = blocknum.0,
            stage = %stage,
            len = bytes.len(),
            "Corrupt node block: {}\n{}",
            err,
            hex_dump(bytes)
        );
    }
}
