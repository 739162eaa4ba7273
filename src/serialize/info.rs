//! Node info codec
//!
//! Node-wide metadata shared by every partition, stored as its own framed
//! sub-block right after the header. Uncompressed payload:
//!
//! ```text
//! max_msn u64 | node_size u32 | flags u32 | height u32 |
//! (len u32, pivot) * (n_children - 1) |
//! internal only: child blocknum u64 * n_children |
//! checksum u32
//! ```
//! Layout 18 has no `max_msn` and follows each child block number with a
//! u32 fingerprint that is read and discarded.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::checksum::{verify_trailing, CHECKSUM_SIZE};
use crate::error::{FtError, Result};
use crate::node::{BlockNum, Msn, Node};

use super::version::LayoutSchema;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub max_msn: Msn,
    pub node_size: u32,
    pub flags: u32,
    pub height: u32,
    pub pivots: Vec<Vec<u8>>,
    /// One per child for internal nodes, empty for leaves
    pub children: Vec<BlockNum>,
}

/// Exact uncompressed size of the info payload for `node`
pub fn info_size(node: &Node) -> usize {
    let pivots: usize = node.pivots.iter().map(|p| 4 + p.len()).sum();
    let children = if node.is_leaf() { 0 } else { 8 * node.n_children() };
    8 + 4 + 4 + 4 + pivots + children + CHECKSUM_SIZE
}

pub fn serialize_info(node: &Node) -> Result<Vec<u8>> {
    if node.pivots.len() + 1 != node.n_children() {
        return Err(FtError::InvalidState(format!(
            "{} pivots for {} children",
            node.pivots.len(),
            node.n_children()
        )));
    }
    let mut wb = WriteBuffer::new(info_size(node));
    wb.start_checksum();
    wb.put_u64(node.max_msn_applied.0);
    wb.put_u32(node.node_size);
    wb.put_u32(node.flags);
    wb.put_u32(node.height);
    for pivot in &node.pivots {
        wb.put_len_prefixed(pivot);
    }
    if !node.is_leaf() {
        for (i, partition) in node.partitions.iter().enumerate() {
            let child = partition.blocknum.ok_or_else(|| {
                FtError::InvalidState(format!("internal partition {} has no child block", i))
            })?;
            wb.put_u64(child.0);
        }
    }
    wb.put_checksum();
    Ok(wb.finish())
}

/// Decode an info payload for a node with `n_children` partitions
pub fn deserialize_info(raw: &[u8], n_children: usize, schema: &LayoutSchema) -> Result<NodeInfo> {
    let body = verify_trailing(raw, "node info")?;
    let mut rb = ReadBuffer::new(body);

    let max_msn = if schema.info_max_msn {
        Msn(rb.get_u64()?)
    } else {
        Msn::ZERO
    };
    let node_size = rb.get_u32()?;
    let flags = rb.get_u32()?;
    let height = rb.get_u32()?;

    // Each pivot needs at least its length prefix.
    if n_children == 0 || (n_children - 1) * 4 > rb.remaining() {
        return Err(FtError::BadFormat(format!(
            "node info cannot hold pivots for {} children",
            n_children
        )));
    }
    let mut pivots = Vec::with_capacity(n_children - 1);
    for _ in 1..n_children {
        pivots.push(rb.get_len_prefixed()?.to_vec());
    }

    let mut children = Vec::new();
    if height > 0 {
        children.reserve(n_children);
        for _ in 0..n_children {
            children.push(BlockNum(rb.get_u64()?));
            if schema.child_fingerprints {
                rb.get_u32()?;
            }
        }
    }
    rb.expect_end("node info")?;

    Ok(NodeInfo {
        max_msn,
        node_size,
        flags,
        height,
        pivots,
        children,
    })
}
