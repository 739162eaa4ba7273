//! Legacy layout upgrade
//!
//! Layout 17 stores the whole node as one chunked sub-block set:
//!
//! ```text
//! ┌──────────┬─────────────┬──────────────────┬─────────────────────┬──────────────┐
//! │ magic[8] │ version u32 │ version_orig u32 │ chunked sub-blocks  │ checksum u32 │
//! └──────────┴─────────────┴──────────────────┴─────────────────────┴──────────────┘
//!
//! leaf body:     node_size | flags | height | count u32 | packed leaf entries
//! internal body: node_size | flags | height | n_children u32 | pivots |
//!                (blocknum u64, fingerprint u32, count u32, messages) * n_children
//! ```
//!
//! Layouts 17 and 18 carry no message sequence numbers. Each child's buffer
//! is one batch: it reserves a range from the MSN source and its messages get
//! consecutive numbers in enqueue order, so the newest message of a batch
//! holds the highest number of that batch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::info;

use crate::buffer::{try_alloc, ReadBuffer};
use crate::checksum::verify_trailing;
use crate::compression::subblock::decompress_all;
use crate::error::{FtError, Result};
use crate::node::{Basement, BlockNum, MessageBuffer, Msn, Node, Partition};

use super::codec::NodeCodec;
use super::partition::read_messages;
use super::version::{schema, LayoutSchema, BUILD_ID, LAYOUT_VERSION, MAGIC_SIZE};

/// Source of sequence numbers for upgraded messages.
///
/// Numbers within one reserved range ascend, but the counter runs downward,
/// so a later batch gets numbers below every number of an earlier batch.
pub trait MsnSource: Send + Sync {
    /// Reserve `count` consecutive numbers and return the first
    fn reserve_range(&self, count: u64) -> Msn;
}

/// Atomic counter that hands out ranges downward from just below
/// [`Msn::MIN`], so upgraded messages never collide with live ones.
#[derive(Debug)]
pub struct UpgradeMsnCounter {
    /// Highest number not yet handed out
    next: AtomicU64,
}

static GLOBAL_COUNTER: OnceLock<Arc<UpgradeMsnCounter>> = OnceLock::new();

impl UpgradeMsnCounter {
    pub fn new() -> Self {
        Self::starting_at(Msn(Msn::MIN.0 - 1))
    }

    /// Counter whose first reservation ends at `top`
    pub fn starting_at(top: Msn) -> Self {
        Self {
            next: AtomicU64::new(top.0),
        }
    }

    /// Counter shared by every codec in the process
    pub fn global() -> Arc<UpgradeMsnCounter> {
        GLOBAL_COUNTER
            .get_or_init(|| Arc::new(UpgradeMsnCounter::new()))
            .clone()
    }

    pub fn peek(&self) -> Msn {
        Msn(self.next.load(Ordering::SeqCst))
    }
}

impl Default for UpgradeMsnCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl MsnSource for UpgradeMsnCounter {
    fn reserve_range(&self, count: u64) -> Msn {
        let prev = self.next.fetch_sub(count, Ordering::SeqCst);
        Msn(prev - count + 1)
    }
}

impl NodeCodec {
    /// Decode a layout-17 block into a current-layout node
    pub(super) fn upgrade_whole_node(&self, blocknum: BlockNum, bytes: &[u8], is_leaf: bool) -> Result<Node> {
        let body = verify_trailing(bytes, "legacy node")?;
        let mut rb = ReadBuffer::new(body);
        rb.get_bytes(MAGIC_SIZE)?;
        let version = rb.get_u32()?;
        let version_original = rb.get_u32()?;
        let schema = schema(version)?;
        let raw = decompress_all(&mut rb, self.method, &self.pool)?;
        rb.expect_end("legacy node")?;

        let mut rb = ReadBuffer::new(&raw);
        let node_size = rb.get_u32()?;
        let flags = rb.get_u32()?;
        let height = rb.get_u32()?;
        if (height == 0) != is_leaf {
            return Err(FtError::BadFormat(format!(
                "legacy {} magic on a node of height {}",
                if is_leaf { "leaf" } else { "internal" },
                height
            )));
        }

        let (pivots, partitions) = if is_leaf {
            let count = rb.get_u32()? as usize;
            let packed = rb.rest();
            let mut pool = try_alloc(packed.len())?;
            pool.extend_from_slice(packed);
            (Vec::new(), vec![Partition::leaf(Basement::from_packed(pool, count)?)])
        } else {
            read_legacy_children(&mut rb, schema)?
        };

        let mut node = Node {
            blocknum,
            height,
            layout_version: version,
            layout_version_original: version_original,
            build_id: 0,
            max_msn_applied: Msn::ZERO,
            node_size,
            flags,
            pivots,
            partitions,
            dirty: false,
        };
        self.finish_upgrade(&mut node, schema);
        Ok(node)
    }

    /// Bring a fully decoded legacy node up to the current layout
    pub(super) fn finish_upgrade(&self, node: &mut Node, schema: &LayoutSchema) {
        if !schema.message_msn {
            let mut highest: Option<Msn> = None;
            for child in 0..node.n_children() {
                let Some(buffer) = node.message_buffer_mut(child) else {
                    continue;
                };
                let count = buffer.len() as u64;
                if count == 0 {
                    continue;
                }
                let start = self.msn_source.reserve_range(count);
                for (i, message) in buffer.messages_mut().iter_mut().enumerate() {
                    message.msn = Msn(start.0 + i as u64);
                }
                let last = Msn(start.0 + count - 1);
                highest = Some(highest.map_or(last, |h| h.max(last)));
            }
            node.max_msn_applied = highest.unwrap_or(Msn::ZERO);
        }

        if let Some(cmp) = &self.comparator {
            for child in 0..node.n_children() {
                if let Some(buffer) = node.message_buffer_mut(child) {
                    buffer.build_indexes(cmp);
                }
            }
        }

        info!(
            blocknum = node.blocknum.0,
            from = node.layout_version,
            to = LAYOUT_VERSION,
            height = node.height,
            "Upgraded node from legacy layout"
        );
        node.layout_version = LAYOUT_VERSION;
        node.build_id = BUILD_ID;
        node.mark_dirty();
    }
}

fn read_legacy_children(
    rb: &mut ReadBuffer<'_>,
    schema: &LayoutSchema,
) -> Result<(Vec<Vec<u8>>, Vec<Partition>)> {
    let n_children = rb.get_u32()? as usize;
    // A child needs at least a block number, fingerprint and message count.
    if n_children == 0 || n_children > rb.remaining() / 16 {
        return Err(FtError::BadFormat(format!(
            "legacy node declares {} children in {} bytes",
            n_children,
            rb.remaining()
        )));
    }
    let mut pivots = Vec::with_capacity(n_children - 1);
    for _ in 1..n_children {
        pivots.push(rb.get_len_prefixed()?.to_vec());
    }
    let mut partitions = Vec::with_capacity(n_children);
    for _ in 0..n_children {
        let child = BlockNum(rb.get_u64()?);
        rb.get_u32()?;
        let count = rb.get_u32()? as usize;
        let messages = read_messages(rb, count, schema)?;
        partitions.push(Partition::internal(child, MessageBuffer::from_messages(messages, None)));
    }
    rb.expect_end("legacy node")?;
    Ok((pivots, partitions))
}
