//! Top-level node codec

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::compression::subblock::FRAME_OVERHEAD;
use crate::compression::{CompressionMethod, FramedSubBlock, SubBlock, WorkerPool};
use crate::config::CodecConfig;
use crate::error::{FtError, Result};
use crate::node::{
    rebalance_leaf, BlockNum, Comparator, Node, Partition, PartitionData, PartitionLocation,
    PartitionState,
};
use crate::storage::{BlockDevice, BlockLocation};

use super::header::{
    deserialize_header, header_size, peek_version, required_len, serialize_header,
    validate_layout, NodeHeader,
};
use super::info::{deserialize_info, info_size, serialize_info, NodeInfo};
use super::partition::{deserialize_partition, encode_partition, partition_size};
use super::upgrade::{MsnSource, UpgradeMsnCounter};
use super::version::LayoutSchema;
use super::{report_corruption, DecodeStage, FetchPlan, SerializedNode};

/// Serializes nodes to blocks and decodes blocks back into nodes.
///
/// ## Concurrency:
/// - All methods take `&self`; the codec holds no mutable state
/// - Partitions and chunks are (de)compressed on the worker pool
/// - The only shared mutable resource is the upgrade MSN source
pub struct NodeCodec {
    pub(super) method: CompressionMethod,
    pub(super) basement_size: usize,
    pub(super) header_read_limit: usize,
    pub(super) pool: WorkerPool,
    /// Message buffers are indexed only when a comparator is configured
    pub(super) comparator: Option<Comparator>,
    pub(super) msn_source: Arc<dyn MsnSource>,
}

impl NodeCodec {
    pub fn new(config: &CodecConfig) -> Self {
        Self {
            method: config.compression_method,
            basement_size: config.basement_size,
            header_read_limit: config.header_read_limit,
            pool: WorkerPool::new(config.worker_threads),
            comparator: None,
            msn_source: UpgradeMsnCounter::global(),
        }
    }

    pub fn with_comparator(mut self, cmp: Comparator) -> Self {
        self.comparator = Some(cmp);
        self
    }

    /// Replace the process-wide upgrade MSN counter
    pub fn with_msn_source(mut self, source: Arc<dyn MsnSource>) -> Self {
        self.msn_source = source;
        self
    }

    pub fn method(&self) -> CompressionMethod {
        self.method
    }

    pub fn comparator(&self) -> Option<&Comparator> {
        self.comparator.as_ref()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    // =========================================================================
    // Serialize
    // =========================================================================

    /// Serialize with the configured basement budget
    pub fn serialize_node(&self, node: &mut Node, rebalance: bool) -> Result<SerializedNode> {
        self.serialize_node_to_memory(node, self.basement_size, rebalance)
    }

    /// Encode `node` as one contiguous block.
    ///
    /// Leaves are optionally rebalanced into basements of `basement_size`
    /// bytes first. Partition locations on the node are refreshed to match
    /// the returned block. The node stays dirty; the caller marks it clean
    /// once the block is durably written.
    pub fn serialize_node_to_memory(
        &self,
        node: &mut Node,
        basement_size: usize,
        rebalance: bool,
    ) -> Result<SerializedNode> {
        if rebalance && node.is_leaf() {
            rebalance_leaf(node, basement_size)?;
        }

        let is_leaf = node.is_leaf();
        let frames = self
            .pool
            .sized_for(self.node_memory_footprint(node))
            .map(&node.partitions, |i, partition| {
                self.partition_frame(i, partition, is_leaf)
            })
            .into_iter()
            .collect::<Result<Vec<Vec<u8>>>>()?;

        let info = SubBlock::compress(self.method, &serialize_info(node)?)?.to_framed_bytes();

        let header_len = header_size(node.n_children());
        let mut offset = header_len + info.len();
        let mut locations = Vec::with_capacity(frames.len());
        for frame in &frames {
            locations.push(PartitionLocation {
                start: block_offset(offset)?,
                size: block_offset(frame.len())?,
            });
            offset += frame.len();
        }
        block_offset(offset)?;

        let header = serialize_header(node, &locations);
        let mut wb = WriteBuffer::new(offset);
        wb.put_bytes(&header);
        wb.put_bytes(&info);
        for frame in &frames {
            wb.put_bytes(frame);
        }
        let bytes = wb.finish();

        for (partition, location) in node.partitions.iter_mut().zip(&locations) {
            partition.location = *location;
        }

        debug!(
            blocknum = node.blocknum.0,
            height = node.height,
            children = node.n_children(),
            bytes = bytes.len(),
            "Serialized node"
        );

        Ok(SerializedNode {
            bytes,
            partitions: locations,
        })
    }

    fn partition_frame(&self, child: usize, partition: &Partition, is_leaf: bool) -> Result<Vec<u8>> {
        match &partition.state {
            PartitionState::Available(data) => {
                if matches!(data, PartitionData::Leaf(_)) != is_leaf {
                    return Err(FtError::InvalidState(format!(
                        "partition {} payload does not match node height",
                        child
                    )));
                }
                let raw = encode_partition(data);
                Ok(SubBlock::compress(self.method, &raw)?.to_framed_bytes())
            }
            PartitionState::Compressed(frame) => Ok(frame.to_vec()),
            state => Err(FtError::InvalidState(format!(
                "cannot serialize partition {}: it is {}",
                child,
                state.name()
            ))),
        }
    }

    /// Serialized size of `node` without encoding it.
    ///
    /// Exact when compression is disabled, an upper bound otherwise.
    pub fn node_memory_footprint(&self, node: &Node) -> usize {
        let partitions: usize = node
            .partitions
            .iter()
            .map(|partition| match &partition.state {
                PartitionState::Available(data) => {
                    FRAME_OVERHEAD + self.method.compress_bound(partition_size(data))
                }
                PartitionState::Compressed(frame) => frame.len(),
                PartitionState::OnDisk | PartitionState::Invalid => partition.location.size as usize,
            })
            .sum();
        header_size(node.n_children())
            + FRAME_OVERHEAD
            + self.method.compress_bound(info_size(node))
            + partitions
    }

    // =========================================================================
    // Deserialize
    // =========================================================================

    /// Read the node stored at `location`.
    ///
    /// Tries the header-only path first and falls back to reading and
    /// decoding the whole block.
    pub fn deserialize_node(
        &self,
        device: &dyn BlockDevice,
        blocknum: BlockNum,
        location: BlockLocation,
        plan: &FetchPlan,
    ) -> Result<Node> {
        if let Some(node) = self.try_header_only(device, blocknum, location, plan)? {
            return Ok(node);
        }
        debug!(
            blocknum = blocknum.0,
            size = location.size,
            "Header-only read not possible, reading whole block"
        );
        let bytes = device.read_block(location.offset, location.size as usize)?;
        self.deserialize_node_from_bytes(blocknum, bytes, plan)
    }

    /// Decode a complete block already in memory
    pub fn deserialize_node_from_bytes(
        &self,
        blocknum: BlockNum,
        bytes: Bytes,
        plan: &FetchPlan,
    ) -> Result<Node> {
        let mut stage = DecodeStage::ReadingHeader;
        let result = self.decode_block(blocknum, &bytes, plan, &mut stage);
        if let Err(err) = &result {
            report_corruption(blocknum, stage, &bytes, err);
        }
        result
    }

    fn decode_block(
        &self,
        blocknum: BlockNum,
        bytes: &Bytes,
        plan: &FetchPlan,
        stage: &mut DecodeStage,
    ) -> Result<Node> {
        let (is_leaf, schema) = peek_version(bytes)?;
        if !schema.partitioned {
            *stage = DecodeStage::UpgradingFromLegacy;
            return self.upgrade_whole_node(blocknum, bytes, is_leaf);
        }

        let header = deserialize_header(bytes)?;
        *stage = DecodeStage::HeaderOk;

        *stage = if schema.is_current() {
            DecodeStage::DecodingCurrentFormat
        } else {
            DecodeStage::UpgradingFromLegacy
        };
        let (info, info_end) = self.read_info(bytes, &header, schema)?;
        validate_layout(&header, info_end, bytes.len())?;
        let mut node = assemble(blocknum, &header, info)?;

        *stage = DecodeStage::PartitionsPending;
        let pool = self.pool.sized_for(bytes.len());
        if schema.is_current() {
            let wanted = plan.wanted(&node, self.comparator.as_ref());
            let decoded = pool.map(&header.locations, |i, location| {
                if wanted[i] {
                    self.decode_frame(i, &bytes[range(location)], is_leaf, schema, self.comparator.as_ref())
                        .map(Some)
                } else {
                    Ok(None)
                }
            });
            for ((partition, location), result) in
                node.partitions.iter_mut().zip(&header.locations).zip(decoded)
            {
                partition.state = match result? {
                    Some(data) => PartitionState::Available(data),
                    None => PartitionState::Compressed(bytes.slice(range(location))),
                };
            }
        } else {
            let decoded = pool.map(&header.locations, |i, location| {
                self.decode_frame(i, &bytes[range(location)], is_leaf, schema, None)
            });
            for (partition, result) in node.partitions.iter_mut().zip(decoded) {
                partition.state = PartitionState::Available(result?);
            }
            self.finish_upgrade(&mut node, schema);
        }
        *stage = DecodeStage::PartitionsAvailable;

        debug!(
            blocknum = blocknum.0,
            height = node.height,
            children = node.n_children(),
            version = schema.version,
            "Deserialized node"
        );
        Ok(node)
    }

    /// Header-only fast path.
    ///
    /// `Ok(None)` asks the caller to fall back to a full read: the prefix was
    /// too short for the header or node info, or the block is a legacy layout.
    fn try_header_only(
        &self,
        device: &dyn BlockDevice,
        blocknum: BlockNum,
        location: BlockLocation,
        plan: &FetchPlan,
    ) -> Result<Option<Node>> {
        let prefix_len = self.header_read_limit.min(location.size as usize);
        let prefix = device.read_block(location.offset, prefix_len)?;
        let mut stage = DecodeStage::ReadingHeader;
        let result = self.decode_prefix(device, blocknum, location, &prefix, plan, &mut stage);
        if let Err(err) = &result {
            report_corruption(blocknum, stage, &prefix, err);
        }
        result
    }

    fn decode_prefix(
        &self,
        device: &dyn BlockDevice,
        blocknum: BlockNum,
        location: BlockLocation,
        prefix: &Bytes,
        plan: &FetchPlan,
        stage: &mut DecodeStage,
    ) -> Result<Option<Node>> {
        let schema = LayoutSchema::current();
        if prefix.len() < schema.fixed_header_size() {
            return Ok(None);
        }
        let (is_leaf, stored) = peek_version(prefix)?;
        if !stored.is_current() {
            return Ok(None);
        }
        let header_len = match required_len(prefix)? {
            Some(len) if len <= prefix.len() => len,
            _ => return Ok(None),
        };
        let header = deserialize_header(&prefix[..header_len])?;
        *stage = DecodeStage::HeaderOk;

        match frame_len_at(prefix, header.size) {
            Some(len) if header.size + len <= prefix.len() => {}
            _ => return Ok(None),
        }
        *stage = DecodeStage::DecodingCurrentFormat;
        let (info, info_end) = self.read_info(prefix, &header, schema)?;
        validate_layout(&header, info_end, location.size as usize)?;
        let mut node = assemble(blocknum, &header, info)?;

        *stage = DecodeStage::PartitionsPending;
        let wanted = plan.wanted(&node, self.comparator.as_ref());
        let pool = self.pool.sized_for(location.size as usize);
        let decoded = pool.map(&header.locations, |i, part| -> Result<Option<PartitionData>> {
            if !wanted[i] {
                return Ok(None);
            }
            let cmp = self.comparator.as_ref();
            if part.end() <= prefix.len() as u64 {
                self.decode_frame(i, &prefix[range(part)], is_leaf, schema, cmp).map(Some)
            } else {
                let frame =
                    device.read_block(location.offset + part.start as u64, part.size as usize)?;
                self.decode_frame(i, &frame, is_leaf, schema, cmp).map(Some)
            }
        });
        for ((partition, part), result) in
            node.partitions.iter_mut().zip(&header.locations).zip(decoded)
        {
            partition.state = match result? {
                Some(data) => PartitionState::Available(data),
                None if part.end() <= prefix.len() as u64 => {
                    PartitionState::Compressed(prefix.slice(range(part)))
                }
                None => PartitionState::OnDisk,
            };
        }
        *stage = DecodeStage::PartitionsAvailable;

        debug!(
            blocknum = blocknum.0,
            prefix = prefix.len(),
            block = location.size,
            "Deserialized node from header-only read"
        );
        Ok(Some(node))
    }

    fn read_info(
        &self,
        bytes: &[u8],
        header: &NodeHeader,
        schema: &LayoutSchema,
    ) -> Result<(NodeInfo, usize)> {
        let mut rb = ReadBuffer::new(&bytes[header.size..]);
        let raw = FramedSubBlock::read(&mut rb, "node info")?.decompress(self.method)?;
        let info = deserialize_info(&raw, header.n_children(), schema)?;
        Ok((info, header.size + rb.position()))
    }

    fn decode_frame(
        &self,
        child: usize,
        framed: &[u8],
        is_leaf: bool,
        schema: &LayoutSchema,
        cmp: Option<&Comparator>,
    ) -> Result<PartitionData> {
        let region = format!("partition {}", child);
        let raw = FramedSubBlock::parse(framed, &region)?.decompress(self.method)?;
        let data = deserialize_partition(&raw, is_leaf, schema, cmp)?;
        trace!(child, compressed = framed.len(), raw = raw.len(), "Decoded partition");
        Ok(data)
    }

    // =========================================================================
    // Single partitions
    // =========================================================================

    /// Decode one partition's framed sub-block without touching a node.
    ///
    /// Takes `&self` only, so different partitions can be decoded
    /// concurrently and installed afterwards.
    pub fn decode_partition(&self, framed: &[u8], child: usize, is_leaf: bool) -> Result<PartitionData> {
        self.decode_frame(child, framed, is_leaf, LayoutSchema::current(), self.comparator.as_ref())
    }

    /// Decode `framed` and make it partition `child` of `node`.
    ///
    /// Siblings are untouched; on failure the partition keeps its state.
    pub fn deserialize_single_partition(&self, framed: &[u8], node: &mut Node, child: usize) -> Result<()> {
        node.partition(child)?;
        let data = match self.decode_partition(framed, child, node.is_leaf()) {
            Ok(data) => data,
            Err(err) => {
                report_corruption(node.blocknum, DecodeStage::PartitionsPending, framed, &err);
                return Err(err);
            }
        };
        node.partition_mut(child)?.state = PartitionState::Available(data);
        Ok(())
    }

    /// Decode a partition kept compressed in memory
    pub fn promote_partition(&self, node: &mut Node, child: usize) -> Result<()> {
        let frame = match &node.partition(child)?.state {
            PartitionState::Available(_) => return Ok(()),
            PartitionState::Compressed(frame) => frame.clone(),
            state => {
                return Err(FtError::InvalidState(format!(
                    "partition {} is {} and must be fetched from the device",
                    child,
                    state.name()
                )))
            }
        };
        self.deserialize_single_partition(&frame, node, child)
    }

    /// Make partition `child` available, reading it from `device` if needed.
    ///
    /// `block` is where the node that `node` was read from is stored.
    pub fn fetch_partition(
        &self,
        device: &dyn BlockDevice,
        block: BlockLocation,
        node: &mut Node,
        child: usize,
    ) -> Result<()> {
        let part = match &node.partition(child)?.state {
            PartitionState::Available(_) => return Ok(()),
            PartitionState::Compressed(_) => return self.promote_partition(node, child),
            PartitionState::OnDisk => node.partitions[child].location,
            PartitionState::Invalid => {
                return Err(FtError::InvalidState(format!("partition {} is invalid", child)))
            }
        };
        if part.end() > block.size {
            return Err(FtError::BadFormat(format!(
                "partition {} ends at {} past the {}-byte block",
                child,
                part.end(),
                block.size
            )));
        }
        let frame = device.read_block(block.offset + part.start as u64, part.size as usize)?;
        self.deserialize_single_partition(&frame, node, child)
    }
}

impl Default for NodeCodec {
    fn default() -> Self {
        Self::new(&CodecConfig::default())
    }
}

impl fmt::Debug for NodeCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCodec")
            .field("method", &self.method)
            .field("basement_size", &self.basement_size)
            .field("header_read_limit", &self.header_read_limit)
            .field("pool", &self.pool)
            .field("comparator", &self.comparator.is_some())
            .finish()
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

/// Node with header and info applied; every partition starts out on disk
fn assemble(blocknum: BlockNum, header: &NodeHeader, info: NodeInfo) -> Result<Node> {
    if (info.height == 0) != header.is_leaf {
        return Err(FtError::BadFormat(format!(
            "{} magic on a node of height {}",
            if header.is_leaf { "leaf" } else { "internal" },
            info.height
        )));
    }
    let partitions = header
        .locations
        .iter()
        .enumerate()
        .map(|(i, location)| Partition {
            blocknum: info.children.get(i).copied(),
            location: *location,
            state: PartitionState::OnDisk,
        })
        .collect();
    Ok(Node {
        blocknum,
        height: info.height,
        layout_version: header.version,
        layout_version_original: header.version_original,
        build_id: header.build_id.unwrap_or(0),
        max_msn_applied: info.max_msn,
        node_size: info.node_size,
        flags: info.flags,
        pivots: info.pivots,
        partitions,
        dirty: false,
    })
}

fn range(location: &PartitionLocation) -> Range<usize> {
    location.start as usize..location.end() as usize
}

/// Length of the frame starting at `offset`, if its size field is present
fn frame_len_at(bytes: &[u8], offset: usize) -> Option<usize> {
    let size = bytes.get(offset..offset + 4)?;
    let csize = u32::from_le_bytes([size[0], size[1], size[2], size[3]]) as usize;
    Some(FRAME_OVERHEAD + csize)
}

fn block_offset(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        FtError::SizeOutOfBounds(format!("serialized node reaches offset {} past u32", value))
    })
}
