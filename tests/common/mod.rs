//! Shared helpers for ftnode tests
//!
//! Node builders plus writers for the legacy layouts (17, 18, 19) that the
//! crate only reads.

#![allow(dead_code)]

use std::sync::Arc;

use ftnode::buffer::WriteBuffer;
use ftnode::checksum::checksum;
use ftnode::compression::subblock::{
    chunked_len, compress_all, frame_checksum, write_chunked, MAX_SUB_BLOCKS,
};
use ftnode::compression::{choose_chunking, SubBlock, WorkerPool};
use ftnode::node::{
    Basement, LeafEntry, Message, MessageBuffer, MessageKind, PartitionData, PartitionState,
    TxnId, Xids,
};
use ftnode::serialize::UpgradeMsnCounter;
use ftnode::storage::{BlockDevice, BlockLocation, MemoryDevice};
use ftnode::{BlockNum, CodecConfig, CompressionMethod, Msn, Node, NodeCodec};

pub const ALL_METHODS: [CompressionMethod; 5] = [
    CompressionMethod::None,
    CompressionMethod::Snappy,
    CompressionMethod::Zlib,
    CompressionMethod::Lz4,
    CompressionMethod::ZlibRaw,
];

// =============================================================================
// Codecs and devices
// =============================================================================

pub fn config(method: CompressionMethod) -> CodecConfig {
    CodecConfig::builder()
        .compression_method(method)
        .worker_threads(2)
        .build()
}

pub fn codec(method: CompressionMethod) -> NodeCodec {
    NodeCodec::new(&config(method))
}

/// Codec with its own upgrade counter whose first range ends at `top`
pub fn codec_with_counter(method: CompressionMethod, top: u64) -> (NodeCodec, Arc<UpgradeMsnCounter>) {
    let counter = Arc::new(UpgradeMsnCounter::starting_at(Msn(top)));
    let codec = codec(method).with_msn_source(counter.clone());
    (codec, counter)
}

/// Device holding `bytes` at offset 0
pub fn device_with(bytes: &[u8]) -> (MemoryDevice, BlockLocation) {
    let device = MemoryDevice::new();
    device.write_block(0, bytes).unwrap();
    let location = BlockLocation {
        offset: 0,
        size: bytes.len() as u64,
    };
    (device, location)
}

// =============================================================================
// Node builders
// =============================================================================

pub fn key(i: usize) -> Vec<u8> {
    format!("key{:05}", i).into_bytes()
}

pub fn value(i: usize) -> Vec<u8> {
    format!("value-{}-{}", i, "x".repeat(i % 13)).into_bytes()
}

/// Single-basement leaf holding clean entries in the given order
pub fn leaf_with(entries: &[(&str, &str)]) -> Node {
    let entries: Vec<LeafEntry> = entries.iter().map(|(k, v)| LeafEntry::clean(*k, *v)).collect();
    let basement = Basement::from_entries(&entries).unwrap();
    Node::new_leaf(BlockNum(7), Vec::new(), vec![basement]).unwrap()
}

/// Leaf with `basements` basements of `per_basement` clean entries each
pub fn multi_basement_leaf(basements: usize, per_basement: usize) -> Node {
    let mut parts = Vec::new();
    let mut pivots = Vec::new();
    for b in 0..basements {
        let mut basement = Basement::new();
        for j in 0..per_basement {
            let i = b * per_basement + j;
            basement.push(&LeafEntry::clean(key(i), value(i))).unwrap();
        }
        if b + 1 < basements {
            pivots.push(key(b * per_basement + per_basement - 1));
        }
        parts.push(basement);
    }
    let mut node = Node::new_leaf(BlockNum(11), pivots, parts).unwrap();
    node.max_msn_applied = Msn(Msn::MIN.0 + 42);
    node.flags = 3;
    node
}

/// Height-1 node with `children` buffers of `per_child` messages each
pub fn internal_node(children: usize, per_child: usize) -> Node {
    let mut msn = Msn::MIN.0;
    let mut pivots = Vec::new();
    let mut kids = Vec::new();
    for c in 0..children {
        let mut buffer = MessageBuffer::new();
        for j in 0..per_child {
            msn += 1;
            let i = c * per_child + j;
            let mut message = Message::new(MessageKind::Insert, Msn(msn), key(i), value(i))
                .with_xids(Xids::new(vec![TxnId(9), TxnId(10 + j as u64)]).unwrap());
            if j % 3 == 2 {
                message = message.stale();
            }
            buffer.enqueue(message, None);
        }
        if c + 1 < children {
            pivots.push(key(c * per_child + per_child - 1));
        }
        kids.push((BlockNum(100 + c as u64), buffer));
    }
    let mut node = Node::new_internal(BlockNum(21), 1, pivots, kids).unwrap();
    node.max_msn_applied = Msn(msn);
    node
}

/// Decode every compressed partition in place
pub fn promote_all(codec: &NodeCodec, node: &mut Node) {
    for child in 0..node.n_children() {
        codec.promote_partition(node, child).unwrap();
    }
}

pub fn available_children(node: &Node) -> Vec<usize> {
    (0..node.n_children())
        .filter(|&i| node.partitions[i].is_available())
        .collect()
}

pub fn state_names(node: &Node) -> Vec<&'static str> {
    node.partitions.iter().map(|p| p.state.name()).collect()
}

// =============================================================================
// Legacy writers
// =============================================================================

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(buf, bytes.len() as u32);
    buf.extend_from_slice(bytes);
}

fn seal(mut buf: Vec<u8>) -> Vec<u8> {
    let sum = checksum(&buf);
    put_u32(&mut buf, sum);
    buf
}

fn magic(node: &Node) -> &'static [u8; 8] {
    if node.is_leaf() {
        b"tokuleaf"
    } else {
        b"tokunode"
    }
}

/// Message bytes as layout `version` stored them
pub fn legacy_message(buf: &mut Vec<u8>, message: &Message, version: u32) {
    buf.push(message.kind as u8);
    if version >= 20 {
        buf.push(message.fresh as u8);
    }
    if version >= 19 {
        put_u64(buf, message.msn.0);
    }
    buf.push(message.xids.depth() as u8);
    for xid in message.xids.ids() {
        put_u64(buf, xid.0);
    }
    put_bytes(buf, &message.key);
    put_bytes(buf, &message.value);
}

fn legacy_partition(data: &PartitionData, version: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    match data {
        PartitionData::Leaf(basement) => {
            buf.push(0xaa);
            put_u32(&mut buf, basement.len() as u32);
            for entry in basement.iter_encoded() {
                buf.extend_from_slice(entry);
            }
        }
        PartitionData::Internal(messages) => {
            buf.push(0xbb);
            put_u32(&mut buf, messages.len() as u32);
            for message in messages.messages() {
                legacy_message(&mut buf, message, version);
            }
        }
    }
    seal(buf)
}

fn available(node: &Node, child: usize) -> &PartitionData {
    match &node.partitions[child].state {
        PartitionState::Available(data) => data,
        other => panic!("partition {} is {:?}", child, other),
    }
}

/// Layout 18 or 19 block for a fully available node
pub fn legacy_partitioned_block(node: &Node, version: u32, method: CompressionMethod) -> Vec<u8> {
    assert!(version == 18 || version == 19);
    let n = node.n_children();

    let mut info = Vec::new();
    if version >= 19 {
        put_u64(&mut info, node.max_msn_applied.0);
    }
    put_u32(&mut info, node.node_size);
    put_u32(&mut info, node.flags);
    put_u32(&mut info, node.height);
    for pivot in &node.pivots {
        put_bytes(&mut info, pivot);
    }
    if !node.is_leaf() {
        for (i, partition) in node.partitions.iter().enumerate() {
            put_u64(&mut info, partition.blocknum.unwrap().0);
            if version == 18 {
                put_u32(&mut info, 0xfee1_0000 + i as u32);
            }
        }
    }
    let info = SubBlock::compress(method, &seal(info)).unwrap().to_framed_bytes();

    let frames: Vec<Vec<u8>> = (0..n)
        .map(|i| {
            let raw = legacy_partition(available(node, i), version);
            SubBlock::compress(method, &raw).unwrap().to_framed_bytes()
        })
        .collect();

    let fixed = if version >= 19 { 24 } else { 20 };
    let header_len = fixed + 8 * n + 4;
    let mut header = Vec::new();
    header.extend_from_slice(magic(node));
    put_u32(&mut header, version);
    put_u32(&mut header, version);
    if version >= 19 {
        put_u32(&mut header, 5);
    }
    put_u32(&mut header, n as u32);
    let mut start = header_len + info.len();
    for frame in &frames {
        put_u32(&mut header, start as u32);
        put_u32(&mut header, frame.len() as u32);
        start += frame.len();
    }
    let mut block = seal(header);
    assert_eq!(block.len(), header_len);
    block.extend_from_slice(&info);
    for frame in &frames {
        block.extend_from_slice(frame);
    }
    block
}

/// Layout 17 block: the whole node as one chunked sub-block set
pub fn legacy_whole_block(node: &Node, method: CompressionMethod) -> Vec<u8> {
    let mut body = Vec::new();
    put_u32(&mut body, node.node_size);
    put_u32(&mut body, node.flags);
    put_u32(&mut body, node.height);
    if node.is_leaf() {
        assert_eq!(node.n_children(), 1, "layout 17 leaves have one basement");
        let basement = node.basement(0).unwrap();
        put_u32(&mut body, basement.len() as u32);
        for entry in basement.iter_encoded() {
            body.extend_from_slice(entry);
        }
    } else {
        put_u32(&mut body, node.n_children() as u32);
        for pivot in &node.pivots {
            put_bytes(&mut body, pivot);
        }
        for child in 0..node.n_children() {
            put_u64(&mut body, node.partitions[child].blocknum.unwrap().0);
            put_u32(&mut body, 0xabcd_0000 + child as u32);
            let buffer = node.message_buffer(child).unwrap();
            put_u32(&mut body, buffer.len() as u32);
            for message in buffer.messages() {
                legacy_message(&mut body, message, 17);
            }
        }
    }

    let plan = choose_chunking(body.len(), MAX_SUB_BLOCKS).unwrap();
    let blocks = compress_all(&body, &plan, method, &WorkerPool::sequential()).unwrap();
    let mut wb = WriteBuffer::new(chunked_len(&blocks));
    write_chunked(&mut wb, &blocks);

    let mut block = Vec::new();
    block.extend_from_slice(magic(node));
    put_u32(&mut block, 17);
    put_u32(&mut block, 17);
    block.extend_from_slice(&wb.finish());
    seal(block)
}

/// Frame with arbitrary declared sizes and a checksum that matches them
pub fn hand_frame(compressed: &[u8], uncompressed_size: usize) -> Vec<u8> {
    let mut frame = Vec::new();
    put_u32(&mut frame, compressed.len() as u32);
    put_u32(&mut frame, uncompressed_size as u32);
    frame.extend_from_slice(compressed);
    put_u32(&mut frame, frame_checksum(compressed, uncompressed_size));
    frame
}

/// Rewrite the header checksum after a test edits header bytes
pub fn reseal_header(block: &mut [u8], header_len: usize) {
    let sum = checksum(&block[..header_len - 4]);
    block[header_len - 4..header_len].copy_from_slice(&sum.to_le_bytes());
}
