//! Legacy layout upgrade tests
//!
//! These tests verify:
//! - Layouts 17, 18 and 19 decode into current-layout nodes
//! - Sequence numbers are synthesized only where the layout lacked them
//! - Concurrent upgrades draw disjoint sequence number ranges
//! - Upgraded nodes are dirty and re-serialize in the current layout

use std::collections::HashSet;
use std::sync::Arc;

use ftnode::node::{bytewise, Message, MessageBuffer, MessageKind};
use ftnode::serialize::{FetchPlan, MsnSource, UpgradeMsnCounter, BUILD_ID, LAYOUT_VERSION};
use ftnode::{BlockNum, CompressionMethod, FtError, Msn, Node, NodeCodec};

#[path = "../common/mod.rs"]
mod common;

// =============================================================================
// Helper Functions
// =============================================================================

fn upgrade(codec: &NodeCodec, block: Vec<u8>) -> Node {
    codec
        .deserialize_node_from_bytes(BlockNum(21), block.into(), &FetchPlan::Minimal)
        .unwrap()
}

/// Messages of `buffer` as a layout without the fresh flag reads them back
fn all_fresh(buffer: &MessageBuffer) -> Vec<Message> {
    buffer
        .messages()
        .iter()
        .cloned()
        .map(|mut m| {
            m.fresh = true;
            m
        })
        .collect()
}

fn two_child_internal() -> Node {
    let mut first = MessageBuffer::new();
    for (i, key) in ["a", "b", "c"].iter().enumerate() {
        first.enqueue(Message::new(MessageKind::Insert, Msn(500 + i as u64), *key, "v"), None);
    }
    let mut second = MessageBuffer::new();
    second.enqueue(Message::new(MessageKind::DeleteAny, Msn(600), "x", ""), None);
    second.enqueue(Message::new(MessageKind::Insert, Msn(601), "y", "w").stale(), None);
    let mut node = Node::new_internal(
        BlockNum(21),
        1,
        vec![b"c".to_vec()],
        vec![(BlockNum(31), first), (BlockNum(32), second)],
    )
    .unwrap();
    node.max_msn_applied = Msn(601);
    node
}

// =============================================================================
// Layout 19
// =============================================================================

#[test]
fn test_v19_leaf() {
    let (codec, counter) = common::codec_with_counter(CompressionMethod::Zlib, 1000);
    let original = common::multi_basement_leaf(3, 8);
    let block = common::legacy_partitioned_block(&original, 19, CompressionMethod::Zlib);

    let node = upgrade(&codec, block);

    assert_eq!(node.layout_version, LAYOUT_VERSION);
    assert_eq!(node.layout_version_original, 19);
    assert_eq!(node.build_id, BUILD_ID);
    assert!(node.is_dirty());
    assert!(node.all_available(), "legacy nodes are decoded in full");
    assert_eq!(node.max_msn_applied, original.max_msn_applied);
    assert_eq!(node.pivots, original.pivots);
    for i in 0..3 {
        assert_eq!(node.basement(i), original.basement(i));
    }
    assert_eq!(counter.peek(), Msn(1000));
}

#[test]
fn test_v19_internal_keeps_msns() {
    let (codec, counter) = common::codec_with_counter(CompressionMethod::Snappy, 1000);
    let original = two_child_internal();
    let block = common::legacy_partitioned_block(&original, 19, CompressionMethod::Snappy);

    let node = upgrade(&codec, block);

    assert_eq!(node.max_msn_applied, Msn(601));
    assert_eq!(node.child_blocknum(0), Some(BlockNum(31)));
    assert_eq!(node.child_blocknum(1), Some(BlockNum(32)));
    for child in 0..2 {
        assert_eq!(
            node.message_buffer(child).unwrap().messages(),
            all_fresh(original.message_buffer(child).unwrap()).as_slice()
        );
    }
    assert_eq!(counter.peek(), Msn(1000));
}

// =============================================================================
// Layout 18
// =============================================================================

#[test]
fn test_v18_internal_gets_counter_msns() {
    let (codec, counter) = common::codec_with_counter(CompressionMethod::Zlib, 1000);
    let original = two_child_internal();
    let block = common::legacy_partitioned_block(&original, 18, CompressionMethod::Zlib);

    let node = upgrade(&codec, block);

    let msns = |child: usize| -> Vec<u64> {
        node.message_buffer(child)
            .unwrap()
            .messages()
            .iter()
            .map(|m| m.msn.0)
            .collect()
    };
    assert_eq!(msns(0), vec![998, 999, 1000]);
    assert_eq!(msns(1), vec![996, 997]);
    assert_eq!(node.max_msn_applied, Msn(1000));
    assert_eq!(counter.peek(), Msn(995));

    // Fingerprints are dropped, child pointers survive.
    assert_eq!(node.child_blocknum(1), Some(BlockNum(32)));
    assert_eq!(node.layout_version_original, 18);

    let keys: Vec<&[u8]> = node
        .message_buffer(1)
        .unwrap()
        .messages()
        .iter()
        .map(|m| m.key.as_slice())
        .collect();
    assert_eq!(keys, vec![b"x".as_slice(), b"y".as_slice()]);
    assert!(node.message_buffer(1).unwrap().messages().iter().all(|m| m.fresh));
}

#[test]
fn test_v18_leaf_has_no_msn() {
    let (codec, _) = common::codec_with_counter(CompressionMethod::None, 1000);
    let original = common::multi_basement_leaf(2, 5);
    let block = common::legacy_partitioned_block(&original, 18, CompressionMethod::None);

    let node = upgrade(&codec, block);
    assert_eq!(node.max_msn_applied, Msn::ZERO);
    assert_eq!(node.basement(1), original.basement(1));
    assert_eq!(node.flags, original.flags);
}

#[test]
fn test_v18_upgrade_builds_indexes_with_comparator() {
    let (codec, _) = common::codec_with_counter(CompressionMethod::Lz4, 50);
    let codec = codec.with_comparator(bytewise());
    let original = two_child_internal();
    let block = common::legacy_partitioned_block(&original, 18, CompressionMethod::Lz4);

    let node = upgrade(&codec, block);
    let buffer = node.message_buffer(1).unwrap();
    assert!(buffer.is_indexed());
    assert_eq!(buffer.broadcast_indexes().len(), 0);
    assert_eq!(buffer.fresh_indexes().len(), 2);
}

// =============================================================================
// Layout 17
// =============================================================================

#[test]
fn test_v17_leaf() {
    let (codec, _) = common::codec_with_counter(CompressionMethod::Zlib, 1000);
    let original = common::leaf_with(&[("a", "1"), ("b", "2"), ("c", "3")]);
    let block = common::legacy_whole_block(&original, CompressionMethod::Zlib);

    let node = upgrade(&codec, block);

    assert_eq!(node.layout_version, LAYOUT_VERSION);
    assert_eq!(node.layout_version_original, 17);
    assert_eq!(node.n_children(), 1);
    assert!(node.pivots.is_empty());
    assert_eq!(node.basement(0), original.basement(0));
    assert_eq!(node.max_msn_applied, Msn::ZERO);
    assert!(node.is_dirty());
}

#[test]
fn test_v17_internal() {
    let (codec, _) = common::codec_with_counter(CompressionMethod::Snappy, 1000);
    let original = two_child_internal();
    let block = common::legacy_whole_block(&original, CompressionMethod::Snappy);

    let node = upgrade(&codec, block);

    assert_eq!(node.height, 1);
    assert_eq!(node.pivots, original.pivots);
    assert_eq!(node.child_blocknum(0), Some(BlockNum(31)));
    let msns: Vec<u64> = node
        .message_buffer(0)
        .unwrap()
        .messages()
        .iter()
        .map(|m| m.msn.0)
        .collect();
    assert_eq!(msns, vec![998, 999, 1000]);
    assert_eq!(node.max_msn_applied, Msn(1000));
}

#[test]
fn test_v17_large_leaf_spans_several_chunks() {
    let codec = common::codec(CompressionMethod::Lz4);
    let original = common::multi_basement_leaf(1, 40_000);
    let block = common::legacy_whole_block(&original, CompressionMethod::Lz4);

    let node = upgrade(&codec, block);
    assert_eq!(node.basement(0), original.basement(0));
}

#[test]
fn test_v17_corruption_is_detected() {
    let codec = common::codec(CompressionMethod::Zlib);
    let original = common::internal_node(2, 5);
    let mut block = common::legacy_whole_block(&original, CompressionMethod::Zlib);
    let middle = block.len() / 2;
    block[middle] ^= 0x08;

    let err = codec
        .deserialize_node_from_bytes(BlockNum(21), block.into(), &FetchPlan::All)
        .unwrap_err();
    assert!(matches!(err, FtError::ChecksumMismatch { .. }), "{:?}", err);
}

#[test]
fn test_v17_magic_height_mismatch() {
    let codec = common::codec(CompressionMethod::None);
    let original = common::leaf_with(&[("a", "1")]);
    let mut block = common::legacy_whole_block(&original, CompressionMethod::None);
    block[..8].copy_from_slice(b"tokunode");
    let len = block.len();
    let sum = ftnode::checksum::checksum(&block[..len - 4]);
    block[len - 4..].copy_from_slice(&sum.to_le_bytes());

    let err = codec
        .deserialize_node_from_bytes(BlockNum(21), block.into(), &FetchPlan::All)
        .unwrap_err();
    assert!(matches!(err, FtError::BadFormat(_)), "{:?}", err);
}

// =============================================================================
// After the Upgrade
// =============================================================================

#[test]
fn test_upgraded_node_reserializes_in_current_layout() {
    for version in [18, 19] {
        let (codec, _) = common::codec_with_counter(CompressionMethod::Zlib, 1000);
        let original = common::internal_node(3, 4);
        let block = common::legacy_partitioned_block(&original, version, CompressionMethod::Zlib);

        let mut upgraded = upgrade(&codec, block);
        let serialized = codec.serialize_node(&mut upgraded, false).unwrap();
        upgraded.mark_clean();

        assert_eq!(u32::from_le_bytes(serialized.bytes[8..12].try_into().unwrap()), 20);
        assert_eq!(
            u32::from_le_bytes(serialized.bytes[12..16].try_into().unwrap()),
            version
        );
        let again = codec
            .deserialize_node_from_bytes(BlockNum(21), serialized.bytes.into(), &FetchPlan::All)
            .unwrap();
        assert_eq!(again, upgraded);
    }
}

#[test]
fn test_fast_path_on_legacy_block_reads_everything() {
    let codec = common::codec(CompressionMethod::Zlib);
    let original = common::multi_basement_leaf(3, 6);
    let block = common::legacy_partitioned_block(&original, 19, CompressionMethod::Zlib);
    let (device, location) = common::device_with(&block);

    let node = codec
        .deserialize_node(&device, BlockNum(11), location, &FetchPlan::Minimal)
        .unwrap();
    assert!(node.all_available());
    assert_eq!(node.layout_version, LAYOUT_VERSION);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_upgrades_draw_disjoint_ranges() {
    let counter = Arc::new(UpgradeMsnCounter::starting_at(Msn(1_000_000)));
    let codec = common::codec(CompressionMethod::Snappy).with_msn_source(counter.clone());
    let original = common::internal_node(3, 7);
    let block = common::legacy_partitioned_block(&original, 18, CompressionMethod::Snappy);

    let nodes: Vec<Node> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let codec = &codec;
                let block = block.clone();
                s.spawn(move || upgrade(codec, block))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut seen = HashSet::new();
    for node in &nodes {
        for child in 0..node.n_children() {
            let msns: Vec<u64> = node
                .message_buffer(child)
                .unwrap()
                .messages()
                .iter()
                .map(|m| m.msn.0)
                .collect();
            // Consecutive within a batch
            for pair in msns.windows(2) {
                assert_eq!(pair[1], pair[0] + 1);
            }
            for msn in msns {
                assert!(seen.insert(msn), "msn {} handed out twice", msn);
                assert!(msn < Msn::MIN.0);
            }
        }
    }
    assert_eq!(seen.len(), 8 * 3 * 7);
    assert_eq!(counter.peek(), Msn(1_000_000 - 8 * 3 * 7));
}

#[test]
fn test_later_batches_get_lower_ranges() {
    let counter = UpgradeMsnCounter::starting_at(Msn(1000));
    let first = counter.reserve_range(3);
    let second = counter.reserve_range(2);
    assert_eq!(first, Msn(998));
    assert_eq!(second, Msn(996));
    // Every number of the later batch sits below the earlier batch
    assert!(second.0 + 1 < first.0);
    assert_eq!(counter.peek(), Msn(995));
}

#[test]
fn test_global_counter_stays_below_live_msns() {
    let counter = UpgradeMsnCounter::global();
    let start = counter.reserve_range(4);
    assert!(start.0 + 3 < Msn::MIN.0);
    assert!(Arc::ptr_eq(&counter, &UpgradeMsnCounter::global()));
}
