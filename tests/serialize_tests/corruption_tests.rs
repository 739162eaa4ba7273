//! Corruption handling tests
//!
//! These tests verify:
//! - Any single flipped bit is reported as corruption, never decoded
//! - Truncated and padded blocks are rejected
//! - Unsupported versions surface as distinct errors
//! - Structurally inconsistent headers are rejected after their checksum passes

use ftnode::serialize::{header_size, FetchPlan};
use ftnode::{BlockNum, CompressionMethod, FtError, Node, NodeCodec};

#[path = "../common/mod.rs"]
mod common;

// =============================================================================
// Helper Functions
// =============================================================================

fn encoded(codec: &NodeCodec, mut node: Node) -> Vec<u8> {
    codec.serialize_node(&mut node, false).unwrap().bytes
}

fn decode(codec: &NodeCodec, bytes: &[u8]) -> Result<Node, FtError> {
    codec.deserialize_node_from_bytes(BlockNum(1), bytes.to_vec().into(), &FetchPlan::All)
}

fn set_u32(block: &mut [u8], offset: usize, value: u32) {
    block[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_u32(block: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(block[offset..offset + 4].try_into().unwrap())
}

// =============================================================================
// Bit Flips
// =============================================================================

#[test]
fn test_every_bit_flip_in_leaf_is_detected() {
    let codec = common::codec(CompressionMethod::None);
    let block = encoded(&codec, common::multi_basement_leaf(2, 3));
    assert!(decode(&codec, &block).is_ok());

    for byte in 0..block.len() {
        for bit in 0..8 {
            let mut corrupt = block.clone();
            corrupt[byte] ^= 1 << bit;
            match decode(&codec, &corrupt) {
                Err(err) => assert!(
                    err.is_corruption(),
                    "byte {} bit {}: {:?} is not corruption",
                    byte,
                    bit,
                    err
                ),
                Ok(_) => panic!("byte {} bit {} decoded successfully", byte, bit),
            }
        }
    }
}

#[test]
fn test_every_bit_flip_in_internal_is_detected() {
    let codec = common::codec(CompressionMethod::Snappy);
    let block = encoded(&codec, common::internal_node(2, 2));

    for byte in 0..block.len() {
        for bit in 0..8 {
            let mut corrupt = block.clone();
            corrupt[byte] ^= 1 << bit;
            let err = decode(&codec, &corrupt).unwrap_err();
            assert!(err.is_corruption(), "byte {} bit {}: {:?}", byte, bit, err);
        }
    }
}

#[test]
fn test_flipped_partition_reports_checksum_mismatch() {
    let codec = common::codec(CompressionMethod::Zlib);
    let mut node = common::multi_basement_leaf(3, 20);
    let serialized = codec.serialize_node(&mut node, false).unwrap();
    let mut block = serialized.bytes;

    let second = serialized.partitions[1];
    block[second.start as usize + 10] ^= 0x40;

    match decode(&codec, &block) {
        Err(FtError::ChecksumMismatch { region, .. }) => assert_eq!(region, "partition 1"),
        other => panic!("expected a checksum mismatch, got {:?}", other),
    }
}

#[test]
fn test_flipped_header_reports_header_checksum() {
    let codec = common::codec(CompressionMethod::Lz4);
    let mut block = encoded(&codec, common::multi_basement_leaf(2, 5));
    // version_original
    block[13] ^= 0x01;
    match decode(&codec, &block) {
        Err(FtError::ChecksumMismatch { region, .. }) => assert_eq!(region, "node header"),
        other => panic!("expected a header checksum mismatch, got {:?}", other),
    }
}

// =============================================================================
// Truncation and Padding
// =============================================================================

#[test]
fn test_truncated_blocks_are_rejected() {
    let codec = common::codec(CompressionMethod::Zlib);
    let block = encoded(&codec, common::internal_node(3, 4));
    for len in 0..block.len() {
        let err = decode(&codec, &block[..len]).unwrap_err();
        assert!(err.is_corruption(), "length {}: {:?}", len, err);
    }
}

#[test]
fn test_trailing_bytes_are_rejected() {
    let codec = common::codec(CompressionMethod::None);
    let mut block = encoded(&codec, common::leaf_with(&[("a", "1")]));
    block.extend_from_slice(&[0, 0, 0, 0]);
    assert!(matches!(decode(&codec, &block), Err(FtError::BadFormat(_))));
}

// =============================================================================
// Versions and Magic
// =============================================================================

#[test]
fn test_version_too_old() {
    let codec = common::codec(CompressionMethod::None);
    let mut block = encoded(&codec, common::leaf_with(&[("a", "1")]));
    set_u32(&mut block, 8, 16);
    match decode(&codec, &block) {
        Err(FtError::VersionTooOld { version, min_supported }) => {
            assert_eq!(version, 16);
            assert_eq!(min_supported, 17);
        }
        other => panic!("expected VersionTooOld, got {:?}", other),
    }
}

#[test]
fn test_version_too_new() {
    let codec = common::codec(CompressionMethod::None);
    let mut block = encoded(&codec, common::leaf_with(&[("a", "1")]));
    set_u32(&mut block, 8, 21);
    match decode(&codec, &block) {
        Err(FtError::VersionTooNew { version, current }) => {
            assert_eq!(version, 21);
            assert_eq!(current, 20);
        }
        other => panic!("expected VersionTooNew, got {:?}", other),
    }
}

#[test]
fn test_bad_magic() {
    let codec = common::codec(CompressionMethod::None);
    let mut block = encoded(&codec, common::leaf_with(&[("a", "1")]));
    block[..8].copy_from_slice(b"tokuwhat");
    assert!(matches!(decode(&codec, &block), Err(FtError::BadFormat(_))));
}

#[test]
fn test_magic_disagreeing_with_height() {
    let codec = common::codec(CompressionMethod::None);
    let mut block = encoded(&codec, common::leaf_with(&[("a", "1"), ("b", "2")]));
    block[..8].copy_from_slice(b"tokunode");
    common::reseal_header(&mut block, header_size(1));
    assert!(matches!(decode(&codec, &block), Err(FtError::BadFormat(_))));
}

// =============================================================================
// Partition Table
// =============================================================================

#[test]
fn test_hostile_child_count() {
    let codec = common::codec(CompressionMethod::None);
    let mut block = encoded(&codec, common::multi_basement_leaf(2, 2));
    set_u32(&mut block, 20, u32::MAX);
    assert!(matches!(decode(&codec, &block), Err(FtError::BadFormat(_))));

    set_u32(&mut block, 20, 0);
    assert!(matches!(decode(&codec, &block), Err(FtError::BadFormat(_))));
}

#[test]
fn test_gap_in_partition_table() {
    let codec = common::codec(CompressionMethod::None);
    let mut block = encoded(&codec, common::multi_basement_leaf(3, 4));
    let header_len = header_size(3);

    // Second partition's start shifted by one byte
    let start_offset = 24 + 8;
    let start = get_u32(&block, start_offset);
    set_u32(&mut block, start_offset, start + 1);
    common::reseal_header(&mut block, header_len);

    match decode(&codec, &block) {
        Err(FtError::BadFormat(msg)) => assert!(msg.contains("partition 1"), "{}", msg),
        other => panic!("expected BadFormat, got {:?}", other),
    }
}

#[test]
fn test_partition_past_block_end() {
    let codec = common::codec(CompressionMethod::None);
    let mut block = encoded(&codec, common::multi_basement_leaf(2, 4));
    let header_len = header_size(2);

    let size_offset = 24 + 8 + 4;
    let size = get_u32(&block, size_offset);
    set_u32(&mut block, size_offset, size + 100);
    common::reseal_header(&mut block, header_len);

    assert!(matches!(decode(&codec, &block), Err(FtError::BadFormat(_))));
}

#[test]
fn test_failed_decode_leaves_nothing_behind() {
    // A corrupt block yields an error, not a partially decoded node.
    let codec = common::codec(CompressionMethod::Zlib);
    let mut node = common::multi_basement_leaf(4, 10);
    let serialized = codec.serialize_node(&mut node, false).unwrap();
    let mut block = serialized.bytes;
    let last = serialized.partitions[3];
    let at = last.end() as usize - 1;
    block[at] ^= 0xff;

    assert!(decode(&codec, &block).is_err());
    let minimal = codec.deserialize_node_from_bytes(BlockNum(1), block.into(), &FetchPlan::Minimal);
    assert!(minimal.is_ok(), "lazily kept partitions are verified when decoded");
}
