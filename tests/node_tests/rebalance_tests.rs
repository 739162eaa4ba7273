//! Tests for leaf rebalancing
//!
//! These tests verify:
//! - Greedy grouping under a byte budget
//! - Oversized entries get a basement of their own
//! - Pivots are the last key of every basement but the final one
//! - Rebalancing during serialization survives a round trip

use ftnode::node::{plan_basements, rebalance_leaf, Basement, LeafEntry};
use ftnode::serialize::FetchPlan;
use ftnode::{BlockNum, CompressionMethod, FtError, Node};

#[path = "../common/mod.rs"]
mod common;

// =============================================================================
// Planning Tests
// =============================================================================

#[test]
fn test_plan_budget_scenario() {
    let b = 1000;
    let plan = plan_basements(&[b - 1, b - 1, 1, b], b);
    assert_eq!(plan, vec![0..1, 1..3, 3..4]);
}

#[test]
fn test_plan_everything_fits() {
    assert_eq!(plan_basements(&[10, 20, 30], 100), vec![0..3]);
}

#[test]
fn test_plan_exact_budget_stays_together() {
    assert_eq!(plan_basements(&[50, 50, 1], 100), vec![0..2, 2..3]);
}

// =============================================================================
// Leaf Tests
// =============================================================================

/// Clean entry whose packed size is exactly `size` (at least 10)
fn sized_entry(key: &str, size: usize) -> LeafEntry {
    let value = "v".repeat(size - 9 - key.len());
    let entry = LeafEntry::clean(key, value);
    assert_eq!(entry.disk_size(), size);
    entry
}

#[test]
fn test_rebalance_leaf_scenario() {
    let budget = 100;
    let entries = vec![
        sized_entry("a", budget - 10),
        sized_entry("b", budget - 10),
        sized_entry("c", 10),
        sized_entry("d", budget),
    ];
    let basement = Basement::from_entries(&entries).unwrap();
    let mut node = Node::new_leaf(BlockNum(1), Vec::new(), vec![basement]).unwrap();
    node.mark_clean();

    rebalance_leaf(&mut node, budget).unwrap();

    assert_eq!(node.n_children(), 3);
    assert_eq!(node.pivots, vec![b"a".to_vec(), b"c".to_vec()]);
    assert_eq!(node.basement(0).unwrap().entries().unwrap(), entries[0..1].to_vec());
    assert_eq!(node.basement(1).unwrap().entries().unwrap(), entries[1..3].to_vec());
    assert_eq!(node.basement(2).unwrap().entries().unwrap(), entries[3..4].to_vec());
    assert!(node.is_dirty());
}

#[test]
fn test_rebalance_merges_small_basements() {
    let mut node = common::multi_basement_leaf(6, 3);
    let total = (0..6).map(|i| node.basement(i).unwrap().disk_size()).sum::<usize>();

    rebalance_leaf(&mut node, total).unwrap();

    assert_eq!(node.n_children(), 1);
    assert!(node.pivots.is_empty());
    assert_eq!(node.basement(0).unwrap().len(), 18);
}

#[test]
fn test_rebalance_empty_leaf() {
    let mut node = Node::empty_leaf(BlockNum(1));
    rebalance_leaf(&mut node, 10).unwrap();
    assert_eq!(node.n_children(), 1);
    assert!(node.basement(0).unwrap().is_empty());
}

#[test]
fn test_rebalance_rejects_internal_nodes() {
    let mut node = common::internal_node(2, 2);
    assert!(matches!(rebalance_leaf(&mut node, 10), Err(FtError::InvalidState(_))));
}

#[test]
fn test_rebalance_during_serialize() {
    let codec = common::codec(CompressionMethod::Zlib);
    let mut node = common::multi_basement_leaf(1, 200);
    let budget = node.basement(0).unwrap().disk_size() / 4 + 1;

    let serialized = codec.serialize_node_to_memory(&mut node, budget, true).unwrap();
    assert_eq!(serialized.partitions.len(), node.n_children());
    assert!(node.n_children() >= 4);

    let decoded = codec
        .deserialize_node_from_bytes(node.blocknum, serialized.bytes.into(), &FetchPlan::All)
        .unwrap();
    assert_eq!(decoded.pivots, node.pivots);
    for i in 0..node.n_children() {
        assert_eq!(decoded.basement(i), node.basement(i));
    }
}
