//! Leaf rebalancing
//!
//! Re-partitions a leaf's entries into basements sized to a byte budget.
//! Entries are taken greedily in key order: a new basement starts only when
//! the next entry would push the current one past the budget, so an entry
//! larger than the budget ends up alone in its basement.

use std::ops::Range;

use tracing::debug;

use crate::error::{FtError, Result};

use super::{Basement, Node, Partition};

/// Group consecutive entry sizes into basements under `budget` bytes each.
///
/// Always returns at least one range; an empty leaf gets one empty basement.
pub fn plan_basements(sizes: &[usize], budget: usize) -> Vec<Range<usize>> {
    let mut plan = Vec::new();
    let mut start = 0;
    let mut acc = 0usize;
    for (i, &size) in sizes.iter().enumerate() {
        if i > start && acc + size > budget {
            plan.push(start..i);
            start = i;
            acc = 0;
        }
        acc += size;
    }
    plan.push(start..sizes.len());
    plan
}

/// Redistribute every entry of a leaf across fresh basements.
///
/// All partitions must be available. Pivots become the key of the last entry
/// in each basement but the final one.
pub fn rebalance_leaf(node: &mut Node, budget: usize) -> Result<()> {
    if !node.is_leaf() {
        return Err(FtError::InvalidState(
            "only leaf nodes can be rebalanced".to_string(),
        ));
    }

    let mut entries: Vec<&[u8]> = Vec::new();
    let mut keys: Vec<&[u8]> = Vec::new();
    for child in 0..node.n_children() {
        let basement = node.basement(child).ok_or_else(|| {
            FtError::InvalidState(format!(
                "cannot rebalance: basement {} is {}",
                child,
                node.partitions[child].state.name()
            ))
        })?;
        entries.extend(basement.iter_encoded());
        keys.extend((0..basement.len()).filter_map(|i| basement.key(i)));
    }

    let sizes: Vec<usize> = entries.iter().map(|e| e.len()).collect();
    let plan = plan_basements(&sizes, budget);

    let mut basements = Vec::with_capacity(plan.len());
    let mut pivots = Vec::with_capacity(plan.len() - 1);
    for (n, range) in plan.iter().enumerate() {
        let mut basement = Basement::new();
        for bytes in &entries[range.clone()] {
            basement.push_encoded(bytes)?;
        }
        if n + 1 < plan.len() {
            pivots.push(keys[range.end - 1].to_vec());
        }
        basements.push(basement);
    }

    debug!(
        blocknum = node.blocknum.0,
        entries = entries.len(),
        before = node.n_children(),
        after = basements.len(),
        "Rebalanced leaf"
    );

    node.pivots = pivots;
    node.partitions = basements.into_iter().map(Partition::leaf).collect();
    node.mark_dirty();
    Ok(())
}
