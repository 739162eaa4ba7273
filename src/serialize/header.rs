//! Node header codec
//!
//! ```text
//! ┌──────────┬─────────────┬──────────────────┬──────────────┬─────────────────┐
//! │ magic[8] │ version u32 │ version_orig u32 │ build_id u32 │ n_children u32  │
//! ├──────────┴─────────────┴──────────────────┴──────────────┴─────────────────┤
//! │ (start u32, size u32) * n_children                                         │
//! ├────────────────────────────────────────────────────────────────────────────┤
//! │ checksum u32 over every preceding header byte                              │
//! └────────────────────────────────────────────────────────────────────────────┘
//! ```
//! Layout 18 has no build id. Layout 17 has neither build id, child count
//! nor partition table and is handled by the upgrade codec.

use crate::buffer::{ReadBuffer, WriteBuffer};
use crate::checksum::{checksum, CHECKSUM_SIZE};
use crate::error::{FtError, Result};
use crate::node::{Node, PartitionLocation};

use super::version::{
    schema, LayoutSchema, BUILD_ID, INTERNAL_MAGIC, LAYOUT_VERSION, LEAF_MAGIC, MAGIC_SIZE,
};

const LOCATION_SIZE: usize = 8;

/// Parsed and verified header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHeader {
    pub is_leaf: bool,
    pub version: u32,
    pub version_original: u32,
    /// Absent before layout 19
    pub build_id: Option<u32>,
    pub locations: Vec<PartitionLocation>,
    /// Bytes the header occupies, checksum included
    pub size: usize,
}

impl NodeHeader {
    pub fn n_children(&self) -> usize {
        self.locations.len()
    }
}

/// Exact size of a current-layout header for `n_children` partitions
pub fn header_size(n_children: usize) -> usize {
    LayoutSchema::current().fixed_header_size() + n_children * LOCATION_SIZE + CHECKSUM_SIZE
}

/// Write a current-layout header for `node` with the given partition table
pub fn serialize_header(node: &Node, locations: &[PartitionLocation]) -> Vec<u8> {
    assert_eq!(
        locations.len(),
        node.n_children(),
        "partition table does not match child count"
    );
    let mut wb = WriteBuffer::new(header_size(locations.len()));
    wb.start_checksum();
    wb.put_bytes(if node.is_leaf() { LEAF_MAGIC } else { INTERNAL_MAGIC });
    wb.put_u32(LAYOUT_VERSION);
    wb.put_u32(node.layout_version_original);
    wb.put_u32(BUILD_ID);
    wb.put_u32(locations.len() as u32);
    for location in locations {
        wb.put_u32(location.start);
        wb.put_u32(location.size);
    }
    wb.put_checksum();
    wb.finish()
}

/// Validate the magic and read the stored version.
///
/// Returns whether the magic names a leaf and the version's schema.
pub fn peek_version(bytes: &[u8]) -> Result<(bool, &'static LayoutSchema)> {
    let mut rb = ReadBuffer::new(bytes);
    let magic = rb.get_bytes(MAGIC_SIZE)?;
    let is_leaf = if magic == LEAF_MAGIC {
        true
    } else if magic == INTERNAL_MAGIC {
        false
    } else {
        return Err(FtError::BadFormat(format!(
            "bad node magic {}",
            hex::encode(magic)
        )));
    };
    let version = rb.get_u32()?;
    Ok((is_leaf, schema(version)?))
}

/// Total header size implied by the child count, once enough bytes are
/// present to read it. `Ok(None)` means `prefix` is too short to tell.
pub fn required_len(prefix: &[u8]) -> Result<Option<usize>> {
    let (_, schema) = peek_version(prefix)?;
    if !schema.partitioned {
        return Err(FtError::BadFormat(format!(
            "layout {} has no partition table",
            schema.version
        )));
    }
    let fixed = schema.fixed_header_size();
    if prefix.len() < fixed {
        return Ok(None);
    }
    let mut rb = ReadBuffer::new(&prefix[fixed - 4..fixed]);
    let n_children = rb.get_u32()? as usize;
    if n_children == 0 {
        return Err(FtError::BadFormat("node header declares no children".to_string()));
    }
    Ok(Some(fixed + n_children * LOCATION_SIZE + CHECKSUM_SIZE))
}

/// Parse a partitioned header (layouts 18 and later) from the start of
/// `bytes`, verifying its checksum.
pub fn deserialize_header(bytes: &[u8]) -> Result<NodeHeader> {
    let size = match required_len(bytes)? {
        Some(size) if size <= bytes.len() => size,
        Some(size) => {
            return Err(FtError::BadFormat(format!(
                "node header needs {} bytes, only {} available",
                size,
                bytes.len()
            )))
        }
        None => {
            return Err(FtError::BadFormat(format!(
                "{} bytes cannot hold a node header",
                bytes.len()
            )))
        }
    };

    let covered = &bytes[..size - CHECKSUM_SIZE];
    let mut rb = ReadBuffer::new(&bytes[size - CHECKSUM_SIZE..size]);
    let stored = rb.get_u32()?;
    let computed = checksum(covered);
    if stored != computed {
        return Err(FtError::checksum("node header", stored, computed));
    }

    let mut rb = ReadBuffer::new(covered);
    let is_leaf = rb.get_bytes(MAGIC_SIZE)? == LEAF_MAGIC;
    let version = rb.get_u32()?;
    let schema = schema(version)?;
    let version_original = rb.get_u32()?;
    let build_id = if schema.header_build_id {
        Some(rb.get_u32()?)
    } else {
        None
    };
    let n_children = rb.get_u32()? as usize;
    let mut locations = Vec::with_capacity(n_children);
    for _ in 0..n_children {
        let start = rb.get_u32()?;
        let size = rb.get_u32()?;
        locations.push(PartitionLocation { start, size });
    }
    rb.expect_end("node header")?;

    Ok(NodeHeader {
        is_leaf,
        version,
        version_original,
        build_id,
        locations,
        size,
    })
}

/// Check that the partition table tiles the block after the info sub-block
/// with no gaps or overlaps and ends exactly at `block_len`.
pub fn validate_layout(header: &NodeHeader, info_end: usize, block_len: usize) -> Result<()> {
    let mut expected = info_end as u64;
    for (i, location) in header.locations.iter().enumerate() {
        if location.start as u64 != expected {
            return Err(FtError::BadFormat(format!(
                "partition {} starts at {}, expected {}",
                i, location.start, expected
            )));
        }
        expected = location.end();
    }
    if expected != block_len as u64 {
        return Err(FtError::BadFormat(format!(
            "partitions end at {} but the block is {} bytes",
            expected, block_len
        )));
    }
    Ok(())
}
