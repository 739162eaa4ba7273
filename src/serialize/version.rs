//! Layout versions
//!
//! Every readable layout is described by one row of a schema table listing
//! the fields it carries. Readers consult the row instead of branching on
//! version numbers.
//!
//! | Version | Header fields                          | Partitioned | Info MSN | Fingerprints | Message MSN | Fresh flag |
//! |---------|----------------------------------------|-------------|----------|--------------|-------------|------------|
//! | 17      | magic, version, version_original       | no          | no       | yes          | no          | no         |
//! | 18      | + n_children                           | yes         | no       | yes          | no          | no         |
//! | 19      | + build_id (before n_children)         | yes         | yes      | no           | yes         | no         |
//! | 20      | same as 19                             | yes         | yes      | no           | yes         | yes        |

use crate::error::{FtError, Result};

/// Layout written by this build
pub const LAYOUT_VERSION: u32 = 20;

/// Oldest layout this build can read
pub const MIN_SUPPORTED_VERSION: u32 = 17;

/// Identifies the build that last wrote a node
pub const BUILD_ID: u32 = 1;

pub const LEAF_MAGIC: &[u8; 8] = b"tokuleaf";
pub const INTERNAL_MAGIC: &[u8; 8] = b"tokunode";

pub const MAGIC_SIZE: usize = 8;

/// Fields present in one on-disk layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutSchema {
    pub version: u32,
    pub header_build_id: bool,
    pub header_n_children: bool,
    /// Node stored as header + info + one sub-block per partition
    pub partitioned: bool,
    pub info_max_msn: bool,
    pub child_fingerprints: bool,
    pub message_msn: bool,
    pub message_fresh: bool,
}

const SCHEMAS: [LayoutSchema; 4] = [
    LayoutSchema {
        version: 17,
        header_build_id: false,
        header_n_children: false,
        partitioned: false,
        info_max_msn: false,
        child_fingerprints: true,
        message_msn: false,
        message_fresh: false,
    },
    LayoutSchema {
        version: 18,
        header_build_id: false,
        header_n_children: true,
        partitioned: true,
        info_max_msn: false,
        child_fingerprints: true,
        message_msn: false,
        message_fresh: false,
    },
    LayoutSchema {
        version: 19,
        header_build_id: true,
        header_n_children: true,
        partitioned: true,
        info_max_msn: true,
        child_fingerprints: false,
        message_msn: true,
        message_fresh: false,
    },
    LayoutSchema {
        version: 20,
        header_build_id: true,
        header_n_children: true,
        partitioned: true,
        info_max_msn: true,
        child_fingerprints: false,
        message_msn: true,
        message_fresh: true,
    },
];

impl LayoutSchema {
    /// Schema of the layout this build writes
    pub fn current() -> &'static LayoutSchema {
        &SCHEMAS[SCHEMAS.len() - 1]
    }

    pub fn is_current(&self) -> bool {
        self.version == LAYOUT_VERSION
    }

    /// Bytes of fixed header fields before the partition table
    pub fn fixed_header_size(&self) -> usize {
        let mut size = MAGIC_SIZE + 4 + 4;
        if self.header_build_id {
            size += 4;
        }
        if self.header_n_children {
            size += 4;
        }
        size
    }
}

/// Look up the schema for a stored version
pub fn schema(version: u32) -> Result<&'static LayoutSchema> {
    if version < MIN_SUPPORTED_VERSION {
        return Err(FtError::VersionTooOld {
            version,
            min_supported: MIN_SUPPORTED_VERSION,
        });
    }
    if version > LAYOUT_VERSION {
        return Err(FtError::VersionTooNew {
            version,
            current: LAYOUT_VERSION,
        });
    }
    SCHEMAS
        .iter()
        .find(|s| s.version == version)
        .ok_or_else(|| FtError::BadFormat(format!("no schema for layout version {}", version)))
}

/// Size of the fixed header fields present at `version`
pub fn legacy_header_size(version: u32) -> Result<usize> {
    Ok(schema(version)?.fixed_header_size())
}
