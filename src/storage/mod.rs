//! Storage Module
//!
//! Block-level persistence for serialized nodes.
//!
//! ## Responsibilities
//! - Positioned block I/O on a file or in memory ([`BlockDevice`])
//! - Aligned, copy-on-write space allocation ([`BlockAllocator`])
//! - Block number to location translation and node read/write
//!   ([`NodeStore`])
//!
//! ## Device Layout
//! ```text
//! ┌────────────────────────────────────────┐
//! │ Node block (aligned offset)            │
//! │ ┌────────┬──────┬─────────────────────┐│
//! │ │ Header │ Info │ Partition frames... ││
//! │ └────────┴──────┴─────────────────────┘│
//! ├────────────────────────────────────────┤
//! │ padding up to the next alignment       │
//! ├────────────────────────────────────────┤
//! │ Node block                             │
//! │ ...                                    │
//! └────────────────────────────────────────┘
//! ```

mod allocator;
mod device;
mod store;

pub use allocator::{BlockAllocator, BumpAllocator};
pub use device::{BlockDevice, FileDevice, MemoryDevice};
pub use store::NodeStore;

/// Byte range of one stored block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockLocation {
    pub offset: u64,
    pub size: u64,
}
