//! Chunk-level buddy allocation
//!
//! This module provides the allocator for a single chunk:
//! - Flat-array buddy tree with leftmost-first search
//! - Reversible 64-bit allocation handles
//! - Slab hand-off for sub-page requests
//! - Usage metrics

pub mod handle;
pub mod metrics;
pub mod pool_chunk;
pub mod tree;

use core::fmt;

pub use handle::Handle;
pub use metrics::{usage_percent, ChunkMetric};
pub use pool_chunk::PoolChunk;
pub use tree::BuddyTree;

/// Arena-local identifier of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub usize);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
