//! Chunk usage metrics.

use core::fmt;

use super::pool_chunk::PoolChunk;

/// Read-only view of how full a chunk is.
pub trait ChunkMetric {
    /// Percentage of the chunk in use, `0..=100`.
    fn usage(&self) -> usize;

    /// Size of the chunk in bytes.
    fn chunk_size(&self) -> usize;

    /// Bytes not covered by any live run or slab page.
    fn free_bytes(&self) -> usize;
}

/// Usage percentage of a chunk with `free_bytes` of `chunk_size` unused.
///
/// Rounds in favour of free space, but a chunk with any free byte left is
/// reported as at most 99% used.
pub fn usage_percent(free_bytes: usize, chunk_size: usize) -> usize {
    if free_bytes == 0 {
        return 100;
    }
    let free_percentage = (free_bytes as u128 * 100 / chunk_size as u128) as usize;
    if free_percentage == 0 {
        return 99;
    }
    100 - free_percentage
}

impl fmt::Display for PoolChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Chunk({}: {}%, {}/{})",
            self.id(),
            self.usage(),
            self.chunk_size() - self.free_bytes(),
            self.chunk_size()
        )
    }
}
