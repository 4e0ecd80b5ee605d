//! Arena configuration.
//!
//! Chunk geometry is fixed per arena: every chunk is `page_size << max_order`
//! bytes and carries a buddy tree of height `max_order`.

use crate::{AllocError, AllocResult, DEFAULT_MAX_ORDER, DEFAULT_PAGE_SIZE};

#[cfg(feature = "log")]
use log::error;

/// Smallest page size an arena accepts.
pub const MIN_PAGE_SIZE: usize = 0x1000;

/// Largest tree height an arena accepts.
pub const MAX_ORDER_LIMIT: usize = 14;

/// Largest chunk an arena accepts (1 GiB).
pub const MAX_CHUNK_SIZE: usize = 1 << 30;

/// Chunk geometry shared by all chunks of one arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Byte length of one tree leaf. Must be a power of two.
    pub page_size: usize,
    /// Height of the buddy tree.
    pub max_order: usize,
}

impl ArenaConfig {
    pub const fn new(page_size: usize, max_order: usize) -> Self {
        Self {
            page_size,
            max_order,
        }
    }

    /// Byte length of every pooled chunk.
    pub const fn chunk_size(&self) -> usize {
        self.page_size << self.max_order
    }

    /// Check that the geometry is usable by an arena.
    pub fn validate(&self) -> AllocResult {
        if self.page_size < MIN_PAGE_SIZE || !self.page_size.is_power_of_two() {
            error!(
                "arena config: page size {:#x} must be a power of two >= {:#x}",
                self.page_size, MIN_PAGE_SIZE
            );
            return Err(AllocError::InvalidParam);
        }
        if self.max_order > MAX_ORDER_LIMIT {
            error!(
                "arena config: max order {} exceeds {}",
                self.max_order, MAX_ORDER_LIMIT
            );
            return Err(AllocError::InvalidParam);
        }
        if self.page_size > MAX_CHUNK_SIZE >> self.max_order {
            error!(
                "arena config: chunk size {:#x} << {} exceeds {:#x}",
                self.page_size, self.max_order, MAX_CHUNK_SIZE
            );
            return Err(AllocError::InvalidParam);
        }
        Ok(())
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, DEFAULT_MAX_ORDER)
    }
}
