//! Chunk buddy allocator
//!
//! This crate implements the chunk-level allocator behind a pooled buffer
//! allocator, featuring:
//! - Buddy tree over one chunk, stored as two flat arrays (no pointers)
//! - Single 64-bit handles encoding the tree node and optional slab slot
//! - Per-page slab delegation for sub-page requests
//! - Usage-bucketed chunk lists and an arena that owns chunk lifecycle
//!
//! # Locking
//!
//! [`PoolChunk`] and [`BuddyTree`] hold no locks. All mutation goes through
//! [`PoolArena`], which serializes chunk access behind one arena lock and
//! takes the per-size-class slab pool lock only while the arena lock is held.

#![no_std]

extern crate alloc;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops
#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// Default page size: the byte length of one buddy tree leaf.
pub const DEFAULT_PAGE_SIZE: usize = 0x2000;

/// Default tree height; a default chunk is `DEFAULT_PAGE_SIZE << 11` = 16 MiB.
pub const DEFAULT_MAX_ORDER: usize = 11;

/// The error type used for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Invalid `size` or configuration (e.g. not a power of two).
    InvalidParam,
    /// No enough memory to allocate.
    NoMemory,
    /// Deallocate an unallocated memory region.
    NotAllocated,
}

impl core::fmt::Display for AllocError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AllocError::InvalidParam => f.write_str("invalid allocation parameter"),
            AllocError::NoMemory => f.write_str("not enough memory"),
            AllocError::NotAllocated => f.write_str("region is not allocated"),
        }
    }
}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type AllocResult<T = ()> = Result<T, AllocError>;

#[inline]
const fn log2(val: usize) -> u32 {
    usize::BITS - 1 - val.leading_zeros()
}

/// Checks whether the address has the demanded alignment.
///
/// Equivalent to `addr % align == 0`, but the alignment must be a power of two.
#[inline]
const fn is_aligned(base_addr: usize, align: usize) -> bool {
    base_addr & (align - 1) == 0
}

pub mod config;
pub use config::ArenaConfig;

pub mod chunk;
pub use chunk::{BuddyTree, ChunkId, ChunkMetric, Handle, PoolChunk};

pub mod slab;
pub use slab::{PageSlab, SlabKey, SlabPool, SlabPools, SlabRegistry};

pub mod size_class;
pub use size_class::SizeClass;

pub mod chunk_list;
pub use chunk_list::{ChunkLists, UsageClass};

pub mod buffer;
pub use buffer::PooledBuf;

pub mod source;
pub use source::{ChunkSource, HeapChunkSource};

pub mod arena;
#[cfg(feature = "tracking")]
pub use arena::ArenaStats;
pub use arena::PoolArena;
