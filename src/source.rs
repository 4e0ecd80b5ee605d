//! Backing memory for chunks.

use alloc::alloc::{alloc, dealloc};
use alloc::vec::Vec;
use core::alloc::Layout;

#[cfg(feature = "log")]
use log::warn;

use crate::{AllocError, AllocResult};

/// Provider of the contiguous memory blocks chunks are carved from.
pub trait ChunkSource {
    /// Reserve `size` bytes aligned to `alignment` and return the base address.
    fn alloc_chunk(&mut self, size: usize, alignment: usize) -> AllocResult<usize>;

    /// Return a block previously handed out by [`alloc_chunk`](Self::alloc_chunk).
    fn dealloc_chunk(&mut self, base: usize, size: usize);
}

/// Chunk source backed by the global heap.
///
/// Outstanding blocks are released when the source is dropped.
#[derive(Default)]
pub struct HeapChunkSource {
    allocated: Vec<(usize, Layout)>,
}

impl HeapChunkSource {
    pub const fn new() -> Self {
        Self {
            allocated: Vec::new(),
        }
    }

    /// Number of blocks currently handed out.
    pub fn outstanding(&self) -> usize {
        self.allocated.len()
    }
}

impl ChunkSource for HeapChunkSource {
    fn alloc_chunk(&mut self, size: usize, alignment: usize) -> AllocResult<usize> {
        if size == 0 {
            return Err(AllocError::InvalidParam);
        }
        let layout =
            Layout::from_size_align(size, alignment).map_err(|_| AllocError::InvalidParam)?;
        // SAFETY: layout has a non-zero size.
        let addr = unsafe { alloc(layout) } as usize;
        if addr == 0 {
            return Err(AllocError::NoMemory);
        }
        debug_assert!(crate::is_aligned(addr, alignment));
        self.allocated.push((addr, layout));
        Ok(addr)
    }

    fn dealloc_chunk(&mut self, base: usize, size: usize) {
        match self
            .allocated
            .iter()
            .position(|&(addr, layout)| addr == base && layout.size() == size)
        {
            Some(idx) => {
                let (addr, layout) = self.allocated.swap_remove(idx);
                // SAFETY: the block was allocated by `alloc_chunk` with this layout.
                unsafe { dealloc(addr as *mut u8, layout) };
            }
            None => {
                warn!(
                    "heap chunk source: dealloc of unknown block {:#x} ({} bytes)",
                    base, size
                );
            }
        }
    }
}

impl Drop for HeapChunkSource {
    fn drop(&mut self) {
        for (addr, layout) in self.allocated.drain(..) {
            // SAFETY: every recorded block came from `alloc_chunk` with this layout.
            unsafe { dealloc(addr as *mut u8, layout) };
        }
    }
}
