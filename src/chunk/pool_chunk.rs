//! One chunk of pooled memory.
//!
//! A pooled chunk carves `page_size << max_order` bytes into power-of-two
//! runs through its [`BuddyTree`] and hands single leaves to [`PageSlab`]s
//! for sub-page requests. An unpooled chunk has no tree: it backs exactly one
//! oversized allocation and exists so that the arena can treat every buffer
//! the same way.
//!
//! A chunk takes no locks of its own. Every `&mut self` method must be
//! called with the arena lock held; slab hand-offs additionally lock the
//! size-class pool obtained from the [`SlabRegistry`].

use alloc::vec::Vec;

#[cfg(feature = "log")]
use log::{debug, warn};

use super::handle::Handle;
use super::metrics::ChunkMetric;
use super::tree::BuddyTree;
use super::ChunkId;
use crate::buffer::PooledBuf;
use crate::chunk_list::UsageClass;
use crate::slab::{PageSlab, SlabKey, SlabPool, SlabRegistry};
use crate::source::ChunkSource;
use crate::{AllocError, AllocResult};

/// Buddy-tree allocator over one contiguous memory block.
pub struct PoolChunk {
    id: ChunkId,
    /// Base address of the backing block.
    memory: usize,
    /// Added to every offset written into a buffer.
    offset: usize,
    page_size: usize,
    chunk_size: usize,
    free_bytes: usize,
    tree: Option<BuddyTree>,
    slabs: Vec<Option<PageSlab>>,
    /// Usage bucket currently holding this chunk. Maintained by `ChunkLists`.
    list: Option<UsageClass>,
}

impl PoolChunk {
    /// Create a fully free pooled chunk of `page_size << max_order` bytes.
    pub fn new(id: ChunkId, memory: usize, offset: usize, page_size: usize, max_order: usize) -> Self {
        let tree = BuddyTree::new(page_size, max_order);
        let chunk_size = page_size << max_order;
        let mut slabs = Vec::with_capacity(tree.leaf_count());
        slabs.resize_with(tree.leaf_count(), || None);
        debug!(
            "pool chunk {}: created at {:#x}, {} pages of {:#x}",
            id,
            memory,
            tree.leaf_count(),
            page_size
        );
        Self {
            id,
            memory,
            offset,
            page_size,
            chunk_size,
            free_bytes: chunk_size,
            tree: Some(tree),
            slabs,
            list: None,
        }
    }

    /// Create a chunk backing a single allocation of `size` bytes.
    pub fn new_unpooled(id: ChunkId, memory: usize, offset: usize, size: usize) -> Self {
        Self {
            id,
            memory,
            offset,
            page_size: 0,
            chunk_size: size,
            free_bytes: 0,
            tree: None,
            slabs: Vec::new(),
            list: None,
        }
    }

    pub fn id(&self) -> ChunkId {
        self.id
    }

    pub fn memory(&self) -> usize {
        self.memory
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn is_unpooled(&self) -> bool {
        self.tree.is_none()
    }

    pub fn tree(&self) -> Option<&BuddyTree> {
        self.tree.as_ref()
    }

    /// Slab currently or previously attached to leaf `leaf`.
    pub fn slab(&self, leaf: usize) -> Option<&PageSlab> {
        self.slabs.get(leaf).and_then(Option::as_ref)
    }

    pub(crate) fn list(&self) -> Option<UsageClass> {
        self.list
    }

    pub(crate) fn set_list(&mut self, list: Option<UsageClass>) {
        self.list = list;
    }

    /// Allocate `norm_capacity` bytes: a run when it is at least a page,
    /// otherwise a slot of a slab page.
    pub fn allocate<R: SlabRegistry + ?Sized>(
        &mut self,
        norm_capacity: usize,
        registry: &R,
    ) -> AllocResult<Handle> {
        if norm_capacity >= self.page_size {
            self.allocate_run(norm_capacity)
        } else {
            self.allocate_subpage(norm_capacity, registry)
        }
    }

    /// Allocate a run of `norm_capacity` bytes, a power-of-two multiple of the
    /// page size.
    pub fn allocate_run(&mut self, norm_capacity: usize) -> AllocResult<Handle> {
        let page_size = self.page_size;
        let chunk_size = self.chunk_size;
        let tree = self.tree.as_mut().ok_or(AllocError::InvalidParam)?;
        if norm_capacity < page_size
            || norm_capacity > chunk_size
            || !norm_capacity.is_power_of_two()
        {
            return Err(AllocError::InvalidParam);
        }

        let d = tree.depth_for_pages(norm_capacity / page_size);
        let Some(id) = tree.allocate_node(d) else {
            debug!(
                "pool chunk {}: no free run of {} bytes",
                self.id, norm_capacity
            );
            return Err(AllocError::NoMemory);
        };
        self.free_bytes -= tree.run_length(id);
        Ok(Handle::run(id))
    }

    /// Take a fresh leaf, attach it to a slab of `norm_capacity`-byte slots
    /// and allocate its first slot.
    pub fn allocate_subpage<R: SlabRegistry + ?Sized>(
        &mut self,
        norm_capacity: usize,
        registry: &R,
    ) -> AllocResult<Handle> {
        let page_size = self.page_size;
        let tree = self.tree.as_mut().ok_or(AllocError::InvalidParam)?;
        if norm_capacity == 0 || norm_capacity >= page_size {
            return Err(AllocError::InvalidParam);
        }
        let pool = registry
            .pool(norm_capacity)
            .ok_or(AllocError::InvalidParam)?;
        let mut pool = pool.lock();

        // slabs only ever live on leaves
        let d = tree.max_order();
        let Some(id) = tree.allocate_node(d) else {
            debug!(
                "pool chunk {}: no free page for {}-byte slots",
                self.id, norm_capacity
            );
            return Err(AllocError::NoMemory);
        };
        self.free_bytes -= page_size;

        let leaf = tree.leaf_index(id);
        let key = SlabKey::new(self.id, leaf);
        let run_offset = tree.run_offset(id);
        let slab =
            self.slabs[leaf].get_or_insert_with(|| PageSlab::new(key, id, run_offset, page_size));
        slab.init(norm_capacity, &mut pool);

        match slab.allocate(&mut pool) {
            Some(slot) => Ok(Handle::slot(id, slot)),
            None => panic!(
                "pool chunk {}: freshly initialized slab at leaf {} has no free slot",
                self.id, leaf
            ),
        }
    }

    /// Allocate one more slot from the slab already attached to `leaf`.
    ///
    /// `pool` must be the locked pool of that slab's size class.
    pub fn allocate_in_slab(&mut self, leaf: usize, pool: &mut SlabPool) -> AllocResult<Handle> {
        let slab = self
            .slabs
            .get_mut(leaf)
            .and_then(Option::as_mut)
            .ok_or(AllocError::NotAllocated)?;
        let slot = slab.allocate(pool).ok_or(AllocError::NoMemory)?;
        Ok(Handle::slot(slab.node_index(), slot))
    }

    /// Release the run or slot behind `handle`.
    ///
    /// A slot release only returns its leaf to the tree once the page holds no
    /// live slots. Handles must come from this chunk and be freed once.
    pub fn free<R: SlabRegistry + ?Sized>(&mut self, handle: Handle, registry: &R) {
        let Some(tree) = self.tree.as_mut() else {
            warn!("pool chunk {}: free on unpooled chunk", self.id);
            return;
        };
        let id = handle.node_index();

        if let Some(slot) = handle.slot_index() {
            let leaf = tree.leaf_index(id);
            let Some(slab) = self.slabs.get_mut(leaf).and_then(Option::as_mut) else {
                warn!("pool chunk {}: no slab at leaf {}", self.id, leaf);
                return;
            };
            debug_assert!(slab.in_use());
            let Some(pool) = registry.pool(slab.elem_size()) else {
                warn!(
                    "pool chunk {}: no pool for {}-byte slots",
                    self.id,
                    slab.elem_size()
                );
                return;
            };
            if slab.free(slot, &mut pool.lock()) {
                return;
            }
        }

        self.free_bytes += tree.run_length(id);
        tree.free_node(id);
    }

    /// Point `buf` at the memory behind `handle`.
    pub fn init_buffer(
        &self,
        buf: &mut PooledBuf,
        handle: Handle,
        req_capacity: usize,
    ) -> AllocResult {
        let Some(tree) = self.tree.as_ref() else {
            self.init_unpooled_buffer(buf);
            return Ok(());
        };
        let id = handle.node_index();

        match handle.slot_index() {
            None => {
                debug_assert!(tree.is_allocated(id), "node {} is not allocated", id);
                buf.init(
                    self.id,
                    handle,
                    self.memory,
                    tree.run_offset(id) + self.offset,
                    req_capacity,
                    tree.run_length(id),
                );
            }
            Some(slot) => {
                let slab = self
                    .slab(tree.leaf_index(id))
                    .ok_or(AllocError::NotAllocated)?;
                debug_assert!(slab.in_use());
                debug_assert!(req_capacity <= slab.elem_size());
                buf.init(
                    self.id,
                    handle,
                    self.memory,
                    slab.slot_offset(slot) + self.offset,
                    req_capacity,
                    slab.elem_size(),
                );
            }
        }
        Ok(())
    }

    /// Point `buf` at the whole of an unpooled chunk.
    pub fn init_unpooled_buffer(&self, buf: &mut PooledBuf) {
        debug_assert!(self.is_unpooled());
        buf.init_unpooled(self.id, self.memory + self.offset, self.chunk_size);
    }

    /// Hand the backing block back to the source it came from.
    pub fn destroy(self, source: &mut dyn ChunkSource) {
        debug!(
            "pool chunk {}: destroyed, {:#x} ({} bytes)",
            self.id, self.memory, self.chunk_size
        );
        source.dealloc_chunk(self.memory, self.chunk_size);
    }
}

impl ChunkMetric for PoolChunk {
    fn usage(&self) -> usize {
        super::metrics::usage_percent(self.free_bytes, self.chunk_size)
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn free_bytes(&self) -> usize {
        self.free_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slab::SlabPools;

    fn small_chunk() -> PoolChunk {
        // chunk 16, page 4
        PoolChunk::new(ChunkId(0), 0, 0, 4, 2)
    }

    fn offset_of(chunk: &PoolChunk, handle: Handle) -> usize {
        let mut buf = PooledBuf::new();
        chunk.init_buffer(&mut buf, handle, 1).unwrap();
        buf.offset()
    }

    #[test]
    fn test_fresh_chunk() {
        let chunk = small_chunk();
        assert_eq!(chunk.chunk_size(), 16);
        assert_eq!(chunk.free_bytes(), 16);
        assert_eq!(chunk.usage(), 0);
        assert!(!chunk.is_unpooled());
    }

    #[test]
    fn test_run_placement_and_reuse() {
        let pools = SlabPools::new(4);
        let mut chunk = small_chunk();

        let a = chunk.allocate(4, &pools).unwrap();
        assert_eq!(offset_of(&chunk, a), 0);
        let b = chunk.allocate(4, &pools).unwrap();
        assert_eq!(offset_of(&chunk, b), 4);
        let c = chunk.allocate(8, &pools).unwrap();
        assert_eq!(offset_of(&chunk, c), 8);
        assert_eq!(chunk.free_bytes(), 0);

        chunk.free(a, &pools);
        let d = chunk.allocate(4, &pools).unwrap();
        assert_eq!(offset_of(&chunk, d), 0);
        assert_eq!(d, a);
    }

    #[test]
    fn test_whole_chunk_round_trip() {
        let pools = SlabPools::new(4);
        let mut chunk = small_chunk();

        let handle = chunk.allocate(16, &pools).unwrap();
        assert_eq!(chunk.usage(), 100);
        assert_eq!(chunk.allocate(4, &pools), Err(AllocError::NoMemory));

        chunk.free(handle, &pools);
        assert_eq!(chunk.free_bytes(), 16);
        assert_eq!(chunk.usage(), 0);
    }

    #[test]
    fn test_invalid_run_sizes() {
        let mut chunk = small_chunk();
        assert_eq!(chunk.allocate_run(12), Err(AllocError::InvalidParam));
        assert_eq!(chunk.allocate_run(32), Err(AllocError::InvalidParam));
        assert_eq!(chunk.allocate_run(2), Err(AllocError::InvalidParam));
        assert_eq!(chunk.free_bytes(), 16);
    }

    #[test]
    fn test_buffer_window() {
        let pools = SlabPools::new(4);
        let mut chunk = PoolChunk::new(ChunkId(7), 0x10000, 0x40, 4, 2);
        let _ = chunk.allocate(8, &pools).unwrap();
        let handle = chunk.allocate(4, &pools).unwrap();

        let mut buf = PooledBuf::new();
        chunk.init_buffer(&mut buf, handle, 3).unwrap();
        assert_eq!(buf.chunk(), Some(ChunkId(7)));
        assert_eq!(buf.handle(), Some(handle));
        assert_eq!(buf.offset(), 8 + 0x40);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.max_len(), 4);
        assert_eq!(buf.addr(), 0x10000 + 0x48);
    }

    #[test]
    fn test_unpooled_chunk() {
        let pools = SlabPools::new(4096);
        let mut chunk = PoolChunk::new_unpooled(ChunkId(3), 0x8000, 0, 100_000);
        assert!(chunk.is_unpooled());
        assert_eq!(chunk.chunk_size(), 100_000);
        assert_eq!(chunk.usage(), 100);
        assert_eq!(chunk.allocate(4096, &pools), Err(AllocError::InvalidParam));

        let mut buf = PooledBuf::new();
        chunk
            .init_buffer(&mut buf, Handle::from_raw(0), 100_000)
            .unwrap();
        assert_eq!(buf.addr(), 0x8000);
        assert_eq!(buf.len(), 100_000);
        assert_eq!(buf.handle(), None);
    }
}
