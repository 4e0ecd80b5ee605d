//! Pool arena.
//!
//! The arena owns every chunk built from its [`ChunkSource`], normalizes
//! request sizes and routes each request:
//! - tiny and small requests first try a linked page of their slab pool
//! - otherwise the usage lists are searched in `q050, q025, q000, qInit, q075`
//!   order, and a new chunk is created when none has room
//! - requests larger than a chunk get a dedicated unpooled chunk
//!
//! All chunk state sits behind one arena lock. Slab pools have one lock per
//! size class, taken only while the arena lock is held.

use alloc::vec::Vec;
use core::fmt;

use kspin::SpinNoIrq;

#[cfg(feature = "log")]
use log::{debug, warn};

use crate::buffer::PooledBuf;
use crate::chunk::{ChunkId, ChunkMetric, PoolChunk};
use crate::chunk_list::{ChunkLists, UsageClass};
use crate::config::ArenaConfig;
use crate::size_class::{normalize_capacity, SizeClass};
use crate::slab::{SlabPools, SlabRegistry};
use crate::source::{ChunkSource, HeapChunkSource};
use crate::{AllocError, AllocResult};

/// Allocation counters
#[cfg(feature = "tracking")]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub tiny_allocations: usize,
    pub small_allocations: usize,
    pub normal_allocations: usize,
    pub huge_allocations: usize,
    pub deallocations: usize,
    pub active_chunks: usize,
}

struct ArenaState<S: ChunkSource> {
    source: S,
    chunks: Vec<Option<PoolChunk>>,
    free_ids: Vec<usize>,
    lists: ChunkLists,
    #[cfg(feature = "tracking")]
    stats: ArenaStats,
}

impl<S: ChunkSource> ArenaState<S> {
    fn chunk(&self, id: ChunkId) -> AllocResult<&PoolChunk> {
        self.chunks
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(AllocError::NotAllocated)
    }

    fn chunk_mut(&mut self, id: ChunkId) -> AllocResult<&mut PoolChunk> {
        self.chunks
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(AllocError::NotAllocated)
    }

    fn insert_chunk(&mut self, build: impl FnOnce(ChunkId) -> PoolChunk) -> ChunkId {
        let idx = match self.free_ids.pop() {
            Some(idx) => idx,
            None => {
                self.chunks.push(None);
                self.chunks.len() - 1
            }
        };
        let id = ChunkId(idx);
        self.chunks[idx] = Some(build(id));
        #[cfg(feature = "tracking")]
        {
            self.stats.active_chunks += 1;
        }
        id
    }

    fn destroy_chunk(&mut self, id: ChunkId) {
        let Some(chunk) = self.chunks.get_mut(id.0).and_then(Option::take) else {
            return;
        };
        chunk.destroy(&mut self.source);
        self.free_ids.push(id.0);
        #[cfg(feature = "tracking")]
        {
            self.stats.active_chunks -= 1;
        }
    }

    fn allocate_from_pool(
        &mut self,
        buf: &mut PooledBuf,
        req_capacity: usize,
        norm_capacity: usize,
        pools: &SlabPools,
    ) -> AllocResult<bool> {
        let Some(pool) = pools.pool(norm_capacity) else {
            return Ok(false);
        };
        let mut pool = pool.lock();
        let Some(key) = pool.first() else {
            return Ok(false);
        };
        let chunk = self.chunk_mut(key.chunk)?;
        let handle = chunk.allocate_in_slab(key.leaf, &mut pool)?;
        chunk.init_buffer(buf, handle, req_capacity)?;
        Ok(true)
    }

    fn allocate_normal(
        &mut self,
        buf: &mut PooledBuf,
        req_capacity: usize,
        norm_capacity: usize,
        config: &ArenaConfig,
        pools: &SlabPools,
    ) -> AllocResult {
        for list in UsageClass::ALLOCATION_ORDER {
            if self.lists.allocate(
                &mut self.chunks,
                list,
                buf,
                req_capacity,
                norm_capacity,
                pools,
            )? {
                return Ok(());
            }
        }

        let chunk_size = config.chunk_size();
        let memory = self.source.alloc_chunk(chunk_size, config.page_size)?;
        let id = self.insert_chunk(|id| {
            PoolChunk::new(id, memory, 0, config.page_size, config.max_order)
        });
        debug!(
            "pool arena: new chunk {} for a {}-byte request",
            id, req_capacity
        );

        let chunk = self.chunk_mut(id)?;
        let result = chunk
            .allocate(norm_capacity, pools)
            .and_then(|handle| chunk.init_buffer(buf, handle, req_capacity));
        match result {
            Ok(()) => {
                self.lists.add(&mut self.chunks, id, UsageClass::Init);
                Ok(())
            }
            Err(e) => {
                self.destroy_chunk(id);
                Err(e)
            }
        }
    }

    fn allocate_huge(
        &mut self,
        buf: &mut PooledBuf,
        req_capacity: usize,
        config: &ArenaConfig,
    ) -> AllocResult {
        let memory = self.source.alloc_chunk(req_capacity, config.page_size)?;
        let id = self.insert_chunk(|id| PoolChunk::new_unpooled(id, memory, 0, req_capacity));
        debug!(
            "pool arena: unpooled chunk {} of {} bytes",
            id, req_capacity
        );
        self.chunk(id)?.init_unpooled_buffer(buf);
        Ok(())
    }
}

impl<S: ChunkSource> Drop for ArenaState<S> {
    fn drop(&mut self) {
        for chunk in self.chunks.drain(..).flatten() {
            chunk.destroy(&mut self.source);
        }
    }
}

/// Arena of pooled chunks sharing one geometry and one set of slab pools.
pub struct PoolArena<S: ChunkSource = HeapChunkSource> {
    config: ArenaConfig,
    state: SpinNoIrq<ArenaState<S>>,
    slab_pools: SlabPools,
}

impl PoolArena<HeapChunkSource> {
    /// Arena whose chunks are allocated from the global heap.
    pub fn with_heap(config: ArenaConfig) -> AllocResult<Self> {
        Self::new(config, HeapChunkSource::new())
    }
}

impl<S: ChunkSource> PoolArena<S> {
    pub fn new(config: ArenaConfig, source: S) -> AllocResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: SpinNoIrq::new(ArenaState {
                source,
                chunks: Vec::new(),
                free_ids: Vec::new(),
                lists: ChunkLists::new(),
                #[cfg(feature = "tracking")]
                stats: ArenaStats::default(),
            }),
            slab_pools: SlabPools::new(config.page_size),
        })
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    pub fn slab_pools(&self) -> &SlabPools {
        &self.slab_pools
    }

    /// Size class a request of `req_capacity` bytes is served from.
    pub fn normalize_capacity(&self, req_capacity: usize) -> usize {
        normalize_capacity(req_capacity, self.config.chunk_size())
    }

    /// Allocate `req_capacity` bytes and point `buf` at them.
    pub fn allocate(&self, buf: &mut PooledBuf, req_capacity: usize) -> AllocResult {
        if buf.is_allocated() {
            warn!("pool arena: buffer is already allocated");
            return Err(AllocError::InvalidParam);
        }
        let chunk_size = self.config.chunk_size();
        let norm_capacity = normalize_capacity(req_capacity, chunk_size);
        let class = SizeClass::of(norm_capacity, self.config.page_size, chunk_size);

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if class == SizeClass::Huge {
            state.allocate_huge(buf, req_capacity, &self.config)?;
        } else if !class.is_subpage()
            || !state.allocate_from_pool(buf, req_capacity, norm_capacity, &self.slab_pools)?
        {
            state.allocate_normal(
                buf,
                req_capacity,
                norm_capacity,
                &self.config,
                &self.slab_pools,
            )?;
        }

        #[cfg(feature = "tracking")]
        {
            match class {
                SizeClass::Tiny => state.stats.tiny_allocations += 1,
                SizeClass::Small => state.stats.small_allocations += 1,
                SizeClass::Normal => state.stats.normal_allocations += 1,
                SizeClass::Huge => state.stats.huge_allocations += 1,
            }
        }
        Ok(())
    }

    /// Return the allocation behind `buf` and detach it.
    pub fn free(&self, buf: &mut PooledBuf) -> AllocResult {
        let Some((id, handle)) = buf.take() else {
            warn!("pool arena: free of an unallocated buffer");
            return Err(AllocError::NotAllocated);
        };

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let unpooled = match state.chunk(id) {
            Ok(chunk) => chunk.is_unpooled(),
            Err(e) => {
                warn!("pool arena: free references unknown chunk {}", id);
                return Err(e);
            }
        };

        match handle {
            Some(handle) if !unpooled => {
                if !state
                    .lists
                    .free(&mut state.chunks, id, handle, &self.slab_pools)
                {
                    state.destroy_chunk(id);
                }
            }
            _ => state.destroy_chunk(id),
        }

        #[cfg(feature = "tracking")]
        {
            state.stats.deallocations += 1;
        }
        Ok(())
    }

    /// Number of live chunks, pooled and unpooled.
    pub fn num_chunks(&self) -> usize {
        self.state.lock().chunks.iter().flatten().count()
    }

    /// Number of chunks in usage list `list`.
    pub fn list_len(&self, list: UsageClass) -> usize {
        self.state.lock().lists.len(list)
    }

    /// Usage percentage of chunk `id`, read under the arena lock.
    pub fn chunk_usage(&self, id: ChunkId) -> Option<usize> {
        self.state.lock().chunk(id).ok().map(ChunkMetric::usage)
    }

    /// Free bytes of chunk `id`, read under the arena lock.
    pub fn chunk_free_bytes(&self, id: ChunkId) -> Option<usize> {
        self.state.lock().chunk(id).ok().map(ChunkMetric::free_bytes)
    }

    #[cfg(feature = "tracking")]
    pub fn stats(&self) -> ArenaStats {
        self.state.lock().stats
    }
}

impl<S: ChunkSource> fmt::Display for PoolArena<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        for list in UsageClass::ALL {
            writeln!(f, "{}:", list)?;
            if state.lists.len(list) == 0 {
                writeln!(f, "  none")?;
                continue;
            }
            for id in state.lists.iter(list) {
                if let Ok(chunk) = state.chunk(id) {
                    writeln!(f, "  {}", chunk)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    const PAGE: usize = 0x1000;

    fn arena(max_order: usize) -> PoolArena {
        PoolArena::with_heap(ArenaConfig::new(PAGE, max_order)).unwrap()
    }

    #[test]
    fn test_invalid_config() {
        assert!(PoolArena::with_heap(ArenaConfig::new(100, 4)).is_err());
    }

    #[test]
    fn test_first_allocation_creates_chunk() {
        let arena = arena(4);
        assert_eq!(arena.num_chunks(), 0);

        let mut buf = PooledBuf::new();
        arena.allocate(&mut buf, 3000).unwrap();
        assert_eq!(arena.num_chunks(), 1);
        assert_eq!(buf.len(), 3000);
        assert_eq!(buf.max_len(), PAGE);
        assert_eq!(arena.list_len(UsageClass::Init), 1);

        arena.free(&mut buf).unwrap();
        assert!(!buf.is_allocated());
        // qInit chunks are kept
        assert_eq!(arena.num_chunks(), 1);
        assert_eq!(arena.chunk_free_bytes(ChunkId(0)), Some(16 * PAGE));
    }

    #[test]
    fn test_double_free_is_rejected() {
        let arena = arena(4);
        let mut buf = PooledBuf::new();
        arena.allocate(&mut buf, PAGE).unwrap();
        arena.free(&mut buf).unwrap();
        assert_eq!(arena.free(&mut buf), Err(AllocError::NotAllocated));
    }

    #[test]
    fn test_allocated_buffer_is_rejected() {
        let arena = arena(4);
        let mut buf = PooledBuf::new();
        arena.allocate(&mut buf, 64).unwrap();
        assert_eq!(arena.allocate(&mut buf, 64), Err(AllocError::InvalidParam));
        arena.free(&mut buf).unwrap();
    }

    #[test]
    fn test_huge_allocation_is_unpooled() {
        let arena = arena(2);
        let mut buf = PooledBuf::new();
        arena.allocate(&mut buf, 4 * PAGE + 1).unwrap();
        assert_eq!(buf.handle(), None);
        assert_eq!(buf.len(), 4 * PAGE + 1);
        assert_eq!(arena.num_chunks(), 1);
        assert_eq!(arena.list_len(UsageClass::Init), 0);

        arena.free(&mut buf).unwrap();
        assert_eq!(arena.num_chunks(), 0);
    }

    #[test]
    fn test_slab_pool_fast_path() {
        let arena = arena(4);
        let mut a = PooledBuf::new();
        let mut b = PooledBuf::new();
        arena.allocate(&mut a, 100).unwrap();
        arena.allocate(&mut b, 100).unwrap();

        // both slots come from the same page
        assert_eq!(a.handle().unwrap().node_index(), b.handle().unwrap().node_index());
        assert_eq!(b.offset() - a.offset(), 112);
        assert_eq!(arena.chunk_free_bytes(ChunkId(0)), Some(15 * PAGE));

        arena.free(&mut a).unwrap();
        arena.free(&mut b).unwrap();
        assert_eq!(arena.chunk_free_bytes(ChunkId(0)), Some(16 * PAGE));
    }

    #[test]
    fn test_display_lists_chunks() {
        let arena = arena(2);
        let mut buf = PooledBuf::new();
        arena.allocate(&mut buf, PAGE).unwrap();
        let text = arena.to_string();
        assert!(text.contains("qInit:\n  none"));
        assert!(text.contains("q000:\n  Chunk(0: 25%, 4096/16384)"));
        arena.free(&mut buf).unwrap();
    }
}
