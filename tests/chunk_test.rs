//! Integration tests for single-chunk allocation
//!
//! Exercises the buddy tree, chunk and slab pages together without an arena.

#![no_std]

extern crate alloc;
extern crate chunk_buddy_allocator;

use alloc::vec::Vec;
use chunk_buddy_allocator::{
    AllocError, BuddyTree, ChunkId, ChunkMetric, Handle, PoolChunk, PooledBuf, SlabPools,
    SlabRegistry,
};

const PAGE_SIZE: usize = 0x1000;

/// Deterministic xorshift64 generator
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound as u64) as usize
    }
}

fn window(chunk: &PoolChunk, handle: Handle) -> (usize, usize) {
    let mut buf = PooledBuf::new();
    chunk.init_buffer(&mut buf, handle, 1).unwrap();
    (buf.offset(), buf.max_len())
}

fn disjoint(a: (usize, usize), b: (usize, usize)) -> bool {
    a.0 + a.1 <= b.0 || b.0 + b.1 <= a.0
}

#[test]
fn test_fresh_chunk_is_empty() {
    let chunk = PoolChunk::new(ChunkId(0), 0, 0, PAGE_SIZE, 11);
    assert_eq!(chunk.chunk_size(), PAGE_SIZE << 11);
    assert_eq!(chunk.free_bytes(), chunk.chunk_size());
    assert_eq!(chunk.usage(), 0);
}

#[test]
fn test_exhaustion_then_no_memory() {
    let pools = SlabPools::new(PAGE_SIZE);
    let mut chunk = PoolChunk::new(ChunkId(0), 0, 0, PAGE_SIZE, 3);

    let mut handles = Vec::new();
    while let Ok(handle) = chunk.allocate(PAGE_SIZE, &pools) {
        handles.push(handle);
    }
    assert_eq!(handles.len(), 8);
    assert_eq!(chunk.usage(), 100);
    assert_eq!(chunk.free_bytes(), 0);
    assert_eq!(chunk.allocate(PAGE_SIZE, &pools), Err(AllocError::NoMemory));
    assert_eq!(chunk.allocate(64, &pools), Err(AllocError::NoMemory));

    for handle in handles {
        chunk.free(handle, &pools);
    }
    assert_eq!(chunk.usage(), 0);
    assert!(chunk.tree().unwrap().is_free(1));
}

#[test]
fn test_buddies_coalesce() {
    let pools = SlabPools::new(PAGE_SIZE);
    let mut chunk = PoolChunk::new(ChunkId(0), 0, 0, PAGE_SIZE, 2);

    let a = chunk.allocate(PAGE_SIZE, &pools).unwrap();
    let b = chunk.allocate(PAGE_SIZE, &pools).unwrap();
    assert_eq!(window(&chunk, a).0, 0);
    assert_eq!(window(&chunk, b).0, PAGE_SIZE);

    // the right half stays untouched while its buddy is split
    let c = chunk.allocate(2 * PAGE_SIZE, &pools).unwrap();
    assert_eq!(window(&chunk, c), (2 * PAGE_SIZE, 2 * PAGE_SIZE));
    assert_eq!(
        chunk.allocate(2 * PAGE_SIZE, &pools),
        Err(AllocError::NoMemory)
    );

    chunk.free(a, &pools);
    assert_eq!(
        chunk.allocate(2 * PAGE_SIZE, &pools),
        Err(AllocError::NoMemory)
    );
    chunk.free(b, &pools);
    let d = chunk.allocate(2 * PAGE_SIZE, &pools).unwrap();
    assert_eq!(window(&chunk, d), (0, 2 * PAGE_SIZE));
}

#[test]
fn test_handles_round_trip_through_raw() {
    let pools = SlabPools::new(PAGE_SIZE);
    let mut chunk = PoolChunk::new(ChunkId(0), 0, 0, PAGE_SIZE, 4);

    let run = chunk.allocate(4 * PAGE_SIZE, &pools).unwrap();
    let slot = chunk.allocate(48, &pools).unwrap();
    assert!(!run.is_slot());
    assert!(slot.is_slot());

    let run2 = Handle::from_raw(run.as_raw());
    let slot2 = Handle::from_raw(slot.as_raw());
    assert_eq!(window(&chunk, run2), window(&chunk, run));
    assert_eq!(window(&chunk, slot2), window(&chunk, slot));

    chunk.free(slot2, &pools);
    chunk.free(run2, &pools);
    assert_eq!(chunk.free_bytes(), chunk.chunk_size());
}

#[test]
fn test_slab_page_fills_and_returns_its_leaf() {
    let pools = SlabPools::new(PAGE_SIZE);
    let mut chunk = PoolChunk::new(ChunkId(0), 0, 0, PAGE_SIZE, 2);
    let pool = pools.pool(64).unwrap();

    let first = chunk.allocate(64, &pools).unwrap();
    let leaf = chunk.tree().unwrap().leaf_index(first.node_index());
    assert_eq!(chunk.free_bytes(), 3 * PAGE_SIZE);
    assert_eq!(pool.lock().first().map(|key| key.leaf), Some(leaf));

    let mut handles = alloc::vec![first];
    for _ in 1..PAGE_SIZE / 64 {
        handles.push(chunk.allocate_in_slab(leaf, &mut pool.lock()).unwrap());
    }

    // every slot of the page is handed out exactly once
    let mut windows: Vec<_> = handles.iter().map(|&h| window(&chunk, h)).collect();
    windows.sort_unstable();
    for (i, &(offset, len)) in windows.iter().enumerate() {
        assert_eq!(len, 64);
        assert_eq!(offset, i * 64);
    }

    // a full page leaves the pool
    assert!(pool.lock().is_empty());
    assert_eq!(
        chunk.allocate_in_slab(leaf, &mut pool.lock()),
        Err(AllocError::NoMemory)
    );
    assert_eq!(
        chunk.allocate(4 * PAGE_SIZE, &pools),
        Err(AllocError::NoMemory)
    );

    let last = handles.pop().unwrap();
    chunk.free(last, &pools);
    assert_eq!(pool.lock().len(), 1);

    for handle in handles {
        chunk.free(handle, &pools);
    }
    assert!(pool.lock().is_empty());
    assert_eq!(chunk.free_bytes(), 4 * PAGE_SIZE);
    assert!(chunk.allocate(4 * PAGE_SIZE, &pools).is_ok());
}

#[test]
fn test_small_slots_use_power_of_two_sizes() {
    let pools = SlabPools::new(PAGE_SIZE);
    let mut chunk = PoolChunk::new(ChunkId(0), 0, 0, PAGE_SIZE, 2);

    let handle = chunk.allocate(1024, &pools).unwrap();
    let leaf = chunk.tree().unwrap().leaf_index(handle.node_index());
    let slab = chunk.slab(leaf).unwrap();
    assert_eq!(slab.elem_size(), 1024);
    assert_eq!(slab.max_elems(), 4);
    assert_eq!(slab.num_avail(), 3);

    assert_eq!(chunk.allocate(1000, &pools), Err(AllocError::InvalidParam));
}

#[test]
fn test_tree_random_runs_never_overlap() {
    let mut rng = XorShift(0x9E37_79B9_7F4A_7C15);
    let mut tree = BuddyTree::new(1, 6);
    let mut live: Vec<usize> = Vec::new();

    for _ in 0..4000 {
        if live.is_empty() || rng.below(3) != 0 {
            let d = 6 - rng.below(4) as u8;
            let Some(id) = tree.allocate_node(d) else {
                continue;
            };
            let new = (tree.run_offset(id), tree.run_length(id));
            for &other in &live {
                let old = (tree.run_offset(other), tree.run_length(other));
                assert!(disjoint(new, old), "{:?} overlaps {:?}", new, old);
            }
            live.push(id);
        } else {
            let id = live.swap_remove(rng.below(live.len()));
            tree.free_node(id);
        }

        for id in 1..(1 << 7) {
            assert!(tree.depth(id) <= tree.value(id));
            assert!(tree.value(id) <= tree.unusable());
        }
    }

    for id in live.drain(..) {
        tree.free_node(id);
    }
    assert!(tree.is_free(1));
    assert_eq!(tree.allocate_node(0), Some(1));
}

#[test]
fn test_chunk_random_mixed_sizes_never_overlap() {
    let mut rng = XorShift(0xDEAD_BEEF_CAFE_F00D);
    let pools = SlabPools::new(PAGE_SIZE);
    let mut chunk = PoolChunk::new(ChunkId(0), 0, 0, PAGE_SIZE, 5);
    let sizes = [16, 48, 256, 512, 2048, PAGE_SIZE, 2 * PAGE_SIZE, 8 * PAGE_SIZE];
    let mut live: Vec<(Handle, (usize, usize))> = Vec::new();
    let mut used = 0;

    for _ in 0..3000 {
        if live.is_empty() || rng.below(2) == 0 {
            let size = sizes[rng.below(sizes.len())];
            let handle = match chunk.allocate(size, &pools) {
                Ok(handle) => handle,
                Err(AllocError::NoMemory) => continue,
                Err(e) => panic!("unexpected error {:?}", e),
            };
            let win = window(&chunk, handle);
            assert_eq!(win.1, size);
            assert!(win.0 + win.1 <= chunk.chunk_size());
            for &(_, other) in &live {
                assert!(disjoint(win, other), "{:?} overlaps {:?}", win, other);
            }
            live.push((handle, win));
        } else {
            let (handle, _) = live.swap_remove(rng.below(live.len()));
            chunk.free(handle, &pools);
        }
        used = used.max(chunk.chunk_size() - chunk.free_bytes());
    }
    assert!(used > 0);

    for (handle, _) in live.drain(..) {
        chunk.free(handle, &pools);
    }
    assert_eq!(chunk.free_bytes(), chunk.chunk_size());
    assert_eq!(chunk.usage(), 0);
    for pool in pools.tiny_pools().iter().chain(pools.small_pools()) {
        assert!(pool.lock().is_empty());
    }
}
