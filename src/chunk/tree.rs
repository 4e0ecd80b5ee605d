//! Buddy tree over one chunk.
//!
//! The tree is a complete binary tree of height `max_order` stored as two
//! flat arrays indexed from 1: the root is node 1, the children of node `i`
//! are `2i` and `2i + 1`, its parent is `i >> 1`.
//!
//! `state[i]` is the smallest depth at which a wholly free node exists inside
//! the subtree of `i`. It equals `depth[i]` when the whole subtree is free and
//! `unusable` (`max_order + 1`) when nothing in it is free. Allocation and
//! free only rewrite `state` along one root-to-node path.

use alloc::vec::Vec;

/// Flat-array buddy tree tracking free runs of one chunk.
#[derive(Debug, Clone)]
pub struct BuddyTree {
    state: Vec<u8>,
    depth: Vec<u8>,
    max_order: u8,
    unusable: u8,
    log2_chunk_size: u32,
}

impl BuddyTree {
    /// Build a fully free tree for a chunk of `page_size << max_order` bytes.
    pub fn new(page_size: usize, max_order: usize) -> Self {
        assert!(page_size.is_power_of_two(), "page size must be a power of two");
        assert!(max_order < 30, "max order should be < 30, but is {}", max_order);

        let nodes = 1usize << max_order << 1;
        let mut depth = Vec::with_capacity(nodes);
        // index 0 is never used
        depth.push(0);
        for d in 0..=max_order as u8 {
            depth.extend(core::iter::repeat(d).take(1 << d));
        }
        debug_assert_eq!(depth.len(), nodes);

        Self {
            state: depth.clone(),
            depth,
            max_order: max_order as u8,
            unusable: max_order as u8 + 1,
            log2_chunk_size: crate::log2(page_size) + max_order as u32,
        }
    }

    pub fn max_order(&self) -> u8 {
        self.max_order
    }

    /// Sentinel state of a node whose whole subtree is allocated.
    pub fn unusable(&self) -> u8 {
        self.unusable
    }

    /// Number of leaves (pages) in the tree.
    pub fn leaf_count(&self) -> usize {
        1 << self.max_order
    }

    #[inline]
    pub fn value(&self, id: usize) -> u8 {
        self.state[id]
    }

    #[inline]
    fn set_value(&mut self, id: usize, val: u8) {
        self.state[id] = val;
    }

    #[inline]
    pub fn depth(&self, id: usize) -> u8 {
        self.depth[id]
    }

    /// Whether node `id` was handed out by [`allocate_node`](Self::allocate_node).
    pub fn is_allocated(&self, id: usize) -> bool {
        self.state[id] == self.unusable
    }

    /// Whether the whole subtree of node `id` is free.
    pub fn is_free(&self, id: usize) -> bool {
        self.state[id] == self.depth[id]
    }

    /// Byte length of the run covered by node `id`.
    #[inline]
    pub fn run_length(&self, id: usize) -> usize {
        1 << (self.log2_chunk_size - self.depth(id) as u32)
    }

    /// Byte offset of node `id` from the start of the chunk.
    ///
    /// Clearing the node's leading bit gives its position within its depth.
    #[inline]
    pub fn run_offset(&self, id: usize) -> usize {
        let shift = id ^ (1 << self.depth(id));
        shift * self.run_length(id)
    }

    /// Dense 0-based index of leaf `id` into a per-page array.
    #[inline]
    pub fn leaf_index(&self, id: usize) -> usize {
        debug_assert_eq!(self.depth(id), self.max_order);
        id ^ (1 << self.max_order)
    }

    /// Tree depth whose nodes cover exactly `run_pages` pages.
    pub fn depth_for_pages(&self, run_pages: usize) -> u8 {
        debug_assert!(run_pages.is_power_of_two() && run_pages <= self.leaf_count());
        self.max_order - crate::log2(run_pages) as u8
    }

    /// Find the leftmost free node at depth `d`, mark it allocated and return
    /// its index, or `None` if no free node exists at that depth.
    pub fn allocate_node(&mut self, d: u8) -> Option<usize> {
        let mut id = 1usize;
        // all bits at and above `d` set: `id & initial == 1 << d` exactly at depth `d`
        let initial = !((1usize << d) - 1);
        let mut val = self.value(id);
        if val > d {
            return None;
        }
        while val < d || id & initial == 0 {
            id <<= 1;
            val = self.value(id);
            if val > d {
                id ^= 1;
                val = self.value(id);
            }
        }
        debug_assert!(
            val == d && id & initial == 1 << d,
            "val = {}, id & initial = {}, d = {}",
            val,
            id & initial,
            d
        );
        self.set_value(id, self.unusable);
        self.update_parents_alloc(id);
        Some(id)
    }

    /// Return node `id` to the free tree.
    pub fn free_node(&mut self, id: usize) {
        debug_assert!(self.is_allocated(id), "node {} is not allocated", id);
        self.set_value(id, self.depth(id));
        self.update_parents_free(id);
    }

    fn update_parents_alloc(&mut self, mut id: usize) {
        while id > 1 {
            let parent = id >> 1;
            let val = self.value(id).min(self.value(id ^ 1));
            self.set_value(parent, val);
            id = parent;
        }
    }

    fn update_parents_free(&mut self, mut id: usize) {
        let mut log_child = self.depth(id) + 1;
        while id > 1 {
            let parent = id >> 1;
            let val1 = self.value(id);
            let val2 = self.value(id ^ 1);
            // equals depth(id) on the first step, then one level up per step
            log_child -= 1;
            if val1 == log_child && val2 == log_child {
                self.set_value(parent, log_child - 1);
            } else {
                self.set_value(parent, val1.min(val2));
            }
            id = parent;
        }
    }
}
