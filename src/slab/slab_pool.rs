//! Per-size-class slab pools.
//!
//! A `SlabPool` lists every page of one size class that still has a free
//! slot, across all chunks of an arena. Pages are named by [`SlabKey`]; the
//! pool never owns a [`PageSlab`](super::PageSlab), it only records where to
//! find one. List entries live in a vector and are recycled through a free
//! list, so linking and unlinking are O(1) and never touch the chunks.

use alloc::vec::Vec;

use kspin::SpinNoIrq;

use crate::chunk::ChunkId;
use crate::size_class::{SMALL_MIN_SIZE, TINY_QUANTUM};

/// Location of one slab page: the owning chunk and the leaf index inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlabKey {
    pub chunk: ChunkId,
    pub leaf: usize,
}

impl SlabKey {
    pub const fn new(chunk: ChunkId, leaf: usize) -> Self {
        Self { chunk, leaf }
    }
}

#[derive(Debug, Clone, Copy)]
struct PoolEntry {
    key: Option<SlabKey>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Doubly linked list of slab pages with free slots for one size class.
#[derive(Debug)]
pub struct SlabPool {
    elem_size: usize,
    entries: Vec<PoolEntry>,
    free_head: Option<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl SlabPool {
    pub const fn new(elem_size: usize) -> Self {
        Self {
            elem_size,
            entries: Vec::new(),
            free_head: None,
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Slot size served by every page in this pool.
    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Most recently linked page.
    pub fn first(&self) -> Option<SlabKey> {
        self.head.and_then(|idx| self.entries[idx].key)
    }

    /// Link `key` at the front and return its entry index.
    pub fn push_front(&mut self, key: SlabKey) -> usize {
        let entry = PoolEntry {
            key: Some(key),
            prev: None,
            next: self.head,
        };
        let idx = match self.free_head {
            Some(idx) => {
                self.free_head = self.entries[idx].next;
                self.entries[idx] = entry;
                idx
            }
            None => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
        };

        if let Some(head) = self.head {
            self.entries[head].prev = Some(idx);
        } else {
            self.tail = Some(idx);
        }
        self.head = Some(idx);
        self.len += 1;
        idx
    }

    /// Unlink the entry returned by [`push_front`](Self::push_front).
    pub fn remove(&mut self, idx: usize) {
        let PoolEntry { key, prev, next } = self.entries[idx];
        debug_assert!(key.is_some(), "pool entry {} is not linked", idx);

        if let Some(prev) = prev {
            self.entries[prev].next = next;
        } else {
            self.head = next;
        }
        if let Some(next) = next {
            self.entries[next].prev = prev;
        } else {
            self.tail = prev;
        }

        self.entries[idx] = PoolEntry {
            key: None,
            prev: None,
            next: self.free_head,
        };
        self.free_head = Some(idx);
        self.len = self.len.saturating_sub(1);
    }

    /// Iterate linked pages, most recently linked first.
    pub fn iter(&self) -> SlabPoolIter<'_> {
        SlabPoolIter {
            pool: self,
            current: self.head,
        }
    }
}

/// Iterator over the pages of a [`SlabPool`].
pub struct SlabPoolIter<'a> {
    pool: &'a SlabPool,
    current: Option<usize>,
}

impl Iterator for SlabPoolIter<'_> {
    type Item = SlabKey;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.current?;
        let entry = &self.pool.entries[idx];
        self.current = entry.next;
        entry.key
    }
}

/// Lookup of the shared slab pool for a size class.
///
/// Slab allocation and free lock the returned pool for the duration of the
/// page hand-off. Callers must already hold the arena lock.
pub trait SlabRegistry {
    /// Pool serving slots of exactly `elem_size` bytes, if that size class exists.
    fn pool(&self, elem_size: usize) -> Option<&SpinNoIrq<SlabPool>>;
}

/// All tiny and small slab pools of one arena, each behind its own lock.
pub struct SlabPools {
    tiny: Vec<SpinNoIrq<SlabPool>>,
    small: Vec<SpinNoIrq<SlabPool>>,
    page_size: usize,
}

impl SlabPools {
    /// Tiny pools for every multiple of 16 below 512, small pools for
    /// `512, 1024, ...` below `page_size`.
    pub fn new(page_size: usize) -> Self {
        let tiny = (1..SMALL_MIN_SIZE / TINY_QUANTUM)
            .map(|i| i * TINY_QUANTUM)
            .filter(|&size| size < page_size)
            .map(|size| SpinNoIrq::new(SlabPool::new(size)))
            .collect();
        let small = core::iter::successors(Some(SMALL_MIN_SIZE), |size| size.checked_mul(2))
            .take_while(|&size| size < page_size)
            .map(|size| SpinNoIrq::new(SlabPool::new(size)))
            .collect();
        Self {
            tiny,
            small,
            page_size,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn tiny_pools(&self) -> &[SpinNoIrq<SlabPool>] {
        &self.tiny
    }

    pub fn small_pools(&self) -> &[SpinNoIrq<SlabPool>] {
        &self.small
    }
}

impl SlabRegistry for SlabPools {
    fn pool(&self, elem_size: usize) -> Option<&SpinNoIrq<SlabPool>> {
        if elem_size == 0 || elem_size >= self.page_size {
            return None;
        }
        if elem_size < SMALL_MIN_SIZE {
            if elem_size % TINY_QUANTUM != 0 {
                return None;
            }
            return self.tiny.get(elem_size / TINY_QUANTUM - 1);
        }
        if !elem_size.is_power_of_two() {
            return None;
        }
        let idx = crate::log2(elem_size) - crate::log2(SMALL_MIN_SIZE);
        self.small.get(idx as usize)
    }
}
