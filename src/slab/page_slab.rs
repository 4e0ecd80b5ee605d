//! Slab of one page.
//!
//! A `PageSlab` splits a single tree leaf into equal-size slots tracked by a
//! bitmap. It is owned by its chunk and linked into the [`SlabPool`] of its
//! size class while it has at least one free slot.

use alloc::vec::Vec;

use super::slab_pool::{SlabKey, SlabPool};

/// Slot bitmap of one page.
#[derive(Debug)]
pub struct PageSlab {
    key: SlabKey,
    node_index: usize,
    run_offset: usize,
    page_size: usize,
    elem_size: usize,
    max_elems: usize,
    num_avail: usize,
    next_avail: Option<usize>,
    bitmap: Vec<u64>,
    /// Entry for this page in its size-class pool while linked.
    pool_entry: Option<usize>,
    in_use: bool,
}

impl PageSlab {
    /// Create an uninitialized slab for the leaf at `node_index`.
    ///
    /// The slab is not linked anywhere until [`init`](Self::init) is called.
    pub fn new(key: SlabKey, node_index: usize, run_offset: usize, page_size: usize) -> Self {
        Self {
            key,
            node_index,
            run_offset,
            page_size,
            elem_size: 0,
            max_elems: 0,
            num_avail: 0,
            next_avail: None,
            bitmap: Vec::new(),
            pool_entry: None,
            in_use: false,
        }
    }

    /// (Re)initialize the page for `elem_size` slots and link it into `pool`.
    pub fn init(&mut self, elem_size: usize, pool: &mut SlabPool) {
        debug_assert!(elem_size > 0 && elem_size <= self.page_size);
        debug_assert!(self.pool_entry.is_none(), "slab is still linked");
        self.in_use = true;
        self.elem_size = elem_size;
        self.max_elems = self.page_size / elem_size;
        self.num_avail = self.max_elems;
        self.next_avail = Some(0);

        let words = self.max_elems.div_ceil(64);
        self.bitmap.clear();
        self.bitmap.resize(words, 0);

        self.link(pool);
    }

    pub fn key(&self) -> SlabKey {
        self.key
    }

    /// Tree node index of the leaf backing this page.
    pub fn node_index(&self) -> usize {
        self.node_index
    }

    /// Byte offset of the page from the start of its chunk.
    pub fn run_offset(&self) -> usize {
        self.run_offset
    }

    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    pub fn max_elems(&self) -> usize {
        self.max_elems
    }

    pub fn num_avail(&self) -> usize {
        self.num_avail
    }

    /// Whether the page currently serves slots.
    pub fn in_use(&self) -> bool {
        self.in_use
    }

    /// Whether the page is linked into its size-class pool.
    pub fn is_linked(&self) -> bool {
        self.pool_entry.is_some()
    }

    /// Byte offset of `slot` from the start of the chunk.
    pub fn slot_offset(&self, slot: usize) -> usize {
        self.run_offset + slot * self.elem_size
    }

    /// Take one free slot. Unlinks the page from `pool` when it becomes full.
    pub fn allocate(&mut self, pool: &mut SlabPool) -> Option<usize> {
        if self.num_avail == 0 || !self.in_use {
            return None;
        }

        let slot = self.take_next_avail()?;
        self.bitmap[slot / 64] |= 1u64 << (slot % 64);
        self.num_avail -= 1;

        if self.num_avail == 0 {
            self.unlink(pool);
        }
        Some(slot)
    }

    /// Release `slot`.
    ///
    /// Returns `true` while the page still holds live slots. Returns `false`
    /// once the last slot is released; the page is then unlinked and the
    /// caller owns returning the leaf to the tree.
    pub fn free(&mut self, slot: usize, pool: &mut SlabPool) -> bool {
        let word = slot / 64;
        let mask = 1u64 << (slot % 64);
        debug_assert!(slot < self.max_elems, "slot {} out of range", slot);
        debug_assert!(self.bitmap[word] & mask != 0, "slot {} is already free", slot);

        self.bitmap[word] &= !mask;
        self.next_avail = Some(slot);

        let was_full = self.num_avail == 0;
        self.num_avail += 1;

        if self.num_avail == self.max_elems {
            self.unlink(pool);
            self.in_use = false;
            return false;
        }
        if was_full {
            self.link(pool);
        }
        true
    }

    fn take_next_avail(&mut self) -> Option<usize> {
        if let Some(slot) = self.next_avail.take() {
            return Some(slot);
        }
        self.find_next_avail()
    }

    fn find_next_avail(&self) -> Option<usize> {
        for (word_idx, &word) in self.bitmap.iter().enumerate() {
            if word != u64::MAX {
                let slot = word_idx * 64 + (!word).trailing_zeros() as usize;
                if slot < self.max_elems {
                    return Some(slot);
                }
                break;
            }
        }
        None
    }

    fn link(&mut self, pool: &mut SlabPool) {
        debug_assert_eq!(pool.elem_size(), self.elem_size);
        if self.pool_entry.is_none() {
            self.pool_entry = Some(pool.push_front(self.key));
        }
    }

    fn unlink(&mut self, pool: &mut SlabPool) {
        if let Some(entry) = self.pool_entry.take() {
            pool.remove(entry);
        }
    }
}
