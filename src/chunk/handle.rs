//! Allocation handle encoding.
//!
//! The low 32 bits hold the tree node index. For run allocations the high 32
//! bits are zero. For slab allocations the high word is the slot index with
//! bit 30 set, so slot 0 stays distinguishable from "no slot"; the two top bits
//! of the high word are never part of the slot index.

const SLOT_TAG: u64 = 0x4000_0000_0000_0000;
const SLOT_MASK: u32 = 0x3FFF_FFFF;

/// Opaque location of one allocation inside a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    /// Handle of a run occupying tree node `node`.
    pub const fn run(node: usize) -> Self {
        Self(node as u32 as u64)
    }

    /// Handle of slot `slot` inside the page at tree node `node`.
    pub const fn slot(node: usize, slot: usize) -> Self {
        debug_assert!(slot <= SLOT_MASK as usize);
        Self(SLOT_TAG | ((slot as u64) << 32) | node as u32 as u64)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(&self) -> u64 {
        self.0
    }

    /// Tree node index of the run or page.
    pub const fn node_index(&self) -> usize {
        self.0 as u32 as usize
    }

    /// Slot index inside the page, or `None` for a run handle.
    pub const fn slot_index(&self) -> Option<usize> {
        let field = (self.0 >> 32) as u32;
        if field == 0 {
            None
        } else {
            Some((field & SLOT_MASK) as usize)
        }
    }

    pub const fn is_slot(&self) -> bool {
        self.0 >> 32 != 0
    }
}
