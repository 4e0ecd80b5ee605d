//! Slab delegation for sub-page requests.
//!
//! A chunk hands one tree leaf to a [`PageSlab`], which splits it into
//! equal-size slots. Pages with free slots are linked into the shared
//! [`SlabPool`] of their size class so that later requests of that size can
//! be served without touching the tree.

pub mod page_slab;
pub mod slab_pool;

pub use page_slab::PageSlab;
pub use slab_pool::{SlabKey, SlabPool, SlabPoolIter, SlabPools, SlabRegistry};
