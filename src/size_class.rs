//! Size classes and capacity normalization.

/// Tiny requests are rounded up to a multiple of this.
pub const TINY_QUANTUM: usize = 16;

/// Smallest small (power-of-two, sub-page) size class.
pub const SMALL_MIN_SIZE: usize = 512;

/// Size classes an arena routes requests by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    /// Below 512 bytes: slab slots in multiples of 16.
    Tiny,
    /// From 512 bytes up to below a page: power-of-two slab slots.
    Small,
    /// From one page up to a whole chunk: power-of-two runs.
    Normal,
    /// Larger than a chunk: a dedicated unpooled chunk.
    Huge,
}

impl SizeClass {
    /// Classify a capacity already passed through [`normalize_capacity`].
    pub const fn of(norm_capacity: usize, page_size: usize, chunk_size: usize) -> Self {
        if norm_capacity > chunk_size {
            SizeClass::Huge
        } else if norm_capacity >= page_size {
            SizeClass::Normal
        } else if norm_capacity >= SMALL_MIN_SIZE {
            SizeClass::Small
        } else {
            SizeClass::Tiny
        }
    }

    /// Whether requests of this class are served from slab pages.
    pub const fn is_subpage(&self) -> bool {
        matches!(self, SizeClass::Tiny | SizeClass::Small)
    }
}

/// Round `req_capacity` up to the size class it is served from.
///
/// Requests of at least `chunk_size` are returned unchanged. Requests of
/// 512 bytes or more round up to the next power of two; smaller ones to the
/// next multiple of 16, with zero treated as 16.
pub const fn normalize_capacity(req_capacity: usize, chunk_size: usize) -> usize {
    if req_capacity >= chunk_size {
        return req_capacity;
    }
    if req_capacity >= SMALL_MIN_SIZE {
        return req_capacity.next_power_of_two();
    }
    if req_capacity == 0 {
        return TINY_QUANTUM;
    }
    (req_capacity + TINY_QUANTUM - 1) & !(TINY_QUANTUM - 1)
}
