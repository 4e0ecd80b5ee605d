//! Usage-bucketed chunk lists.
//!
//! Chunks of an arena are kept in six doubly linked lists by how full they
//! are. Links are stored here, indexed by [`ChunkId`]; a chunk only records
//! which list currently holds it. After an allocation a chunk that reached its
//! list's maximum usage moves to the next list; after a free a chunk that
//! dropped below the minimum moves to the previous one. A chunk falling out
//! of [`UsageClass::Q000`] has no previous list and is handed back to the
//! arena for destruction.

use alloc::vec::Vec;
use core::fmt;

#[cfg(feature = "log")]
use log::trace;

use crate::buffer::PooledBuf;
use crate::chunk::{ChunkId, ChunkMetric, Handle, PoolChunk};
use crate::slab::SlabRegistry;
use crate::{AllocError, AllocResult};

/// Usage bucket of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageClass {
    /// Newly created chunks, below 25% used. Never released.
    Init,
    Q000,
    Q025,
    Q050,
    Q075,
    /// Fully used chunks.
    Q100,
}

impl UsageClass {
    pub const COUNT: usize = 6;

    pub const ALL: [UsageClass; Self::COUNT] = [
        UsageClass::Init,
        UsageClass::Q000,
        UsageClass::Q025,
        UsageClass::Q050,
        UsageClass::Q075,
        UsageClass::Q100,
    ];

    /// Order in which an arena looks for room in existing chunks.
    pub const ALLOCATION_ORDER: [UsageClass; 5] = [
        UsageClass::Q050,
        UsageClass::Q025,
        UsageClass::Q000,
        UsageClass::Init,
        UsageClass::Q075,
    ];

    pub const fn to_index(self) -> usize {
        match self {
            UsageClass::Init => 0,
            UsageClass::Q000 => 1,
            UsageClass::Q025 => 2,
            UsageClass::Q050 => 3,
            UsageClass::Q075 => 4,
            UsageClass::Q100 => 5,
        }
    }

    /// A chunk below this usage leaves the list after a free.
    pub const fn min_usage(self) -> usize {
        match self {
            UsageClass::Init => 0,
            UsageClass::Q000 => 1,
            UsageClass::Q025 => 25,
            UsageClass::Q050 => 50,
            UsageClass::Q075 => 75,
            UsageClass::Q100 => 100,
        }
    }

    /// A chunk at or above this usage leaves the list after an allocation.
    pub const fn max_usage(self) -> usize {
        match self {
            UsageClass::Init => 25,
            UsageClass::Q000 => 50,
            UsageClass::Q025 => 75,
            UsageClass::Q050 => 100,
            UsageClass::Q075 => 100,
            UsageClass::Q100 => usize::MAX,
        }
    }

    pub const fn next(self) -> Option<UsageClass> {
        match self {
            UsageClass::Init => Some(UsageClass::Q000),
            UsageClass::Q000 => Some(UsageClass::Q025),
            UsageClass::Q025 => Some(UsageClass::Q050),
            UsageClass::Q050 => Some(UsageClass::Q075),
            UsageClass::Q075 => Some(UsageClass::Q100),
            UsageClass::Q100 => None,
        }
    }

    /// `Init` is its own previous list; `Q000` has none.
    pub const fn prev(self) -> Option<UsageClass> {
        match self {
            UsageClass::Init => Some(UsageClass::Init),
            UsageClass::Q000 => None,
            UsageClass::Q025 => Some(UsageClass::Q000),
            UsageClass::Q050 => Some(UsageClass::Q025),
            UsageClass::Q075 => Some(UsageClass::Q050),
            UsageClass::Q100 => Some(UsageClass::Q075),
        }
    }
}

impl fmt::Display for UsageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UsageClass::Init => "qInit",
            UsageClass::Q000 => "q000",
            UsageClass::Q025 => "q025",
            UsageClass::Q050 => "q050",
            UsageClass::Q075 => "q075",
            UsageClass::Q100 => "q100",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    prev: Option<ChunkId>,
    next: Option<ChunkId>,
}

/// The six usage lists of one arena.
#[derive(Debug, Default)]
pub struct ChunkLists {
    heads: [Option<ChunkId>; UsageClass::COUNT],
    lens: [usize; UsageClass::COUNT],
    links: Vec<Link>,
}

fn chunk_mut(chunks: &mut [Option<PoolChunk>], id: ChunkId) -> &mut PoolChunk {
    match chunks.get_mut(id.0).and_then(Option::as_mut) {
        Some(chunk) => chunk,
        None => panic!("chunk list references missing chunk {}", id),
    }
}

impl ChunkLists {
    pub const fn new() -> Self {
        Self {
            heads: [None; UsageClass::COUNT],
            lens: [0; UsageClass::COUNT],
            links: Vec::new(),
        }
    }

    pub fn len(&self, list: UsageClass) -> usize {
        self.lens[list.to_index()]
    }

    /// Total number of listed chunks.
    #[cfg(test)]
    fn total(&self) -> usize {
        self.lens.iter().sum()
    }

    /// Chunks of `list`, most recently added first.
    pub fn iter(&self, list: UsageClass) -> ChunkListIter<'_> {
        ChunkListIter {
            lists: self,
            current: self.heads[list.to_index()],
        }
    }

    /// Insert chunk `id` into `list`, or into the first following list whose
    /// maximum usage it does not reach.
    pub fn add(&mut self, chunks: &mut [Option<PoolChunk>], id: ChunkId, list: UsageClass) {
        let mut list = list;
        let usage = chunk_mut(chunks, id).usage();
        while usage >= list.max_usage() {
            match list.next() {
                Some(next) => list = next,
                None => break,
            }
        }
        self.push_front(chunks, id, list);
    }

    /// Unlink chunk `id` from whichever list holds it.
    pub fn remove(&mut self, chunks: &mut [Option<PoolChunk>], id: ChunkId) {
        let chunk = chunk_mut(chunks, id);
        let Some(list) = chunk.list() else {
            return;
        };
        chunk.set_list(None);

        let Link { prev, next } = self.links[id.0];
        match prev {
            Some(prev) => self.links[prev.0].next = next,
            None => self.heads[list.to_index()] = next,
        }
        if let Some(next) = next {
            self.links[next.0].prev = prev;
        }
        self.links[id.0] = Link::default();
        self.lens[list.to_index()] -= 1;
    }

    /// Try to serve `norm_capacity` from the chunks of `list`.
    ///
    /// Returns `Ok(false)` when no chunk in the list has room.
    pub fn allocate<R: SlabRegistry + ?Sized>(
        &mut self,
        chunks: &mut [Option<PoolChunk>],
        list: UsageClass,
        buf: &mut PooledBuf,
        req_capacity: usize,
        norm_capacity: usize,
        registry: &R,
    ) -> AllocResult<bool> {
        let mut current = self.heads[list.to_index()];
        while let Some(id) = current {
            current = self.links[id.0].next;

            let chunk = chunk_mut(chunks, id);
            let handle = match chunk.allocate(norm_capacity, registry) {
                Ok(handle) => handle,
                Err(AllocError::NoMemory) => continue,
                Err(e) => return Err(e),
            };
            chunk.init_buffer(buf, handle, req_capacity)?;

            if chunk.usage() >= list.max_usage() {
                if let Some(next) = list.next() {
                    trace!("chunk {}: {} -> {}", id, list, next);
                    self.remove(chunks, id);
                    self.add(chunks, id, next);
                }
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Free `handle` in chunk `id` and rebucket the chunk.
    ///
    /// Returns `false` if the chunk fell out of the lowest list; it is then
    /// unlinked and the caller must destroy it.
    pub fn free<R: SlabRegistry + ?Sized>(
        &mut self,
        chunks: &mut [Option<PoolChunk>],
        id: ChunkId,
        handle: Handle,
        registry: &R,
    ) -> bool {
        let chunk = chunk_mut(chunks, id);
        chunk.free(handle, registry);
        let Some(list) = chunk.list() else {
            return true;
        };

        let usage = chunk.usage();
        let mut target = list;
        while usage < target.min_usage() {
            match target.prev() {
                Some(prev) => target = prev,
                None => {
                    self.remove(chunks, id);
                    return false;
                }
            }
        }
        if target != list {
            trace!("chunk {}: {} -> {}", id, list, target);
            self.remove(chunks, id);
            self.push_front(chunks, id, target);
        }
        true
    }

    fn push_front(&mut self, chunks: &mut [Option<PoolChunk>], id: ChunkId, list: UsageClass) {
        if self.links.len() <= id.0 {
            self.links.resize(id.0 + 1, Link::default());
        }
        let idx = list.to_index();
        let head = self.heads[idx];
        self.links[id.0] = Link {
            prev: None,
            next: head,
        };
        if let Some(head) = head {
            self.links[head.0].prev = Some(id);
        }
        self.heads[idx] = Some(id);
        self.lens[idx] += 1;
        chunk_mut(chunks, id).set_list(Some(list));
    }
}

/// Iterator over the chunks of one usage list.
pub struct ChunkListIter<'a> {
    lists: &'a ChunkLists,
    current: Option<ChunkId>,
}

impl Iterator for ChunkListIter<'_> {
    type Item = ChunkId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        self.current = self.lists.links[id.0].next;
        Some(id)
    }
}
