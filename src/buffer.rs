//! Pooled buffer descriptor.
//!
//! A `PooledBuf` is the caller-side record of one allocation: the chunk it
//! came from, the handle to give back on free, and the byte window it may
//! use. It does not own memory; returning it to its arena is the caller's
//! responsibility.

use crate::chunk::{ChunkId, Handle};

/// Byte window handed out by an arena.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PooledBuf {
    chunk: Option<ChunkId>,
    handle: Option<Handle>,
    memory: usize,
    offset: usize,
    length: usize,
    max_length: usize,
}

impl PooledBuf {
    /// An empty buffer not attached to any chunk.
    pub const fn new() -> Self {
        Self {
            chunk: None,
            handle: None,
            memory: 0,
            offset: 0,
            length: 0,
            max_length: 0,
        }
    }

    /// Attach the buffer to a pooled allocation.
    pub fn init(
        &mut self,
        chunk: ChunkId,
        handle: Handle,
        memory: usize,
        offset: usize,
        length: usize,
        max_length: usize,
    ) {
        debug_assert!(length <= max_length);
        self.chunk = Some(chunk);
        self.handle = Some(handle);
        self.memory = memory;
        self.offset = offset;
        self.length = length;
        self.max_length = max_length;
    }

    /// Attach the buffer to a whole unpooled chunk.
    pub fn init_unpooled(&mut self, chunk: ChunkId, memory: usize, length: usize) {
        self.chunk = Some(chunk);
        self.handle = None;
        self.memory = memory;
        self.offset = 0;
        self.length = length;
        self.max_length = length;
    }

    /// Detach the buffer, returning the chunk and handle it referenced.
    pub(crate) fn take(&mut self) -> Option<(ChunkId, Option<Handle>)> {
        let chunk = self.chunk.take()?;
        let handle = self.handle.take();
        *self = Self::new();
        Some((chunk, handle))
    }

    pub fn chunk(&self) -> Option<ChunkId> {
        self.chunk
    }

    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }

    pub fn is_allocated(&self) -> bool {
        self.chunk.is_some()
    }

    /// Byte offset of the window from the start of the chunk memory.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Requested length.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Length the window may grow to without reallocating.
    pub fn max_len(&self) -> usize {
        self.max_length
    }

    /// Address of the first byte of the window.
    pub fn addr(&self) -> usize {
        self.memory + self.offset
    }
}
