//! Append-only byte buffer for an in-flight download.
//!
//! One writer (the fetch task) appends chunks as they arrive; any number of
//! readers copy out ranges. The length and the buffer live under the same
//! lock, so a reader never observes a length the buffer does not back.

use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;

/// Bytes downloaded so far for one fetch.
#[derive(Debug, Default)]
pub struct ByteAccumulator {
    buffer: RwLock<BytesMut>,
}

impl ByteAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve room for the announced content length.
    pub fn reserve(&self, additional: usize) {
        self.buffer.write().reserve(additional);
    }

    /// Append a chunk. Previously appended bytes are never touched.
    pub fn append(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.buffer.write().extend_from_slice(chunk);
    }

    /// Number of bytes received so far. Never decreases.
    pub fn total_length(&self) -> u64 {
        self.buffer.read().len() as u64
    }

    /// Copy the largest available prefix of `[offset, offset + length)`.
    ///
    /// Returns `None` when `offset` is at or beyond the received length,
    /// otherwise exactly `min(length, total - offset)` bytes starting at
    /// `offset`.
    pub fn read_range(&self, offset: u64, length: u64) -> Option<Bytes> {
        let buffer = self.buffer.read();
        let total = buffer.len() as u64;
        if offset >= total {
            return None;
        }

        let end = offset + length.min(total - offset);
        Some(Bytes::copy_from_slice(&buffer[offset as usize..end as usize]))
    }

    /// Copy of everything received so far.
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buffer.read())
    }
}
