//! net/accumulator.rs
//!
//! Cursor-addressed byte window that inbound transport data is appended to.
//! Invariant: `cursor <= len <= capacity`. Bytes before the cursor are
//! consumed and may be compacted away at any time.
//!
//! Each buffer also carries the largest frame its reader will accept, so a
//! peer cannot make it grow by declaring a huge length.

use std::{fmt, sync::Arc};
use thiserror::Error;

use crate::memory::{MAX_SLAB_SIZE, Slab, SlabPool};

/// Largest declared frame accepted unless configured otherwise.
pub const DEFAULT_FRAME_LIMIT: usize = 64 * 1024 * 1024;

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("buffer full: {needed} bytes needed, capacity {capacity}")]
    Full { needed: usize, capacity: usize },

    #[error("cursor advance of {by} exceeds the {left} unread bytes")]
    CursorOutOfRange { by: usize, left: usize },
}

// -----------------------------------------------------------------------------
// ----- AccumulationBuffer ----------------------------------------------------

pub struct AccumulationBuffer {
    storage: Slab,
    cursor: usize,
    len: usize,
    growable: bool,
    frame_limit: usize,
    pool: Arc<SlabPool>,
}

// -----------------------------------------------------------------------------
// ----- AccumulationBuffer: Static --------------------------------------------

impl AccumulationBuffer {
    /// Growable buffer starting with at least `capacity` bytes.
    pub fn new(pool: Arc<SlabPool>, capacity: usize) -> Self {
        Self {
            storage: allocate(&pool, capacity),
            cursor: 0,
            len: 0,
            growable: true,
            frame_limit: DEFAULT_FRAME_LIMIT,
            pool,
        }
    }

    /// Buffer that refuses to grow past its initial slab.
    pub fn bounded(pool: Arc<SlabPool>, capacity: usize) -> Self {
        let mut buf = Self::new(pool, capacity);
        buf.growable = false;
        buf
    }

    /// Cap on the size of a single frame, tag included.
    pub fn with_frame_limit(mut self, limit: usize) -> Self {
        self.frame_limit = limit;
        self
    }
}

// -----------------------------------------------------------------------------
// ----- AccumulationBuffer: Public --------------------------------------------

impl AccumulationBuffer {
    /// Append `chunk`, compacting first and then growing if allowed.
    pub fn enqueue(&mut self, chunk: &[u8]) -> Result<(), BufferError> {
        if chunk.len() > self.capacity() - self.len {
            self.compact();

            let needed = self.len + chunk.len();
            if needed > self.capacity() {
                if !self.growable {
                    return Err(BufferError::Full {
                        needed,
                        capacity: self.capacity(),
                    });
                }
                self.grow(needed);
            }
        }

        let end = self.len + chunk.len();
        self.storage.as_mut_slice()[self.len..end].copy_from_slice(chunk);
        self.len = end;
        Ok(())
    }

    #[inline]
    pub fn bytes_left(&self) -> usize {
        self.len - self.cursor
    }

    #[inline]
    pub fn is_drained(&self) -> bool {
        self.cursor == self.len
    }

    /// Unread window.
    #[inline]
    pub fn unread(&self) -> &[u8] {
        &self.storage.as_slice()[self.cursor..self.len]
    }

    /// Byte under the cursor.
    #[inline]
    pub fn current(&self) -> Option<u8> {
        self.unread().first().copied()
    }

    /// Consume and return the byte under the cursor.
    pub fn take_byte(&mut self) -> Option<u8> {
        let byte = self.current()?;
        self.cursor += 1;
        Some(byte)
    }

    pub fn advance(&mut self, by: usize) -> Result<(), BufferError> {
        let left = self.bytes_left();
        if by > left {
            return Err(BufferError::CursorOutOfRange { by, left });
        }
        self.cursor += by;
        Ok(())
    }

    /// Move unread bytes to the front of the storage.
    pub fn compact(&mut self) {
        if self.cursor == 0 {
            return;
        }
        let (cursor, len) = (self.cursor, self.len);
        self.storage.as_mut_slice().copy_within(cursor..len, 0);
        self.len = len - cursor;
        self.cursor = 0;
    }

    /// Drop everything, read or not.
    pub fn clear(&mut self) {
        self.cursor = 0;
        self.len = 0;
    }

    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    pub fn frame_limit(&self) -> usize {
        self.frame_limit
    }

    /// Re-target this buffer for the next phase: compacted, growable, and
    /// holding at least `capacity` bytes. Unread bytes carry over.
    pub fn into_phase(mut self, capacity: usize) -> Self {
        self.compact();
        self.growable = true;
        if self.capacity() < capacity {
            self.grow(capacity);
        }
        self
    }
}

// -----------------------------------------------------------------------------
// ----- AccumulationBuffer: Private -------------------------------------------

impl AccumulationBuffer {
    fn grow(&mut self, needed: usize) {
        let mut next = allocate(&self.pool, needed);
        let unread = self.len - self.cursor;
        next.as_mut_slice()[..unread].copy_from_slice(self.unread());

        let old = std::mem::replace(&mut self.storage, next);
        self.pool.release(old);
        self.cursor = 0;
        self.len = unread;
    }
}

fn allocate(pool: &SlabPool, capacity: usize) -> Slab {
    if capacity > MAX_SLAB_SIZE {
        return Slab::oversize(capacity.next_power_of_two());
    }
    // capacity is in range, so a class always exists
    pool.acquire_for(capacity)
        .unwrap_or_else(|_| Slab::oversize(capacity))
}

impl Drop for AccumulationBuffer {
    fn drop(&mut self) {
        let storage = std::mem::replace(&mut self.storage, Slab::empty());
        self.pool.release(storage);
    }
}

impl fmt::Debug for AccumulationBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccumulationBuffer")
            .field("cursor", &self.cursor)
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("growable", &self.growable)
            .field("frame_limit", &self.frame_limit)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Arc<SlabPool> {
        Arc::new(SlabPool::new())
    }

    #[test]
    fn enqueue_then_advance_tracks_cursor() {
        let mut buf = AccumulationBuffer::new(pool(), 64);
        buf.enqueue(b"hello").unwrap();
        assert_eq!(buf.bytes_left(), 5);
        assert_eq!(buf.current(), Some(b'h'));

        buf.advance(2).unwrap();
        assert_eq!(buf.unread(), b"llo");
        assert_eq!(buf.cursor(), 2);
        assert!(buf.cursor() <= buf.len() && buf.len() <= buf.capacity());
    }

    #[test]
    fn advance_past_end_is_an_error() {
        let mut buf = AccumulationBuffer::new(pool(), 64);
        buf.enqueue(b"abc").unwrap();
        assert_eq!(
            buf.advance(4),
            Err(BufferError::CursorOutOfRange { by: 4, left: 3 })
        );
        assert_eq!(buf.cursor(), 0);
    }

    #[test]
    fn take_byte_stops_at_the_end() {
        let mut buf = AccumulationBuffer::new(pool(), 64);
        buf.enqueue(b"S").unwrap();
        assert_eq!(buf.take_byte(), Some(b'S'));
        assert_eq!(buf.take_byte(), None);
        assert!(buf.is_drained());
    }

    #[test]
    fn compaction_happens_before_growth() {
        let mut buf = AccumulationBuffer::new(pool(), 64);
        buf.enqueue(&[1u8; 60]).unwrap();
        buf.advance(50).unwrap();

        buf.enqueue(&[2u8; 20]).unwrap();
        assert_eq!(buf.capacity(), 64);
        assert_eq!(buf.cursor(), 0);
        assert_eq!(buf.bytes_left(), 30);
        assert_eq!(&buf.unread()[..10], &[1u8; 10]);
        assert_eq!(&buf.unread()[10..], &[2u8; 20]);
    }

    #[test]
    fn grows_when_message_exceeds_capacity() {
        let mut buf = AccumulationBuffer::new(pool(), 64);
        buf.enqueue(&[7u8; 40]).unwrap();
        buf.enqueue(&[8u8; 100]).unwrap();
        assert!(buf.capacity() >= 140);
        assert_eq!(buf.bytes_left(), 140);
    }

    #[test]
    fn bounded_buffer_refuses_growth() {
        let mut buf = AccumulationBuffer::bounded(pool(), 64);
        buf.enqueue(&[0u8; 60]).unwrap();
        let err = buf.enqueue(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, BufferError::Full { needed: 70, capacity: 64 }));
        assert_eq!(buf.bytes_left(), 60);
    }

    #[test]
    fn bounded_buffer_keeps_default_frame_limit() {
        let buf = AccumulationBuffer::bounded(pool(), 64);
        assert_eq!(buf.frame_limit(), DEFAULT_FRAME_LIMIT);

        let buf = buf.with_frame_limit(1024).into_phase(4096);
        assert_eq!(buf.frame_limit(), 1024);
    }

    #[test]
    fn into_phase_keeps_unread_bytes() {
        let mut buf = AccumulationBuffer::bounded(pool(), 64);
        buf.enqueue(b"xxZ\0\0\0\x05I").unwrap();
        buf.advance(2).unwrap();

        let buf = buf.into_phase(4096);
        assert_eq!(buf.capacity(), 4096);
        assert_eq!(buf.unread(), b"Z\0\0\0\x05I");
    }

    #[test]
    fn dropped_buffer_returns_slab_to_pool() {
        let pool = pool();
        {
            let _buf = AccumulationBuffer::new(pool.clone(), 128);
        }
        let class = crate::memory::SizeClass::for_len(128).unwrap();
        assert_eq!(pool.free_count(class), 1);
    }

    #[test]
    fn oversize_growth_leaves_pool_alone() {
        let pool = pool();
        let mut buf = AccumulationBuffer::new(pool.clone(), 64);
        buf.enqueue(&vec![1u8; MAX_SLAB_SIZE + 10]).unwrap();
        assert!(buf.capacity() > MAX_SLAB_SIZE);
        drop(buf);
        // only the original 64 B slab came back
        assert_eq!(pool.stats().free.iter().map(|(_, n)| n).sum::<usize>(), 1);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
