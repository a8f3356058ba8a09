//! net/write_queue.rs
//!
//! Bounded FIFO of outbound bytes held back while the transport is
//! throttled. Bytes are stored in chunks of at most `chunk_size` so a drain
//! hands the transport one chunk per write call.

use bytes::Bytes;
use std::collections::VecDeque;
use thiserror::Error;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024 * 1024;

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("write queue overflow: {queued} bytes queued, {incoming} incoming, capacity {capacity}")]
pub struct QueueOverflow {
    pub queued: usize,
    pub incoming: usize,
    pub capacity: usize,
}

// -----------------------------------------------------------------------------
// ----- WriteQueue ------------------------------------------------------------

#[derive(Debug)]
pub struct WriteQueue {
    chunks: VecDeque<Bytes>,
    queued_bytes: usize,
    capacity: usize,
    chunk_size: usize,
    throttled: bool,
}

impl WriteQueue {
    pub fn new(capacity: usize, chunk_size: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            queued_bytes: 0,
            capacity,
            chunk_size: chunk_size.max(1),
            throttled: false,
        }
    }
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY, DEFAULT_CHUNK_SIZE)
    }
}

// -----------------------------------------------------------------------------
// ----- WriteQueue: Public Methods --------------------------------------------

impl WriteQueue {
    /// True while new writes must be queued instead of handed to the
    /// transport: either the transport asked us to wait or older bytes are
    /// still queued ahead of them.
    #[inline]
    pub fn must_queue(&self) -> bool {
        self.throttled || !self.chunks.is_empty()
    }

    #[inline]
    pub fn is_throttled(&self) -> bool {
        self.throttled
    }

    /// The transport accepted bytes but signalled it wants a drain first.
    #[inline]
    pub fn throttle(&mut self) {
        self.throttled = true;
    }

    /// Drain arrived; the caller may start popping chunks.
    #[inline]
    pub fn release_throttle(&mut self) {
        self.throttled = false;
    }

    /// Queue `input`. Nothing is queued on overflow.
    pub fn push(&mut self, input: &[u8]) -> Result<(), QueueOverflow> {
        if self.queued_bytes + input.len() > self.capacity {
            return Err(QueueOverflow {
                queued: self.queued_bytes,
                incoming: input.len(),
                capacity: self.capacity,
            });
        }

        for chunk in input.chunks(self.chunk_size) {
            self.chunks.push_back(Bytes::copy_from_slice(chunk));
        }
        self.queued_bytes += input.len();
        Ok(())
    }

    /// Oldest queued chunk, if any.
    #[inline]
    pub fn pop_chunk(&mut self) -> Option<Bytes> {
        let chunk = self.chunks.pop_front()?;
        self.queued_bytes -= chunk.len();
        Some(chunk)
    }

    #[inline]
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    #[inline]
    pub fn queued_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.queued_bytes = 0;
        self.throttled = false;
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
