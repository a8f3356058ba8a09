//! memory/slab.rs
//!
//! Size-classed buffer pool. Classes are powers of two from 64 B to 64 KiB.
//! A slab is owned by exactly one encoder or buffer at a time; `release`
//! files it back under the class matching its own length.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::warn;

use crate::errors::SlabError;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const MIN_SHIFT: u32 = 6; // 64 B
const MAX_SHIFT: u32 = 16; // 64 KiB
const CLASS_COUNT: usize = (MAX_SHIFT - MIN_SHIFT + 1) as usize;

pub const MAX_SLAB_SIZE: usize = 1 << MAX_SHIFT;

static DEFAULT_POOL: Lazy<Arc<SlabPool>> = Lazy::new(|| Arc::new(SlabPool::new()));

// -----------------------------------------------------------------------------
// ----- SizeClass -------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SizeClass(u8);

impl SizeClass {
    pub const SMALLEST: SizeClass = SizeClass(0);
    pub const LARGEST: SizeClass = SizeClass((CLASS_COUNT - 1) as u8);

    /// Smallest class able to hold `len` bytes.
    pub fn for_len(len: usize) -> Result<SizeClass, SlabError> {
        if len > MAX_SLAB_SIZE {
            return Err(SlabError::TooLarge {
                requested: len,
                max: MAX_SLAB_SIZE,
            });
        }

        let rounded = len.max(1 << MIN_SHIFT).next_power_of_two();
        let shift = rounded.trailing_zeros();
        Ok(SizeClass((shift - MIN_SHIFT) as u8))
    }

    /// Class whose size is exactly `len`, if any.
    pub fn exact(len: usize) -> Option<SizeClass> {
        if !len.is_power_of_two() {
            return None;
        }
        let shift = len.trailing_zeros();
        if !(MIN_SHIFT..=MAX_SHIFT).contains(&shift) {
            return None;
        }
        Some(SizeClass((shift - MIN_SHIFT) as u8))
    }

    #[inline]
    pub fn size(self) -> usize {
        1 << (MIN_SHIFT + self.0 as u32)
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = SizeClass> {
        (0..CLASS_COUNT as u8).map(SizeClass)
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}B", self.size())
    }
}

// -----------------------------------------------------------------------------
// ----- Slab ------------------------------------------------------------------

/// A checked-out buffer. Deliberately not `Clone`.
pub struct Slab {
    bytes: Box<[u8]>,
}

impl Slab {
    fn fresh(class: SizeClass) -> Self {
        Self {
            bytes: vec![0u8; class.size()].into_boxed_slice(),
        }
    }

    /// Heap buffer outside every class; `release` drops it.
    pub(crate) fn oversize(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len].into_boxed_slice(),
        }
    }

    pub(crate) fn empty() -> Self {
        Self {
            bytes: Box::default(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Identity of the backing allocation, used to observe reuse.
    #[inline]
    pub fn addr(&self) -> usize {
        self.bytes.as_ptr() as usize
    }
}

impl fmt::Debug for Slab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slab").field("len", &self.len()).finish()
    }
}

// -----------------------------------------------------------------------------
// ----- SlabPool --------------------------------------------------------------

pub struct SlabPool {
    free: [Mutex<Vec<Slab>>; CLASS_COUNT],
    fresh_allocations: AtomicU64,
    reuses: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlabStats {
    /// `(class, free slabs)` for every class.
    pub free: Vec<(SizeClass, usize)>,
    pub fresh_allocations: u64,
    pub reuses: u64,
}

// -----------------------------------------------------------------------------
// ----- SlabPool: Static ------------------------------------------------------

impl SlabPool {
    pub fn new() -> Self {
        Self {
            free: std::array::from_fn(|_| Mutex::new(Vec::new())),
            fresh_allocations: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
        }
    }

    /// Pool with `count` slabs already sitting in each listed class.
    pub fn with_preallocated(counts: &[(SizeClass, usize)]) -> Self {
        let pool = Self::new();
        for &(class, count) in counts {
            let mut list = pool.free[class.index()].lock();
            list.extend((0..count).map(|_| Slab::fresh(class)));
        }
        pool
    }

    /// Process-wide pool shared by engines that do not bring their own.
    pub fn global() -> Arc<SlabPool> {
        DEFAULT_POOL.clone()
    }
}

impl Default for SlabPool {
    fn default() -> Self {
        Self::new()
    }
}

// -----------------------------------------------------------------------------
// ----- SlabPool: Public ------------------------------------------------------

impl SlabPool {
    pub fn acquire(&self, class: SizeClass) -> Slab {
        if let Some(slab) = self.free[class.index()].lock().pop() {
            self.reuses.fetch_add(1, Ordering::Relaxed);
            return slab;
        }

        self.fresh_allocations.fetch_add(1, Ordering::Relaxed);
        Slab::fresh(class)
    }

    /// Acquire the smallest slab that fits `len` bytes.
    pub fn acquire_for(&self, len: usize) -> Result<Slab, SlabError> {
        SizeClass::for_len(len).map(|class| self.acquire(class))
    }

    /// Return a slab to the free list of its own class. Buffers whose length
    /// is not a class size are dropped.
    pub fn release(&self, slab: Slab) {
        match SizeClass::exact(slab.len()) {
            Some(class) => self.free[class.index()].lock().push(slab),
            None if slab.len() > MAX_SLAB_SIZE || slab.is_empty() => {}
            None => warn!("dropping slab of foreign size {}", slab.len()),
        }
    }

    pub fn free_count(&self, class: SizeClass) -> usize {
        self.free[class.index()].lock().len()
    }

    pub fn stats(&self) -> SlabStats {
        SlabStats {
            free: SizeClass::all().map(|c| (c, self.free_count(c))).collect(),
            fresh_allocations: self.fresh_allocations.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for SlabPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabPool")
            .field("fresh_allocations", &self.fresh_allocations.load(Ordering::Relaxed))
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
