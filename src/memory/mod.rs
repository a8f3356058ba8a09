pub mod slab;

pub use slab::{MAX_SLAB_SIZE, SizeClass, Slab, SlabPool, SlabStats};
