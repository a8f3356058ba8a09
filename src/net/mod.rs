pub mod accumulator;
pub mod write_queue;

pub use accumulator::{AccumulationBuffer, BufferError};
pub use write_queue::{QueueOverflow, WriteQueue};
