pub mod fifo_drop_oldest_queue;
pub mod isolated_forwarder;
pub mod latest1_queue;

pub use fifo_drop_oldest_queue::*;
pub use isolated_forwarder::*;
pub use latest1_queue::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Snapshot input: only the newest event is kept.
    Latest1,
    FifoDropOldest { capacity: usize },
    /// Forwarded through a drain task into a channel of `output_buffer` slots.
    Isolated { output_buffer: usize },
}
