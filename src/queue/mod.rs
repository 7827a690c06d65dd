//! Processing Queue Module
//!
//! Received messages are not handled on the I/O tasks that read them. Each
//! connection is pinned to one queue of a fixed pool, and one worker per
//! queue runs the queued handler calls in arrival order.
//!
//! # Components
//!
//! - `ProcessingQueue`: unbounded task FIFO drained by a dedicated worker
//! - `ProcessingPool`: fixed set of queues with round-robin assignment and
//!   a monitor that revives dead workers
//! - `QueueBinding`: a connection's seat on its queue, released on drop

pub use pool::ProcessingPool;
pub use pool::QueueBinding;
pub use pool::QueuePoolConfig;
pub use processing_queue::ProcessingQueue;
pub use processing_queue::QueueTask;
pub use processing_queue::DEFAULT_POLL_INTERVAL;

mod pool;
mod processing_queue;
