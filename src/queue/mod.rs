//! The queue engine: request pool, untyped transfer layer, buffered
//! aggregation, and termination detection.

pub mod buffered;
pub mod builder;
pub mod pool;
pub mod raw;
mod termination;

pub use buffered::{BufferedQueue, OverflowPolicy, QueueStats};
pub use builder::{QueueBuilder, DEFAULT_THRESHOLD};
pub use pool::{Completion, OpKind, RequestPool};
pub use raw::RawQueue;
