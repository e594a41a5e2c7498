//! Service layer
//!
//! The two halves of the log pipeline: the bounded queue the container output
//! reader feeds, and the flusher that drains it into the log sink.

mod flusher;
mod log_queue;

pub use flusher::BatchFlusher;
pub use log_queue::{BoundedLogQueue, DEFAULT_CAPACITY};
