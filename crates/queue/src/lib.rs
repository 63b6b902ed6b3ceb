//! Durable write-ahead indexing queue.
//!
//! Each grain interface gets one durable FIFO of indexing actions with
//! punctuation markers. Enqueues are persisted (write-ahead) before the
//! commit that references them; a background processor drains the queue
//! in batches, applies still-active updates through the index clients,
//! reverses tentative leftovers of aborted commits on unique indexes,
//! and acknowledges back to the owning grains.

pub mod debounce;
pub mod host;
pub mod processor;
pub mod queue;

pub use debounce::WriteDebouncer;
pub use host::QueueHost;
pub use processor::{IndexingQueueProcessor, ProcessorHandle};
pub use queue::{IndexingQueue, QueueEntry};
