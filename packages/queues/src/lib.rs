//! Queue services and the queue manager.
//!
//! A `QueueService<P>` binds one business capability to one queue
//! channel: producers submit typed payloads, administrators pause,
//! resume, clear and inspect it, and application code observes completed
//! and failed jobs. The `QueueManager` aggregates services by name and
//! runs those administrative operations across the whole fleet.

mod manager;
mod observers;
mod service;

pub use manager::{ManagedQueue, QueueManager};
pub use observers::{CompletedObserver, FailedObserver, ObserverError, ObserverResult, Observers};
pub use service::{DEFAULT_CONCURRENCY, QueueService, RetryReport};
