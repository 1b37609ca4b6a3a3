//! Core domain types for the background job queue.
//!
//! This crate contains the types shared by the broker, the queue
//! services and the business queues built on top of them:
//! - Job, JobState and JobOptions for units of work
//! - QueueStatus for per-queue count snapshots
//! - ChannelEvent for job lifecycle notifications
//! - The `QueueChannel` and `JobProcessor` seams

mod channel;
mod error;
mod events;
mod job;
mod processor;
mod status;

pub use channel::QueueChannel;
pub use error::{QueueError, QueueResult};
pub use events::ChannelEvent;
pub use job::{Job, JobId, JobOptions, JobResult, JobState, MAX_OPTION_MS, Priority, after_ms};
pub use processor::{FnProcessor, JobProcessor, ProcessFuture, ProcessResult};
pub use status::QueueStatus;

/// Re-export of the boxed future type used at object-safe seams.
pub use futures_util::future::BoxFuture;
