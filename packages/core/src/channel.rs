//! The queue channel seam between queue services and a broker.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::broadcast;

use crate::{ChannelEvent, Job, JobId, JobOptions, JobProcessor, JobState, QueueResult};

/// One named lane of work inside a broker.
///
/// Every method that talks to the broker is a suspension point and
/// reports connectivity problems as `QueueError::BrokerUnavailable`.
/// None of them impose a timeout of their own.
pub trait QueueChannel: Send + Sync + 'static {
    /// Name of the lane, used as the registry key.
    fn name(&self) -> &str;

    /// Subscribe to lifecycle events.
    ///
    /// Works before the channel is ready, so no early event is missed.
    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;

    /// Resolve once the broker connection is established.
    fn wait_until_ready(&self) -> BoxFuture<'_, QueueResult<()>>;

    /// Enqueue a payload; the broker assigns the job ID.
    fn submit(&self, payload: serde_json::Value, options: JobOptions) -> BoxFuture<'_, QueueResult<Job>>;

    /// Fetch a job by ID.
    fn fetch(&self, id: JobId) -> BoxFuture<'_, QueueResult<Option<Job>>>;

    /// Remove a job. Removing a job that no longer exists is a no-op.
    fn remove(&self, id: JobId) -> BoxFuture<'_, QueueResult<()>>;

    /// Stop handing jobs to workers.
    fn pause(&self) -> BoxFuture<'_, QueueResult<()>>;

    /// Resume handing jobs to workers.
    fn resume(&self) -> BoxFuture<'_, QueueResult<()>>;

    /// Discard every waiting and delayed job. Irreversible.
    fn drain(&self) -> BoxFuture<'_, QueueResult<()>>;

    /// Count jobs in one state.
    fn count(&self, state: JobState) -> BoxFuture<'_, QueueResult<u64>>;

    /// List jobs in one state.
    fn list(&self, state: JobState) -> BoxFuture<'_, QueueResult<Vec<Job>>>;

    /// Move a failed job back to waiting.
    fn retry(&self, id: JobId) -> BoxFuture<'_, QueueResult<()>>;

    /// Register worker-side execution of this lane's jobs.
    fn consume(&self, processor: Arc<dyn JobProcessor>, concurrency: usize)
    -> BoxFuture<'_, QueueResult<()>>;

    /// Disconnect from the broker. Safe to call on a channel that never
    /// became ready.
    fn close(&self) -> BoxFuture<'_, QueueResult<()>>;
}
