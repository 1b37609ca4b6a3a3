//! Worker-side job processing contract.

use std::future::Future;
use std::pin::Pin;

use crate::{Job, JobResult};

/// Result type for job processors. The error text becomes the job's
/// failure reason.
pub type ProcessResult = Result<JobResult, String>;

/// Future type for async job processors.
pub type ProcessFuture = Pin<Box<dyn Future<Output = ProcessResult> + Send>>;

/// Business logic run by the broker's workers for every job of a queue.
///
/// Queue services own a processor and hand it to their channel as the
/// consumer; they never call it themselves.
pub trait JobProcessor: Send + Sync + 'static {
    /// Process a job and return the result.
    fn process(&self, job: &Job) -> ProcessFuture;
}

/// A simple function-based job processor.
pub struct FnProcessor<F>
where
    F: Fn(&Job) -> ProcessFuture + Send + Sync + 'static,
{
    processor: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(&Job) -> ProcessFuture + Send + Sync + 'static,
{
    /// Create a new function-based processor.
    pub fn new(processor: F) -> Self {
        Self { processor }
    }
}

impl<F> JobProcessor for FnProcessor<F>
where
    F: Fn(&Job) -> ProcessFuture + Send + Sync + 'static,
{
    fn process(&self, job: &Job) -> ProcessFuture {
        (self.processor)(job)
    }
}
