//! Completed/failed observer lists with per-observer error isolation.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use queue_core::Job;
use thiserror::Error;

/// Error returned by an application observer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ObserverError(pub String);

impl ObserverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for ObserverError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ObserverError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Result type for observers.
pub type ObserverResult = Result<(), ObserverError>;

/// Observer for completed jobs.
pub type CompletedObserver = Arc<dyn Fn(&Job) -> ObserverResult + Send + Sync>;

/// Observer for failed jobs; receives the failure reason.
pub type FailedObserver = Arc<dyn Fn(&Job, &str) -> ObserverResult + Send + Sync>;

/// Registered observers of one queue service.
#[derive(Default)]
pub struct Observers {
    completed: RwLock<Vec<CompletedObserver>>,
    failed: RwLock<Vec<FailedObserver>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_completed<F>(&self, observer: F)
    where
        F: Fn(&Job) -> ObserverResult + Send + Sync + 'static,
    {
        self.completed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(observer));
    }

    pub fn add_failed<F>(&self, observer: F)
    where
        F: Fn(&Job, &str) -> ObserverResult + Send + Sync + 'static,
    {
        self.failed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(observer));
    }

    /// Number of (completed, failed) observers.
    pub fn counts(&self) -> (usize, usize) {
        (
            self.completed.read().unwrap_or_else(PoisonError::into_inner).len(),
            self.failed.read().unwrap_or_else(PoisonError::into_inner).len(),
        )
    }

    /// Run every completed observer in registration order.
    ///
    /// Returns how many observers errored or panicked.
    pub fn notify_completed(&self, queue: &str, job: &Job) -> usize {
        // Snapshot so observers may register more observers
        let observers = self
            .completed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut failures = 0;
        for observer in &observers {
            if !isolate(queue, job, "completed", || observer(job)) {
                failures += 1;
            }
        }
        failures
    }

    /// Run every failed observer in registration order.
    ///
    /// Returns how many observers errored or panicked.
    pub fn notify_failed(&self, queue: &str, job: &Job, error: &str) -> usize {
        let observers = self
            .failed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut failures = 0;
        for observer in &observers {
            if !isolate(queue, job, "failed", || observer(job, error)) {
                failures += 1;
            }
        }
        failures
    }
}

/// Run one observer, logging instead of propagating its failure.
fn isolate(queue: &str, job: &Job, kind: &str, call: impl FnOnce() -> ObserverResult) -> bool {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(
                "Queue '{}' {} observer failed for job {}: {}",
                queue,
                kind,
                job.id,
                e
            );
            false
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(
                "Queue '{}' {} observer panicked for job {}: {}",
                queue,
                kind,
                job.id,
                message
            );
            false
        }
    }
}
