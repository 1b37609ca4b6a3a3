//! Registry of named queue services with fleet-wide operations.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::{self, BoxFuture};
use queue_core::{QueueError, QueueResult, QueueStatus};

use crate::service::{QueueService, RetryReport};

/// The payload-independent face of a queue service.
///
/// Lets the manager hold services of different payload types.
pub trait ManagedQueue: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn pause_queue(&self) -> BoxFuture<'_, QueueResult<()>>;
    fn resume_queue(&self) -> BoxFuture<'_, QueueResult<()>>;
    fn clear_queue(&self) -> BoxFuture<'_, QueueResult<()>>;
    fn get_queue_status(&self) -> BoxFuture<'_, QueueResult<QueueStatus>>;
    fn retry_failed_jobs(&self) -> BoxFuture<'_, QueueResult<RetryReport>>;
    fn stop(&self) -> BoxFuture<'_, QueueResult<()>>;
}

impl<P: 'static> ManagedQueue for QueueService<P> {
    fn name(&self) -> &str {
        QueueService::name(self)
    }

    fn pause_queue(&self) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(QueueService::pause_queue(self))
    }

    fn resume_queue(&self) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(QueueService::resume_queue(self))
    }

    fn clear_queue(&self) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(QueueService::clear_queue(self))
    }

    fn get_queue_status(&self) -> BoxFuture<'_, QueueResult<QueueStatus>> {
        Box::pin(QueueService::get_queue_status(self))
    }

    fn retry_failed_jobs(&self) -> BoxFuture<'_, QueueResult<RetryReport>> {
        Box::pin(QueueService::retry_failed_jobs(self))
    }

    fn stop(&self) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(QueueService::stop(self))
    }
}

/// Name to service registry.
///
/// Owned by the application root and shared by `Arc`. Fleet operations
/// run against a snapshot taken when they start; services registered
/// meanwhile are not included.
#[derive(Default)]
pub struct QueueManager {
    queues: RwLock<HashMap<String, Arc<dyn ManagedQueue>>>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service under a name, replacing any previous entry.
    pub fn register_queue(&self, name: impl Into<String>, queue: Arc<dyn ManagedQueue>) {
        let name = name.into();
        let previous = self
            .queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), queue);
        if previous.is_some() {
            tracing::warn!("Queue '{}' re-registered, previous service replaced", name);
        } else {
            tracing::info!("Queue '{}' registered", name);
        }
    }

    /// Remove a service from the registry without stopping it.
    pub fn unregister_queue(&self, name: &str) -> Option<Arc<dyn ManagedQueue>> {
        self.queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn get_queue(&self, name: &str) -> Option<Arc<dyn ManagedQueue>> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Snapshot of every registered service.
    pub fn get_all_queues(&self) -> HashMap<String, Arc<dyn ManagedQueue>> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.queues.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start a service and register it under its queue name.
    ///
    /// A service that fails to start is not registered.
    pub async fn start_and_register<P: 'static>(&self, service: Arc<QueueService<P>>) -> QueueResult<()> {
        service.start().await?;
        let name = service.name().to_string();
        self.register_queue(name, service);
        Ok(())
    }

    /// Status of every registered queue, keyed by name.
    pub async fn get_global_status(&self) -> QueueResult<HashMap<String, QueueStatus>> {
        let statuses = fan_out(self.get_all_queues(), |queue| queue.get_queue_status()).await?;
        Ok(statuses.into_iter().collect())
    }

    pub async fn pause_all_queues(&self) -> QueueResult<()> {
        fan_out(self.get_all_queues(), |queue| queue.pause_queue()).await?;
        tracing::info!("All queues paused");
        Ok(())
    }

    pub async fn resume_all_queues(&self) -> QueueResult<()> {
        fan_out(self.get_all_queues(), |queue| queue.resume_queue()).await?;
        tracing::info!("All queues resumed");
        Ok(())
    }

    /// Discard waiting and delayed jobs of every queue.
    pub async fn clear_all_queues(&self) -> QueueResult<()> {
        fan_out(self.get_all_queues(), |queue| queue.clear_queue()).await?;
        tracing::info!("All queues cleared");
        Ok(())
    }

    /// Stop every registered service.
    ///
    /// Unlike the other fleet operations every service is given the
    /// chance to stop; the first failure is returned afterwards.
    pub async fn stop_all(&self) -> QueueResult<()> {
        let queues = self.get_all_queues();
        let results = future::join_all(queues.iter().map(|(name, queue)| async move {
            queue.stop().await.map_err(|e| QueueError::PartialFanout {
                queue: name.clone(),
                source: Box::new(e),
            })
        }))
        .await;

        let mut first = None;
        for err in results.into_iter().filter_map(Result::err) {
            tracing::error!("Failed to stop queue: {}", err);
            first.get_or_insert(err);
        }
        match first {
            Some(err) => Err(err),
            None => {
                tracing::info!("Stopped {} queues", queues.len());
                Ok(())
            }
        }
    }
}

/// Run one operation on every queue concurrently.
///
/// The first failure fails the whole operation and drops the rest.
async fn fan_out<T, F>(
    queues: HashMap<String, Arc<dyn ManagedQueue>>,
    op: F,
) -> QueueResult<Vec<(String, T)>>
where
    F: for<'a> Fn(&'a dyn ManagedQueue) -> BoxFuture<'a, QueueResult<T>>,
{
    let op = &op;
    future::try_join_all(queues.iter().map(|(name, queue)| async move {
        match op(queue.as_ref()).await {
            Ok(value) => Ok((name.clone(), value)),
            Err(e) => {
                tracing::error!("Queue '{}' failed during fleet operation: {}", name, e);
                Err(QueueError::PartialFanout {
                    queue: name.clone(),
                    source: Box::new(e),
                })
            }
        }
    }))
    .await
}
