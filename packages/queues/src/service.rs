//! Queue service binding one business capability to one queue channel.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};

use queue_core::{
    ChannelEvent, Job, JobId, JobOptions, JobProcessor, JobState, QueueChannel, QueueError,
    QueueResult, QueueStatus,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::observers::{ObserverResult, Observers};

/// Default number of workers started for a queue with a processor.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Outcome of retrying every failed job of a queue.
#[derive(Debug, Default)]
pub struct RetryReport {
    /// Failed jobs found and retried.
    pub attempted: usize,
    /// Retries the broker accepted.
    pub retried: usize,
    /// Retries that errored, by job.
    pub failures: Vec<(JobId, QueueError)>,
}

impl RetryReport {
    /// Check whether every retry was accepted.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Producer and administration facade over one queue channel.
///
/// `P` is the payload type producers submit. The optional processor is
/// handed to the channel as the queue's consumer on start; the service
/// itself never runs it.
pub struct QueueService<P> {
    channel: Arc<dyn QueueChannel>,
    processor: Option<Arc<dyn JobProcessor>>,
    concurrency: usize,
    observers: Arc<Observers>,
    listener: Mutex<Option<JoinHandle<()>>>,
    _payload: PhantomData<fn() -> P>,
}

impl<P> QueueService<P> {
    /// Create a producer/admin service without a consumer.
    pub fn new(channel: Arc<dyn QueueChannel>) -> Self {
        Self {
            channel,
            processor: None,
            concurrency: DEFAULT_CONCURRENCY,
            observers: Arc::new(Observers::new()),
            listener: Mutex::new(None),
            _payload: PhantomData,
        }
    }

    /// Set the processor run by the queue's workers.
    pub fn with_processor(mut self, processor: Arc<dyn JobProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Set the number of workers started for the processor.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Queue name, shared with the channel.
    pub fn name(&self) -> &str {
        self.channel.name()
    }

    /// The underlying channel.
    pub fn channel(&self) -> &Arc<dyn QueueChannel> {
        &self.channel
    }

    /// Check whether the event listener is running.
    pub fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|listener| !listener.is_finished())
    }

    fn replace_listener(&self, listener: Option<JoinHandle<()>>) {
        let previous = std::mem::replace(
            &mut *self.listener.lock().unwrap_or_else(PoisonError::into_inner),
            listener,
        );
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Connect the queue.
    ///
    /// Events are subscribed before readiness is awaited so jobs that fire
    /// early still reach the observers. Failing to become ready is a
    /// startup fault and is returned to the caller.
    pub async fn start(&self) -> QueueResult<()> {
        let events = self.channel.subscribe();
        let listener = tokio::spawn(dispatch_events(
            self.name().to_string(),
            events,
            self.observers.clone(),
        ));
        self.replace_listener(Some(listener));

        if let Err(e) = self.channel.wait_until_ready().await {
            tracing::error!("Queue '{}' failed to become ready: {}", self.name(), e);
            self.replace_listener(None);
            return Err(e);
        }

        if let Some(processor) = &self.processor {
            self.channel
                .consume(processor.clone(), self.concurrency)
                .await?;
            tracing::info!(
                "Queue '{}' ready with {} workers",
                self.name(),
                self.concurrency
            );
        } else {
            tracing::info!("Queue '{}' ready", self.name());
        }
        Ok(())
    }

    /// Stop listening and close the channel. Safe before `start`.
    pub async fn stop(&self) -> QueueResult<()> {
        self.replace_listener(None);
        self.channel.close().await?;
        tracing::info!("Queue '{}' stopped", self.name());
        Ok(())
    }

    /// Get a job by ID. A missing job is `None`, not an error.
    pub async fn get_job(&self, id: JobId) -> QueueResult<Option<Job>> {
        self.channel.fetch(id).await
    }

    /// Remove a job if it still exists.
    pub async fn remove_job(&self, id: JobId) -> QueueResult<()> {
        match self.channel.fetch(id).await? {
            Some(_) => self.channel.remove(id).await,
            None => {
                tracing::debug!("Job {} not found in queue '{}'", id, self.name());
                Ok(())
            }
        }
    }

    /// List jobs in one state.
    pub async fn get_jobs(&self, state: JobState) -> QueueResult<Vec<Job>> {
        self.channel.list(state).await
    }

    pub async fn pause_queue(&self) -> QueueResult<()> {
        self.channel.pause().await?;
        tracing::info!("Queue '{}' paused", self.name());
        Ok(())
    }

    pub async fn resume_queue(&self) -> QueueResult<()> {
        self.channel.resume().await?;
        tracing::info!("Queue '{}' resumed", self.name());
        Ok(())
    }

    /// Discard every waiting and delayed job.
    pub async fn clear_queue(&self) -> QueueResult<()> {
        self.channel.drain().await?;
        tracing::info!("Queue '{}' cleared", self.name());
        Ok(())
    }

    /// Count jobs per state.
    ///
    /// The five counts are independent requests and are not a consistent
    /// snapshot of each other.
    pub async fn get_queue_status(&self) -> QueueResult<QueueStatus> {
        let (waiting, active, completed, failed, delayed) = tokio::try_join!(
            self.channel.count(JobState::Waiting),
            self.channel.count(JobState::Active),
            self.channel.count(JobState::Completed),
            self.channel.count(JobState::Failed),
            self.channel.count(JobState::Delayed),
        )?;
        Ok(QueueStatus {
            waiting,
            active,
            completed,
            failed,
            delayed,
        })
    }

    /// Retry every failed job, continuing past individual failures.
    pub async fn retry_failed_jobs(&self) -> QueueResult<RetryReport> {
        let failed = self.channel.list(JobState::Failed).await?;
        let mut report = RetryReport::default();

        for job in &failed {
            report.attempted += 1;
            match self.channel.retry(job.id).await {
                Ok(()) => report.retried += 1,
                Err(e) => {
                    tracing::warn!("Failed to retry job {} in '{}': {}", job.id, self.name(), e);
                    report.failures.push((job.id, e));
                }
            }
        }

        tracing::info!(
            "Queue '{}': retried {} of {} failed jobs",
            self.name(),
            report.retried,
            report.attempted
        );
        Ok(report)
    }

    /// Register an observer for completed jobs.
    pub fn on_job_completed<F>(&self, observer: F)
    where
        F: Fn(&Job) -> ObserverResult + Send + Sync + 'static,
    {
        self.observers.add_completed(observer);
    }

    /// Register an observer for failed jobs.
    pub fn on_job_failed<F>(&self, observer: F)
    where
        F: Fn(&Job, &str) -> ObserverResult + Send + Sync + 'static,
    {
        self.observers.add_failed(observer);
    }
}

impl<P: Serialize> QueueService<P> {
    /// Submit a job.
    ///
    /// Broker errors are returned unchanged; nothing is retried here.
    pub async fn add_job(&self, payload: &P, options: JobOptions) -> QueueResult<Job> {
        let payload = serde_json::to_value(payload)?;
        let job = self.channel.submit(payload, options).await?;
        tracing::info!("Job {} added to queue '{}'", job.id, self.name());
        Ok(job)
    }
}

impl<P> Drop for QueueService<P> {
    fn drop(&mut self) {
        self.replace_listener(None);
    }
}

/// Deliver channel events to logging and observers until the channel
/// closes.
async fn dispatch_events(
    queue: String,
    mut events: broadcast::Receiver<ChannelEvent>,
    observers: Arc<Observers>,
) {
    loop {
        match events.recv().await {
            Ok(event) => handle_event(&queue, &observers, event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Queue '{}' listener skipped {} events", queue, skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn handle_event(queue: &str, observers: &Observers, event: ChannelEvent) {
    match event {
        ChannelEvent::Error { message, .. } => {
            tracing::error!("Queue '{}' error: {}", queue, message);
        }
        ChannelEvent::Waiting { job } => {
            tracing::debug!("Job {} waiting in '{}'", job.id, queue);
        }
        ChannelEvent::Active { job } => {
            tracing::debug!(
                "Job {} active in '{}' (attempt {})",
                job.id,
                queue,
                job.attempts_made
            );
        }
        ChannelEvent::Completed { job } => {
            tracing::debug!("Job {} completed in '{}'", job.id, queue);
            observers.notify_completed(queue, &job);
        }
        ChannelEvent::Failed { job, error } => {
            tracing::warn!("Job {} failed in '{}': {}", job.id, queue, error);
            observers.notify_failed(queue, &job, &error);
        }
        ChannelEvent::Stalled { job } => {
            tracing::warn!("Job {} stalled in '{}'", job.id, queue);
        }
    }
}
