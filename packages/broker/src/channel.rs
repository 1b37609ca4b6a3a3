//! Queue channel backed by a broker server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures_util::future::BoxFuture;
use queue_core::{
    ChannelEvent, Job, JobId, JobOptions, JobProcessor, JobState, QueueChannel, QueueError,
    QueueResult,
};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef, RpcReplyPort};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::config::BrokerConfig;
use crate::messages::{BrokerMessage, LaneHandle, LaneMessage, WorkerMessage};
use crate::worker::{WorkerActor, WorkerArgs};

/// Capacity of the channel-local event bus.
const EVENT_CAPACITY: usize = 1024;

/// Worker numbering; lease holders are identified by it.
static NEXT_WORKER: AtomicUsize = AtomicUsize::new(1);

/// Connection from one queue to its lane on a broker server.
///
/// Events are published on a channel-local bus that exists from
/// construction, and the lane's events are forwarded onto it once
/// connected.
pub struct BrokerChannel {
    name: String,
    config: BrokerConfig,
    events: broadcast::Sender<ChannelEvent>,
    lane: RwLock<Option<LaneHandle>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<ActorRef<WorkerMessage>>>,
}

impl BrokerChannel {
    /// Create a channel for the named queue. Nothing connects until
    /// `wait_until_ready`.
    pub fn new(name: impl Into<String>, config: BrokerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            name: name.into(),
            config,
            events,
            lane: RwLock::new(None),
            forwarder: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Create a shared channel.
    pub fn shared(name: impl Into<String>, config: BrokerConfig) -> Arc<Self> {
        Arc::new(Self::new(name, config))
    }

    /// Check whether the channel holds a lane connection.
    pub fn is_connected(&self) -> bool {
        self.lane
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Number of workers started through `consume`.
    pub fn worker_count(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn lane(&self) -> QueueResult<ActorRef<LaneMessage>> {
        self.lane
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|handle| handle.actor.clone())
            .ok_or_else(|| {
                QueueError::BrokerUnavailable(format!("channel '{}' is not connected", self.name))
            })
    }

    async fn call<T, F>(&self, build: F) -> QueueResult<T>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<T>) -> LaneMessage + Send,
    {
        let lane = self.lane()?;
        match ractor::rpc::call(&lane, build, None).await {
            Ok(CallResult::Success(value)) => Ok(value),
            Ok(CallResult::Timeout) => Err(QueueError::BrokerUnavailable(format!(
                "lane '{}' timed out",
                self.name
            ))),
            Ok(CallResult::SenderError) => Err(QueueError::BrokerUnavailable(format!(
                "lane '{}' dropped the request",
                self.name
            ))),
            Err(e) => Err(QueueError::BrokerUnavailable(format!(
                "lane '{}': {}",
                self.name, e
            ))),
        }
    }

    async fn open_lane(&self) -> QueueResult<LaneHandle> {
        let endpoint = self.config.endpoint();
        let broker = ActorRef::<BrokerMessage>::where_is(self.config.broker_name())
            .ok_or_else(|| QueueError::BrokerUnavailable(format!("no broker at {}", endpoint)))?;

        let result = ractor::rpc::call(
            &broker,
            |reply| BrokerMessage::OpenLane {
                name: self.name.clone(),
                reply,
            },
            None,
        )
        .await;
        match result {
            Ok(CallResult::Success(Ok(handle))) => Ok(handle),
            Ok(CallResult::Success(Err(reason))) => Err(QueueError::BrokerUnavailable(reason)),
            Ok(_) => Err(QueueError::BrokerUnavailable(format!(
                "broker at {} dropped the request",
                endpoint
            ))),
            Err(e) => Err(QueueError::BrokerUnavailable(format!(
                "broker at {}: {}",
                endpoint, e
            ))),
        }
    }

    fn attach(&self, handle: LaneHandle) {
        // Merge event streams - forward from the lane's channel to ours
        let mut rx = handle.events.subscribe();
        let tx = self.events.clone();
        let queue = self.name.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let _ = tx.send(event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        let _ = tx.send(ChannelEvent::Error {
                            queue: queue.clone(),
                            message: format!("missed {} events", skipped),
                        });
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        if let Some(previous) = self
            .forwarder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(forwarder)
        {
            previous.abort();
        }
        *self.lane.write().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn disconnect(&self) {
        if let Some(forwarder) = self
            .forwarder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            forwarder.abort();
        }
        let workers =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for worker in workers {
            worker.stop(None);
        }
        self.lane
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Drop for BrokerChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl QueueChannel for BrokerChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    fn wait_until_ready(&self) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(async move {
            if self.is_connected() {
                return Ok(());
            }

            let attempts = self.config.connect_attempts.max(1);
            let mut last_error = None;
            for attempt in 1..=attempts {
                match self.open_lane().await {
                    Ok(handle) => {
                        self.attach(handle);
                        tracing::debug!(
                            "Channel '{}' connected to {} (attempt {})",
                            self.name,
                            self.config.endpoint(),
                            attempt
                        );
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::debug!("Channel '{}' connect attempt {} failed: {}", self.name, attempt, e);
                        last_error = Some(e);
                        if attempt < attempts {
                            tokio::time::sleep(self.config.retry_interval).await;
                        }
                    }
                }
            }

            let error = last_error.unwrap_or_else(|| {
                QueueError::BrokerUnavailable(format!("no broker at {}", self.config.endpoint()))
            });
            let _ = self.events.send(ChannelEvent::Error {
                queue: self.name.clone(),
                message: error.to_string(),
            });
            Err(error)
        })
    }

    fn submit(&self, payload: serde_json::Value, options: JobOptions) -> BoxFuture<'_, QueueResult<Job>> {
        Box::pin(async move {
            self.call(|reply| LaneMessage::Submit {
                payload,
                options,
                reply,
            })
            .await?
            .map_err(|reason| QueueError::CommandRejected {
                command: "submit",
                reason,
            })
        })
    }

    fn fetch(&self, id: JobId) -> BoxFuture<'_, QueueResult<Option<Job>>> {
        Box::pin(async move { self.call(|reply| LaneMessage::Fetch { job_id: id, reply }).await })
    }

    fn remove(&self, id: JobId) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(async move {
            let existed = self
                .call(|reply| LaneMessage::Remove { job_id: id, reply })
                .await?;
            if !existed {
                tracing::debug!("Job {} already gone from '{}'", id, self.name);
            }
            Ok(())
        })
    }

    fn pause(&self) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(async move { self.call(|reply| LaneMessage::Pause { reply }).await })
    }

    fn resume(&self) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(async move { self.call(|reply| LaneMessage::Resume { reply }).await })
    }

    fn drain(&self) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(async move {
            let removed = self.call(|reply| LaneMessage::Drain { reply }).await?;
            tracing::debug!("Drained {} jobs from '{}'", removed, self.name);
            Ok(())
        })
    }

    fn count(&self, state: JobState) -> BoxFuture<'_, QueueResult<u64>> {
        Box::pin(async move { self.call(|reply| LaneMessage::Count { state, reply }).await })
    }

    fn list(&self, state: JobState) -> BoxFuture<'_, QueueResult<Vec<Job>>> {
        Box::pin(async move { self.call(|reply| LaneMessage::List { state, reply }).await })
    }

    fn retry(&self, id: JobId) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(async move {
            self.call(|reply| LaneMessage::Retry { job_id: id, reply })
                .await?
                .map(|_| ())
                .map_err(|reason| QueueError::CommandRejected {
                    command: "retry",
                    reason,
                })
        })
    }

    fn consume(
        &self,
        processor: Arc<dyn JobProcessor>,
        concurrency: usize,
    ) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(async move {
            let lane = self.lane()?;
            for _ in 0..concurrency {
                let args = WorkerArgs {
                    worker_id: format!(
                        "{}-worker-{}",
                        self.name,
                        NEXT_WORKER.fetch_add(1, Ordering::Relaxed)
                    ),
                    lane: lane.clone(),
                    processor: processor.clone(),
                    config: self.config.clone(),
                };
                let (worker, _handle) = Actor::spawn(None, WorkerActor, args)
                    .await
                    .map_err(|e| {
                        QueueError::BrokerUnavailable(format!("Failed to spawn worker: {}", e))
                    })?;
                self.workers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(worker);
            }
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(async move {
            self.disconnect();
            tracing::debug!("Channel '{}' closed", self.name);
            Ok(())
        })
    }
}
