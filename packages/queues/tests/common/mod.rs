#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use queue_core::{
    BoxFuture, ChannelEvent, Job, JobId, JobOptions, JobProcessor, JobState, QueueChannel,
    QueueError, QueueResult,
};
use tokio::sync::broadcast;

/// In-memory channel with switchable failures.
pub struct FakeChannel {
    name: String,
    events: broadcast::Sender<ChannelEvent>,
    jobs: Mutex<HashMap<JobId, Job>>,
    pub ready: AtomicBool,
    pub fail_pause: AtomicBool,
    pub fail_status: AtomicBool,
    pub paused: AtomicBool,
    pub closed: AtomicBool,
    pub reject_retry: Mutex<HashSet<JobId>>,
    pub retry_calls: Mutex<Vec<JobId>>,
    pub removed: Mutex<Vec<JobId>>,
    pub consumers: AtomicUsize,
}

impl FakeChannel {
    pub fn new(name: &str) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            name: name.to_string(),
            events,
            jobs: Mutex::new(HashMap::new()),
            ready: AtomicBool::new(true),
            fail_pause: AtomicBool::new(false),
            fail_status: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reject_retry: Mutex::new(HashSet::new()),
            retry_calls: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            consumers: AtomicUsize::new(0),
        })
    }

    /// Store a job directly in the given state.
    pub fn insert(&self, state: JobState) -> Job {
        let mut job = Job::new(self.name.clone(), serde_json::json!({}), JobOptions::default());
        job.state = state;
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        job
    }

    pub fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

fn unavailable() -> QueueError {
    QueueError::BrokerUnavailable("connection refused".into())
}

impl QueueChannel for FakeChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    fn wait_until_ready(&self) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(async move {
            if self.ready.load(Ordering::SeqCst) {
                Ok(())
            } else {
                self.emit(ChannelEvent::Error {
                    queue: self.name.clone(),
                    message: "connection refused".into(),
                });
                Err(unavailable())
            }
        })
    }

    fn submit(&self, payload: serde_json::Value, options: JobOptions) -> BoxFuture<'_, QueueResult<Job>> {
        Box::pin(async move {
            if !self.ready.load(Ordering::SeqCst) {
                return Err(unavailable());
            }
            let job = Job::new(self.name.clone(), payload, options);
            self.jobs.lock().unwrap().insert(job.id, job.clone());
            Ok(job)
        })
    }

    fn fetch(&self, id: JobId) -> BoxFuture<'_, QueueResult<Option<Job>>> {
        Box::pin(async move { Ok(self.jobs.lock().unwrap().get(&id).cloned()) })
    }

    fn remove(&self, id: JobId) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(async move {
            self.removed.lock().unwrap().push(id);
            self.jobs.lock().unwrap().remove(&id);
            Ok(())
        })
    }

    fn pause(&self) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(async move {
            if self.fail_pause.load(Ordering::SeqCst) {
                return Err(unavailable());
            }
            // Keep the sibling queues in flight when a fan-out runs
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.paused.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn resume(&self) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(async move {
            self.paused.store(false, Ordering::SeqCst);
            Ok(())
        })
    }

    fn drain(&self) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(async move {
            self.jobs
                .lock()
                .unwrap()
                .retain(|_, job| !matches!(job.state, JobState::Waiting | JobState::Delayed));
            Ok(())
        })
    }

    fn count(&self, state: JobState) -> BoxFuture<'_, QueueResult<u64>> {
        Box::pin(async move {
            if self.fail_status.load(Ordering::SeqCst) {
                return Err(unavailable());
            }
            let jobs = self.jobs.lock().unwrap();
            Ok(jobs.values().filter(|job| job.state == state).count() as u64)
        })
    }

    fn list(&self, state: JobState) -> BoxFuture<'_, QueueResult<Vec<Job>>> {
        Box::pin(async move {
            let mut jobs: Vec<Job> = self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|job| job.state == state)
                .cloned()
                .collect();
            jobs.sort_by_key(|job| job.id.0);
            Ok(jobs)
        })
    }

    fn retry(&self, id: JobId) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(async move {
            self.retry_calls.lock().unwrap().push(id);
            if self.reject_retry.lock().unwrap().contains(&id) {
                return Err(QueueError::CommandRejected {
                    command: "retry",
                    reason: "job is locked".into(),
                });
            }
            if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
                job.state = JobState::Waiting;
            }
            Ok(())
        })
    }

    fn consume(&self, _processor: Arc<dyn JobProcessor>, concurrency: usize) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(async move {
            self.consumers.store(concurrency, Ordering::SeqCst);
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, QueueResult<()>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Poll a condition until it holds or a second passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
