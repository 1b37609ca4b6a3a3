//! Lane actor holding the jobs of a single named queue.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::{ChannelEvent, Job, JobId, JobOptions, JobResult, JobState, Priority, after_ms};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;

use crate::config::BrokerConfig;
use crate::messages::LaneMessage;

/// Failure reason for jobs that exceeded the stall limit.
pub const STALLED_TOO_OFTEN: &str = "job stalled more than allowable limit";

/// Execution timeout for a job under the given config.
pub(crate) fn job_timeout(config: &BrokerConfig, job: &Job) -> Duration {
    job.options
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(config.default_job_timeout)
}

fn lease_deadline(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    after_ms(now, u64::try_from(lease.as_millis()).unwrap_or(u64::MAX))
}

/// Entry in the waiting heap (higher priority first, then submission order).
#[derive(Debug, Clone)]
struct PendingJob {
    id: JobId,
    priority: Priority,
    seq: u64,
}

impl PartialEq for PendingJob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PendingJob {}

impl PartialOrd for PendingJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingJob {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // Earlier submissions first
            Ordering::Equal => other.seq.cmp(&self.seq),
            other => other,
        }
    }
}

/// A worker's claim on an active job.
#[derive(Debug, Clone)]
struct Lease {
    worker_id: String,
    deadline: DateTime<Utc>,
}

/// State for the lane actor.
pub struct LaneState {
    /// Lane name.
    pub name: String,
    config: BrokerConfig,
    paused: bool,
    /// Waiting jobs (priority queue).
    waiting: BinaryHeap<PendingJob>,
    /// Leases on active jobs by ID.
    active: HashMap<JobId, Lease>,
    /// All retained jobs by ID.
    jobs: HashMap<JobId, Job>,
    seq: u64,
    events: broadcast::Sender<ChannelEvent>,
}

impl LaneState {
    /// Create a new lane state.
    pub fn new(
        name: impl Into<String>,
        config: BrokerConfig,
        events: broadcast::Sender<ChannelEvent>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            paused: false,
            waiting: BinaryHeap::new(),
            active: HashMap::new(),
            jobs: HashMap::new(),
            seq: 0,
            events,
        }
    }

    fn emit(&self, event: ChannelEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn push_waiting(&mut self, job_id: JobId) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        job.state = JobState::Waiting;
        job.delay_until = None;
        self.seq += 1;
        self.waiting.push(PendingJob {
            id: job_id,
            priority: job.options.priority,
            seq: self.seq,
        });
        let event = ChannelEvent::Waiting { job: job.clone() };
        self.emit(event);
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Store a new job and make it waiting or delayed.
    pub fn submit(&mut self, payload: serde_json::Value, options: JobOptions) -> Job {
        let job = Job::new(self.name.clone(), payload, options);
        let job_id = job.id;
        let delayed = job.state == JobState::Delayed;
        self.jobs.insert(job_id, job.clone());

        if delayed {
            tracing::debug!("Job {} delayed until {:?}", job_id, job.delay_until);
            job
        } else {
            self.push_waiting(job_id);
            self.jobs.get(&job_id).cloned().unwrap_or(job)
        }
    }

    pub fn fetch(&self, job_id: JobId) -> Option<Job> {
        self.jobs.get(&job_id).cloned()
    }

    /// Remove a job from every structure. Returns whether it existed.
    pub fn remove(&mut self, job_id: JobId) -> bool {
        self.waiting.retain(|p| p.id != job_id);
        self.active.remove(&job_id);
        self.jobs.remove(&job_id).is_some()
    }

    /// Discard waiting and delayed jobs.
    pub fn drain(&mut self) -> u64 {
        self.waiting.clear();
        let before = self.jobs.len();
        self.jobs.retain(|_, job| !job.state.is_pending());
        (before - self.jobs.len()) as u64
    }

    pub fn count(&self, state: JobState) -> u64 {
        self.jobs.values().filter(|j| j.state == state).count() as u64
    }

    /// Jobs in a state, oldest first.
    pub fn list(&self, state: JobState) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .values()
            .filter(|j| j.state == state)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id.0);
        jobs
    }

    /// Move a failed job back to waiting with a fresh attempt budget.
    pub fn retry(&mut self, job_id: JobId) -> Result<Job, String> {
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| format!("job {} not found", job_id))?;
        if job.state != JobState::Failed {
            return Err(format!("job {} is {}, not failed", job_id, job.state));
        }
        job.attempts_made = 0;
        job.stalled_count = 0;
        job.failed_reason = None;
        job.finished_at = None;
        self.push_waiting(job_id);
        self.fetch(job_id).ok_or_else(|| format!("job {} not found", job_id))
    }

    /// Move due delayed jobs to waiting.
    pub fn promote_delayed(&mut self, now: DateTime<Utc>) {
        let mut due: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| j.state == JobState::Delayed && j.is_due(now))
            .map(|j| j.id)
            .collect();
        due.sort_by_key(|id| id.0);
        for job_id in due {
            self.push_waiting(job_id);
        }
    }

    /// Lease the next waiting job to a worker.
    pub fn next_job(&mut self, worker_id: &str, now: DateTime<Utc>) -> Option<Job> {
        if self.paused {
            return None;
        }
        self.promote_delayed(now);

        while let Some(pending) = self.waiting.pop() {
            let timeout = match self.jobs.get(&pending.id) {
                Some(job) if job.state == JobState::Waiting => job_timeout(&self.config, job),
                _ => continue,
            };
            let deadline = lease_deadline(now, timeout.saturating_add(self.config.stall_grace));
            let Some(job) = self.jobs.get_mut(&pending.id) else {
                continue;
            };
            job.state = JobState::Active;
            job.attempts_made = job.attempts_made.saturating_add(1);
            job.processed_at = Some(now);
            let job = job.clone();

            self.active.insert(
                job.id,
                Lease {
                    worker_id: worker_id.to_string(),
                    deadline,
                },
            );
            self.emit(ChannelEvent::Active { job: job.clone() });
            return Some(job);
        }
        None
    }

    fn take_lease(&mut self, job_id: JobId, worker_id: &str) -> bool {
        match self.active.get(&job_id) {
            Some(lease) if lease.worker_id == worker_id => {
                self.active.remove(&job_id);
                true
            }
            _ => false,
        }
    }

    /// Record a successful attempt.
    pub fn complete(&mut self, job_id: JobId, worker_id: &str, result: JobResult, now: DateTime<Utc>) {
        if !self.take_lease(job_id, worker_id) {
            tracing::warn!(
                "Ignoring completion of job {} from {}: no matching lease",
                job_id,
                worker_id
            );
            return;
        }
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        job.state = JobState::Completed;
        job.return_value = Some(result);
        job.finished_at = Some(now);
        let event = ChannelEvent::Completed { job: job.clone() };
        self.emit(event);
        self.prune_finished();
    }

    /// Record a failed attempt, re-queueing while attempts remain.
    pub fn fail(&mut self, job_id: JobId, worker_id: &str, error: String, now: DateTime<Utc>) {
        if !self.take_lease(job_id, worker_id) {
            tracing::warn!(
                "Ignoring failure of job {} from {}: no matching lease",
                job_id,
                worker_id
            );
            return;
        }
        self.settle_failure(job_id, error, now);
    }

    fn settle_failure(&mut self, job_id: JobId, error: String, now: DateTime<Utc>) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        job.failed_reason = Some(error.clone());

        if job.has_attempts_left() && job.stalled_count <= self.config.max_stalled_count {
            match job.options.backoff_ms.filter(|ms| *ms > 0) {
                Some(backoff) => {
                    job.state = JobState::Delayed;
                    job.delay_until = Some(after_ms(now, backoff));
                    tracing::debug!("Job {} retrying after {}ms", job_id, backoff);
                }
                None => self.push_waiting(job_id),
            }
            return;
        }

        job.state = JobState::Failed;
        job.finished_at = Some(now);
        let event = ChannelEvent::Failed {
            job: job.clone(),
            error,
        };
        self.emit(event);
        self.prune_finished();
    }

    /// Drop the oldest finished jobs beyond the retention limit.
    fn prune_finished(&mut self) {
        let limit = self.config.max_finished_jobs;
        let mut finished: Vec<(Option<DateTime<Utc>>, JobId)> = self
            .jobs
            .values()
            .filter(|j| j.state.is_terminal())
            .map(|j| (j.finished_at, j.id))
            .collect();
        if finished.len() <= limit {
            return;
        }
        finished.sort_by_key(|(finished_at, id)| (*finished_at, id.0));
        let excess = finished.len() - limit;
        for (_, job_id) in finished.into_iter().take(excess) {
            self.jobs.remove(&job_id);
        }
        tracing::debug!("Lane '{}' pruned {} finished jobs", self.name, excess);
    }

    /// Reclaim active jobs whose lease ran past its deadline.
    pub fn expire_leases(&mut self, now: DateTime<Utc>) {
        let mut expired: Vec<JobId> = self
            .active
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        expired.sort_by_key(|id| id.0);

        for job_id in expired {
            self.active.remove(&job_id);
            let Some(job) = self.jobs.get_mut(&job_id) else {
                continue;
            };
            job.stalled_count += 1;
            let stalled = job.clone();
            tracing::warn!("Job {} stalled in lane '{}'", job_id, self.name);
            self.emit(ChannelEvent::Stalled { job: stalled.clone() });

            if stalled.stalled_count > self.config.max_stalled_count {
                self.settle_failure(job_id, STALLED_TOO_OFTEN.to_string(), now);
            } else {
                self.push_waiting(job_id);
            }
        }
    }
}

/// Lane actor that owns one queue's jobs.
pub struct LaneActor;

impl Actor for LaneActor {
    type Msg = LaneMessage;
    type State = LaneState;
    type Arguments = LaneState;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting lane: {}", args.name);

        // Start periodic tick
        let interval = args.config.tick_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if myself.send_message(LaneMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(args)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            LaneMessage::Submit {
                payload,
                options,
                reply,
            } => {
                let result = options
                    .validate()
                    .map(|()| state.submit(payload, options));
                if let Err(reason) = &result {
                    tracing::warn!("Lane '{}' rejected job: {}", state.name, reason);
                }
                let _ = reply.send(result);
            }

            LaneMessage::Fetch { job_id, reply } => {
                let _ = reply.send(state.fetch(job_id));
            }

            LaneMessage::Remove { job_id, reply } => {
                let _ = reply.send(state.remove(job_id));
            }

            LaneMessage::Pause { reply } => {
                state.set_paused(true);
                tracing::info!("Lane '{}' paused", state.name);
                let _ = reply.send(());
            }

            LaneMessage::Resume { reply } => {
                state.set_paused(false);
                tracing::info!("Lane '{}' resumed", state.name);
                let _ = reply.send(());
            }

            LaneMessage::Drain { reply } => {
                let removed = state.drain();
                tracing::info!("Lane '{}' drained {} jobs", state.name, removed);
                let _ = reply.send(removed);
            }

            LaneMessage::Count { state: job_state, reply } => {
                let _ = reply.send(state.count(job_state));
            }

            LaneMessage::List { state: job_state, reply } => {
                let _ = reply.send(state.list(job_state));
            }

            LaneMessage::Retry { job_id, reply } => {
                let _ = reply.send(state.retry(job_id));
            }

            LaneMessage::RequestJob { worker_id, reply } => {
                let _ = reply.send(state.next_job(&worker_id, Utc::now()));
            }

            LaneMessage::JobCompleted {
                job_id,
                worker_id,
                result,
            } => {
                state.complete(job_id, &worker_id, result, Utc::now());
            }

            LaneMessage::JobFailed {
                job_id,
                worker_id,
                error,
            } => {
                state.fail(job_id, &worker_id, error, Utc::now());
            }

            LaneMessage::Tick => {
                let now = Utc::now();
                state.promote_delayed(now);
                state.expire_leases(now);
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!("Lane '{}' stopped with {} jobs", state.name, state.jobs.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lane(config: BrokerConfig) -> (LaneState, broadcast::Receiver<ChannelEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (LaneState::new("mail", config, tx), rx)
    }

    fn drain_events(rx: &mut broadcast::Receiver<ChannelEvent>) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind());
        }
        kinds
    }

    #[test]
    fn dispatches_by_priority_then_submission_order() {
        let (mut lane, _rx) = lane(BrokerConfig::default());
        let first = lane.submit(json!(1), JobOptions::default());
        let urgent = lane.submit(json!(2), JobOptions::new().with_priority(Priority::High));
        let second = lane.submit(json!(3), JobOptions::default());

        let now = Utc::now();
        let order: Vec<JobId> = std::iter::from_fn(|| lane.next_job("w", now))
            .map(|j| j.id)
            .collect();
        assert_eq!(order, vec![urgent.id, first.id, second.id]);
        assert_eq!(lane.count(JobState::Active), 3);
    }

    #[test]
    fn paused_lane_hands_out_nothing() {
        let (mut lane, _rx) = lane(BrokerConfig::default());
        lane.submit(json!({}), JobOptions::default());
        lane.set_paused(true);
        assert!(lane.next_job("w", Utc::now()).is_none());
        lane.set_paused(false);
        assert!(lane.next_job("w", Utc::now()).is_some());
    }

    #[test]
    fn delayed_jobs_wait_until_due() {
        let (mut lane, _rx) = lane(BrokerConfig::default());
        let job = lane.submit(json!({}), JobOptions::new().with_delay_ms(1_000));
        assert_eq!(lane.count(JobState::Delayed), 1);

        let now = Utc::now();
        assert!(lane.next_job("w", now).is_none());

        let later = now + chrono::Duration::seconds(2);
        let leased = lane.next_job("w", later).expect("job should be due");
        assert_eq!(leased.id, job.id);
        assert_eq!(leased.attempts_made, 1);
    }

    #[test]
    fn failure_requeues_until_attempts_exhausted() {
        let (mut lane, mut rx) = lane(BrokerConfig::default());
        let job = lane.submit(json!({}), JobOptions::new().with_attempts(2));
        let now = Utc::now();

        lane.next_job("w", now).expect("first attempt");
        lane.fail(job.id, "w", "smtp down".into(), now);
        assert_eq!(lane.count(JobState::Waiting), 1);

        lane.next_job("w", now).expect("second attempt");
        lane.fail(job.id, "w", "smtp down".into(), now);

        let failed = lane.fetch(job.id).expect("job retained");
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.attempts_made, 2);
        assert_eq!(failed.failed_reason.as_deref(), Some("smtp down"));

        let kinds = drain_events(&mut rx);
        assert_eq!(kinds.iter().filter(|k| **k == "failed").count(), 1);
        assert_eq!(kinds.last(), Some(&"failed"));
    }

    #[test]
    fn backoff_moves_failed_attempt_to_delayed() {
        let (mut lane, _rx) = lane(BrokerConfig::default());
        let job = lane.submit(json!({}), JobOptions::new().with_attempts(3).with_backoff_ms(500));
        let now = Utc::now();
        lane.next_job("w", now);
        lane.fail(job.id, "w", "boom".into(), now);

        assert_eq!(lane.fetch(job.id).map(|j| j.state), Some(JobState::Delayed));
        assert!(lane.next_job("w", now).is_none());
        assert!(lane.next_job("w", now + chrono::Duration::seconds(1)).is_some());
    }

    #[test]
    fn completion_requires_matching_lease() {
        let (mut lane, _rx) = lane(BrokerConfig::default());
        let job = lane.submit(json!({}), JobOptions::default());
        let now = Utc::now();
        lane.next_job("w1", now);

        lane.complete(job.id, "w2", JobResult::new("wrong worker"), now);
        assert_eq!(lane.count(JobState::Active), 1);

        lane.complete(job.id, "w1", JobResult::new("sent"), now);
        let done = lane.fetch(job.id).expect("job retained");
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.return_value, Some(JobResult::new("sent")));
    }

    #[test]
    fn expired_lease_stalls_then_fails() {
        let config = BrokerConfig::default()
            .with_default_job_timeout(Duration::from_millis(10))
            .with_stall_policy(Duration::ZERO, 1);
        let (mut lane, mut rx) = lane(config);
        let job = lane.submit(json!({}), JobOptions::default());
        let now = Utc::now();
        let later = now + chrono::Duration::seconds(1);

        lane.next_job("w", now);
        lane.expire_leases(later);
        let requeued = lane.fetch(job.id).expect("job retained");
        assert_eq!(requeued.state, JobState::Waiting);
        assert_eq!(requeued.stalled_count, 1);

        lane.next_job("w", later);
        lane.expire_leases(later + chrono::Duration::seconds(1));
        let failed = lane.fetch(job.id).expect("job retained");
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.failed_reason.as_deref(), Some(STALLED_TOO_OFTEN));

        let kinds = drain_events(&mut rx);
        assert_eq!(kinds.iter().filter(|k| **k == "stalled").count(), 2);

        // The first worker reporting late is ignored
        lane.complete(job.id, "w", JobResult::new("late"), later);
        assert_eq!(lane.count(JobState::Failed), 1);
    }

    #[test]
    fn drain_discards_only_pending_jobs() {
        let (mut lane, _rx) = lane(BrokerConfig::default());
        let running = lane.submit(json!(1), JobOptions::default());
        lane.next_job("w", Utc::now());
        lane.submit(json!(2), JobOptions::default());
        lane.submit(json!(3), JobOptions::new().with_delay_ms(60_000));

        assert_eq!(lane.drain(), 2);
        assert_eq!(lane.count(JobState::Waiting), 0);
        assert_eq!(lane.count(JobState::Delayed), 0);
        assert!(lane.fetch(running.id).is_some());
    }

    #[test]
    fn retry_only_accepts_failed_jobs() {
        let (mut lane, _rx) = lane(BrokerConfig::default());
        let job = lane.submit(json!({}), JobOptions::default());
        assert!(lane.retry(job.id).is_err());

        let now = Utc::now();
        lane.next_job("w", now);
        lane.fail(job.id, "w", "boom".into(), now);
        let retried = lane.retry(job.id).expect("failed job is retryable");
        assert_eq!(retried.state, JobState::Waiting);
        assert_eq!(retried.attempts_made, 0);
        assert!(retried.failed_reason.is_none());

        assert!(lane.retry(JobId::new()).is_err());
    }

    #[test]
    fn remove_missing_job_reports_false() {
        let (mut lane, _rx) = lane(BrokerConfig::default());
        let job = lane.submit(json!({}), JobOptions::default());
        assert!(lane.remove(job.id));
        assert!(!lane.remove(job.id));
        assert!(lane.next_job("w", Utc::now()).is_none());
    }

    #[test]
    fn finished_jobs_beyond_retention_are_pruned() {
        let (mut lane, _rx) = lane(BrokerConfig::default().with_finished_retention(2));
        let now = Utc::now();
        let ids: Vec<JobId> = (0..3)
            .map(|i| {
                let job = lane.submit(json!(i), JobOptions::default());
                lane.next_job("w", now);
                let finished = now + chrono::Duration::seconds(i);
                lane.complete(job.id, "w", JobResult::new("sent"), finished);
                job.id
            })
            .collect();

        assert_eq!(lane.count(JobState::Completed), 2);
        assert!(lane.fetch(ids[0]).is_none());
        assert!(lane.fetch(ids[2]).is_some());

        // Failed jobs share the same budget
        let job = lane.submit(json!({}), JobOptions::default());
        lane.next_job("w", now);
        lane.fail(job.id, "w", "boom".into(), now + chrono::Duration::seconds(10));
        assert_eq!(lane.count(JobState::Completed), 1);
        assert_eq!(lane.count(JobState::Failed), 1);
    }

    #[test]
    fn huge_timeout_and_backoff_saturate() {
        let (mut lane, _rx) = lane(BrokerConfig::default());
        let options = JobOptions::new()
            .with_attempts(2)
            .with_timeout_ms(u64::MAX)
            .with_backoff_ms(u64::MAX);
        let job = lane.submit(json!({}), options);
        let now = Utc::now();

        assert!(lane.next_job("w", now).is_some());
        lane.expire_leases(now + chrono::Duration::days(3650));
        assert_eq!(lane.count(JobState::Active), 1);

        lane.fail(job.id, "w", "boom".into(), now);
        let delayed = lane.fetch(job.id).expect("job retained");
        assert_eq!(delayed.state, JobState::Delayed);
        assert_eq!(delayed.delay_until, Some(DateTime::<Utc>::MAX_UTC));
    }
}
