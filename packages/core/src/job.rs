//! Job domain types for units of background work.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority level for dispatch order within a queue.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Broker-owned lifecycle state of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be picked up by a worker.
    #[default]
    Waiting,
    /// Leased by a worker and being processed.
    Active,
    /// Finished successfully.
    Completed,
    /// Finished with an error after exhausting its attempts.
    Failed,
    /// Lost its worker. Transient: the broker re-queues or fails it.
    Stalled,
    /// Scheduled to become waiting at a later time.
    Delayed,
}

impl JobState {
    /// States reported in a queue status snapshot.
    pub const COUNTED: [JobState; 5] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
        JobState::Delayed,
    ];

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Check if the job is still waiting for a worker (now or later).
    pub fn is_pending(&self) -> bool {
        matches!(self, JobState::Waiting | JobState::Delayed)
    }

    /// Get a simple state string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Stalled => "stalled",
            JobState::Delayed => "delayed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling hints supplied by the producer.
///
/// Queue services pass these through untouched; only the broker reads them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Dispatch priority.
    pub priority: Priority,
    /// Delay before the job becomes eligible for dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    /// Total attempts before the job is marked failed. Defaults to one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    /// Fixed delay between a failed attempt and the next one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
    /// Per-job execution timeout, overriding the broker default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dispatch priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Delay dispatch by the given number of milliseconds.
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    /// Set the total number of attempts.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Set the fixed backoff between attempts.
    pub fn with_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.backoff_ms = Some(backoff_ms);
        self
    }

    /// Set the execution timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Total attempts allowed, never less than one.
    pub fn max_attempts(&self) -> u32 {
        self.attempts.unwrap_or(1).max(1)
    }

    /// Check that every duration is at most [`MAX_OPTION_MS`].
    pub fn validate(&self) -> Result<(), String> {
        let durations = [
            ("delay_ms", self.delay_ms),
            ("backoff_ms", self.backoff_ms),
            ("timeout_ms", self.timeout_ms),
        ];
        match durations
            .into_iter()
            .find(|(_, ms)| ms.is_some_and(|ms| ms > MAX_OPTION_MS))
        {
            Some((name, Some(ms))) => Err(format!(
                "{} of {} exceeds the maximum of {}",
                name, ms, MAX_OPTION_MS
            )),
            _ => Ok(()),
        }
    }
}

/// Largest delay, backoff or timeout accepted in [`JobOptions`] (one year).
pub const MAX_OPTION_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// `at` plus `ms` milliseconds, saturating at the latest representable time.
pub fn after_ms(at: DateTime<Utc>, ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(Duration::try_milliseconds)
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Result of a successfully processed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Human-readable summary of the result.
    pub summary: String,
    /// Optional structured output data as JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl JobResult {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            output: None,
        }
    }

    pub fn with_output(summary: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            summary: summary.into(),
            output: Some(output),
        }
    }
}

/// A job is one unit of asynchronous work held by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier within its queue, assigned on submission.
    pub id: JobId,
    /// Name of the queue this job belongs to.
    pub queue: String,
    /// Producer data as JSON.
    pub payload: serde_json::Value,
    /// Scheduling hints.
    #[serde(default)]
    pub options: JobOptions,
    /// Current broker state.
    pub state: JobState,
    /// Number of times a worker has picked this job up.
    #[serde(default)]
    pub attempts_made: u32,
    /// Number of times the job lost its worker.
    #[serde(default)]
    pub stalled_count: u32,
    /// Error text of the last failed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    /// Result returned by the processor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<JobResult>,
    /// When the job was submitted.
    pub created_at: DateTime<Utc>,
    /// When the current or last attempt started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// When a delayed job becomes eligible for dispatch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_until: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new job as the broker does on submission.
    ///
    /// Jobs with a delay start out `Delayed`, everything else `Waiting`.
    pub fn new(queue: impl Into<String>, payload: serde_json::Value, options: JobOptions) -> Self {
        let now = Utc::now();
        let delay_until = options
            .delay_ms
            .filter(|ms| *ms > 0)
            .map(|ms| after_ms(now, ms));
        Self {
            id: JobId::new(),
            queue: queue.into(),
            payload,
            options,
            state: if delay_until.is_some() {
                JobState::Delayed
            } else {
                JobState::Waiting
            },
            attempts_made: 0,
            stalled_count: 0,
            failed_reason: None,
            return_value: None,
            created_at: now,
            processed_at: None,
            finished_at: None,
            delay_until,
        }
    }

    /// Deserialize the payload into the producer's type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Check whether another attempt is allowed after a failure.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts_made < self.options.max_attempts()
    }

    /// Check whether a delayed job is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.delay_until.is_none_or(|at| at <= now)
    }
}
