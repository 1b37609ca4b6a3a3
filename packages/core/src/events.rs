//! Lifecycle events raised by a queue channel.

use serde::{Deserialize, Serialize};

use crate::{Job, JobId};

/// Events delivered out-of-band by a queue channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// The channel or broker reported an error not tied to a job.
    Error { queue: String, message: String },
    /// A job became eligible for dispatch.
    Waiting { job: Job },
    /// A worker picked a job up.
    Active { job: Job },
    /// A job finished successfully.
    Completed { job: Job },
    /// A job exhausted its attempts.
    Failed { job: Job, error: String },
    /// A job lost its worker.
    Stalled { job: Job },
}

impl ChannelEvent {
    /// Get the job carried by this event, if any.
    pub fn job(&self) -> Option<&Job> {
        match self {
            ChannelEvent::Error { .. } => None,
            ChannelEvent::Waiting { job }
            | ChannelEvent::Active { job }
            | ChannelEvent::Completed { job }
            | ChannelEvent::Failed { job, .. }
            | ChannelEvent::Stalled { job } => Some(job),
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        self.job().map(|job| job.id)
    }

    /// Short event name, matching the broker's event names.
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelEvent::Error { .. } => "error",
            ChannelEvent::Waiting { .. } => "waiting",
            ChannelEvent::Active { .. } => "active",
            ChannelEvent::Completed { .. } => "completed",
            ChannelEvent::Failed { .. } => "failed",
            ChannelEvent::Stalled { .. } => "stalled",
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            ChannelEvent::Error { queue, message } => {
                format!("Queue '{}' error: {}", queue, message)
            }
            ChannelEvent::Waiting { job } => format!("Job {} waiting", job.id),
            ChannelEvent::Active { job } => {
                format!("Job {} active (attempt {})", job.id, job.attempts_made)
            }
            ChannelEvent::Completed { job } => format!("Job {} completed", job.id),
            ChannelEvent::Failed { job, error } => format!("Job {} failed: {}", job.id, error),
            ChannelEvent::Stalled { job } => {
                format!("Job {} stalled ({} times)", job.id, job.stalled_count)
            }
        }
    }
}
