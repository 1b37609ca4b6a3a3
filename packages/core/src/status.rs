//! Per-queue status snapshots.

use serde::{Deserialize, Serialize};

use crate::JobState;

/// Job counts for one queue.
///
/// Each count is read with its own broker request, so under concurrent
/// activity the numbers may be momentarily inconsistent with each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStatus {
    /// Jobs ready for a worker.
    pub waiting: u64,
    /// Jobs leased by a worker.
    pub active: u64,
    /// Jobs that finished successfully.
    pub completed: u64,
    /// Jobs that exhausted their attempts.
    pub failed: u64,
    /// Jobs scheduled for later.
    pub delayed: u64,
}

impl QueueStatus {
    /// Jobs not yet finished (waiting + active + delayed).
    pub fn outstanding(&self) -> u64 {
        self.waiting + self.active + self.delayed
    }

    /// Total finished jobs.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Count for a single state. `Stalled` is never retained by the broker.
    pub fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Waiting => self.waiting,
            JobState::Active => self.active,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Delayed => self.delayed,
            JobState::Stalled => 0,
        }
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some((self.completed as f64 / total as f64) * 100.0)
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "waiting={} active={} completed={} failed={} delayed={}",
            self.waiting, self.active, self.completed, self.failed, self.delayed
        )
    }
}
