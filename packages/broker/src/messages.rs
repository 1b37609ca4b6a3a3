//! Message types for actor communication.

use queue_core::{ChannelEvent, Job, JobId, JobOptions, JobResult, JobState};
use ractor::{ActorRef, RpcReplyPort};
use tokio::sync::broadcast;

/// Messages for a lane actor.
#[derive(Debug)]
pub enum LaneMessage {
    /// Enqueue a new job. Out-of-range options are rejected.
    Submit {
        payload: serde_json::Value,
        options: JobOptions,
        reply: RpcReplyPort<Result<Job, String>>,
    },

    /// Get a job by ID.
    Fetch {
        job_id: JobId,
        reply: RpcReplyPort<Option<Job>>,
    },

    /// Remove a job. Replies whether it existed.
    Remove {
        job_id: JobId,
        reply: RpcReplyPort<bool>,
    },

    /// Pause dispatch.
    Pause { reply: RpcReplyPort<()> },

    /// Resume dispatch.
    Resume { reply: RpcReplyPort<()> },

    /// Discard waiting and delayed jobs. Replies with the number removed.
    Drain { reply: RpcReplyPort<u64> },

    /// Count jobs in a state.
    Count {
        state: JobState,
        reply: RpcReplyPort<u64>,
    },

    /// List jobs in a state.
    List {
        state: JobState,
        reply: RpcReplyPort<Vec<Job>>,
    },

    /// Move a failed job back to waiting.
    Retry {
        job_id: JobId,
        reply: RpcReplyPort<Result<Job, String>>,
    },

    /// Request the next job for a worker.
    RequestJob {
        worker_id: String,
        reply: RpcReplyPort<Option<Job>>,
    },

    /// Report job completion.
    JobCompleted {
        job_id: JobId,
        worker_id: String,
        result: JobResult,
    },

    /// Report job failure.
    JobFailed {
        job_id: JobId,
        worker_id: String,
        error: String,
    },

    /// Periodic housekeeping: promote delayed jobs, expire leases.
    Tick,
}

/// Messages for a worker actor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Ask the lane for work if idle.
    Poll,

    /// Run a job handed out by the lane.
    ProcessJob { job: Box<Job> },
}

/// Handle to an open lane.
#[derive(Debug, Clone)]
pub struct LaneHandle {
    /// Lane name.
    pub name: String,
    /// Lane actor.
    pub actor: ActorRef<LaneMessage>,
    /// Lane event stream.
    pub events: broadcast::Sender<ChannelEvent>,
}

/// Messages for the broker server.
#[derive(Debug)]
pub enum BrokerMessage {
    /// Open a lane, creating it on first use.
    OpenLane {
        name: String,
        reply: RpcReplyPort<Result<LaneHandle, String>>,
    },

    /// List lane names.
    ListLanes { reply: RpcReplyPort<Vec<String>> },

    /// Stop every lane and the server.
    Shutdown,
}
