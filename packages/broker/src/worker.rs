//! Worker actor for executing jobs from a lane.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use queue_core::{Job, JobProcessor};
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::config::BrokerConfig;
use crate::lane::job_timeout;
use crate::messages::{LaneMessage, WorkerMessage};

/// State for the worker actor.
pub struct WorkerState {
    /// Unique worker ID.
    pub worker_id: String,
    /// Current job being processed.
    pub current_job: Option<Job>,
    /// Lane actor reference.
    pub lane: ActorRef<LaneMessage>,
    /// Business logic for this lane.
    pub processor: Arc<dyn JobProcessor>,
    config: BrokerConfig,
}

impl WorkerState {
    /// Check if the worker is idle.
    pub fn is_idle(&self) -> bool {
        self.current_job.is_none()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub lane: ActorRef<LaneMessage>,
    pub processor: Arc<dyn JobProcessor>,
    pub config: BrokerConfig,
}

/// Worker actor that executes jobs.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);

        // Start the poll loop
        let interval = args.config.poll_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if myself.send_message(WorkerMessage::Poll).is_err() {
                    break;
                }
            }
        });

        Ok(WorkerState {
            worker_id: args.worker_id,
            current_job: None,
            lane: args.lane,
            processor: args.processor,
            config: args.config,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                if !state.is_idle() {
                    return Ok(());
                }

                let result = ractor::rpc::call(
                    &state.lane,
                    |reply| LaneMessage::RequestJob {
                        worker_id: state.worker_id.clone(),
                        reply,
                    },
                    Some(Duration::from_secs(5)),
                )
                .await;
                match result {
                    Ok(ractor::rpc::CallResult::Success(Some(job))) => {
                        // Busy from the moment the lease is granted
                        state.current_job = Some(job.clone());
                        myself.send_message(WorkerMessage::ProcessJob { job: Box::new(job) })?;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // Lane is gone; nothing left to work on
                        tracing::warn!("Worker {} lost its lane: {}", state.worker_id, e);
                        myself.stop(Some("lane unavailable".to_string()));
                    }
                }
            }

            WorkerMessage::ProcessJob { job } => {
                let job = *job;
                let job_id = job.id;
                let timeout = job_timeout(&state.config, &job);
                state.current_job = Some(job.clone());

                tracing::debug!("Worker {} processing job {}", state.worker_id, job_id);
                let processor = state.processor.clone();
                let run = AssertUnwindSafe(async { processor.process(&job).await }).catch_unwind();
                let result = tokio::time::timeout(timeout, run).await;

                let message = match result {
                    Ok(Ok(Ok(job_result))) => LaneMessage::JobCompleted {
                        job_id,
                        worker_id: state.worker_id.clone(),
                        result: job_result,
                    },
                    Ok(Ok(Err(error))) => LaneMessage::JobFailed {
                        job_id,
                        worker_id: state.worker_id.clone(),
                        error,
                    },
                    Ok(Err(panic)) => {
                        let error = format!("Processor panicked: {}", panic_message(panic.as_ref()));
                        tracing::error!("Worker {} job {}: {}", state.worker_id, job_id, error);
                        LaneMessage::JobFailed {
                            job_id,
                            worker_id: state.worker_id.clone(),
                            error,
                        }
                    }
                    Err(_) => LaneMessage::JobFailed {
                        job_id,
                        worker_id: state.worker_id.clone(),
                        error: "Job timed out".into(),
                    },
                };
                state.current_job = None;
                state.lane.send_message(message)?;
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!("Worker {} stopped", state.worker_id);
        Ok(())
    }
}
