//! Errors raised by queue operations.

use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Error type for queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The broker cannot be reached or dropped the request.
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The broker received the command but refused it.
    #[error("Broker rejected {command}: {reason}")]
    CommandRejected { command: &'static str, reason: String },

    /// The producer payload could not be encoded.
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// One queue failed during a fleet-wide operation.
    #[error("Queue '{queue}' failed: {source}")]
    PartialFanout {
        queue: String,
        #[source]
        source: Box<QueueError>,
    },
}

impl QueueError {
    /// Check whether this error (or the per-queue error it wraps) is a
    /// connectivity failure.
    pub fn is_unavailable(&self) -> bool {
        match self {
            QueueError::BrokerUnavailable(_) => true,
            QueueError::PartialFanout { source, .. } => source.is_unavailable(),
            _ => false,
        }
    }
}
