//! In-process job broker built on Ractor actors.
//!
//! The broker stores and dispatches jobs for named lanes; queue services
//! reach it only through [`BrokerChannel`], their `QueueChannel`.
//!
//! # Architecture
//!
//! - `BrokerServer` - one per endpoint, registered as `broker@host:port`
//! - `LaneActor` - owns one queue's jobs, leases and event stream
//! - `WorkerActor` - polls a lane and runs the queue's processor
//!
//! # Usage
//!
//! ```ignore
//! use broker::{BrokerChannel, BrokerConfig, start_broker};
//!
//! let config = BrokerConfig::from_env()?;
//! let (broker, handle) = start_broker(config.clone()).await?;
//! let channel = BrokerChannel::shared("mail", config);
//! channel.wait_until_ready().await?;
//! ```

mod channel;
mod config;
mod lane;
mod messages;
mod server;
mod worker;

pub use channel::BrokerChannel;
pub use config::{BrokerConfig, ConfigError, HOST_ENV, PORT_ENV};
pub use lane::{LaneActor, LaneState, STALLED_TOO_OFTEN};
pub use messages::{BrokerMessage, LaneHandle, LaneMessage, WorkerMessage};
pub use server::{BrokerServer, start_broker};
pub use worker::{WorkerActor, WorkerArgs};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
