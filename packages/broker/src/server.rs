//! Broker server actor owning every lane of one endpoint.

use std::collections::HashMap;

use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast;

use crate::config::BrokerConfig;
use crate::lane::{LaneActor, LaneState};
use crate::messages::{BrokerMessage, LaneHandle};

/// Capacity of each lane's event channel.
const EVENT_CAPACITY: usize = 1024;

/// State for the broker server.
pub struct BrokerState {
    /// Open lanes by name.
    pub lanes: HashMap<String, LaneHandle>,
    config: BrokerConfig,
}

async fn spawn_lane(
    myself: &ActorRef<BrokerMessage>,
    state: &mut BrokerState,
    name: &str,
) -> Result<LaneHandle, ActorProcessingErr> {
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let lane_state = LaneState::new(name, state.config.clone(), events.clone());

    let (actor, _handle) = Actor::spawn_linked(
        Some(format!("{}/{}", state.config.broker_name(), name)),
        LaneActor,
        lane_state,
        myself.get_cell(),
    )
    .await
    .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn lane: {}", e)))?;

    let handle = LaneHandle {
        name: name.to_string(),
        actor,
        events,
    };
    state.lanes.insert(name.to_string(), handle.clone());
    Ok(handle)
}

/// Broker server actor.
pub struct BrokerServer;

impl Actor for BrokerServer {
    type Msg = BrokerMessage;
    type State = BrokerState;
    type Arguments = BrokerConfig;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting broker on {}", args.endpoint());
        Ok(BrokerState {
            lanes: HashMap::new(),
            config: args,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            BrokerMessage::OpenLane { name, reply } => {
                if let Some(handle) = state.lanes.get(&name) {
                    let _ = reply.send(Ok(handle.clone()));
                    return Ok(());
                }

                match spawn_lane(&myself, state, &name).await {
                    Ok(handle) => {
                        let _ = reply.send(Ok(handle));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(format!("Failed to open lane '{}': {}", name, e)));
                    }
                }
            }

            BrokerMessage::ListLanes { reply } => {
                let mut names: Vec<String> = state.lanes.keys().cloned().collect();
                names.sort();
                let _ = reply.send(names);
            }

            BrokerMessage::Shutdown => {
                tracing::info!("Shutting down broker on {}", state.config.endpoint());
                for lane in state.lanes.values() {
                    lane.actor.stop(None);
                }
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                state.lanes.retain(|_, lane| lane.actor.get_id() != cell.get_id());
                tracing::debug!(
                    "Lane actor {} terminated: {:?}",
                    cell.get_name().unwrap_or_default(),
                    reason
                );
            }
            SupervisionEvent::ActorFailed(cell, error) => {
                state.lanes.retain(|_, lane| lane.actor.get_id() != cell.get_id());
                tracing::error!(
                    "Lane actor {} failed: {}",
                    cell.get_name().unwrap_or_default(),
                    error
                );
            }
            _ => {}
        }
        Ok(())
    }
}

/// Start a broker server for the configured endpoint.
///
/// Fails if a broker is already running on the same endpoint.
pub async fn start_broker(
    config: BrokerConfig,
) -> Result<(ActorRef<BrokerMessage>, tokio::task::JoinHandle<()>), ractor::SpawnErr> {
    let name = config.broker_name();
    let (actor, handle) = Actor::spawn(Some(name), BrokerServer, config).await?;

    Ok((actor, handle))
}
