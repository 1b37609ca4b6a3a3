use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use broker::{ActorRef, BrokerConfig, BrokerMessage, start_broker};
use queue_core::ChannelEvent;
use tokio::sync::broadcast;

static NEXT_PORT: AtomicU16 = AtomicU16::new(21_000);

/// A config on a fresh endpoint with fast timings.
pub fn test_config() -> BrokerConfig {
    BrokerConfig::new("127.0.0.1", NEXT_PORT.fetch_add(1, Ordering::Relaxed))
        .with_connect_retry(3, Duration::from_millis(20))
        .with_poll_interval(Duration::from_millis(10))
        .with_tick_interval(Duration::from_millis(20))
}

pub async fn setup_broker() -> Result<(BrokerConfig, ActorRef<BrokerMessage>), ractor::SpawnErr> {
    let config = test_config();
    let (broker, _handle) = start_broker(config.clone()).await?;
    Ok((config, broker))
}

/// Wait for the first event of the given kind.
pub async fn next_event(rx: &mut broadcast::Receiver<ChannelEvent>, kind: &str) -> Option<ChannelEvent> {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if event.kind() == kind => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait).await.ok().flatten()
}
