//! Server initialization for the job queue system.

use std::sync::Arc;

use broker::{ActorRef, BrokerChannel, BrokerConfig, BrokerMessage, start_broker};
use mail::{MAIL_QUEUE, TracingMailer, mail_queue};
use queue_core::QueueChannel;
use queues::QueueManager;
use tokio::task::JoinHandle;

/// Handles owned by the running application.
pub struct App {
    pub manager: Arc<QueueManager>,
    broker: ActorRef<BrokerMessage>,
    broker_handle: JoinHandle<()>,
}

/// Initialize the job queue system.
///
/// This should be called once at server startup.
pub async fn init_job_queue() -> Result<App, Box<dyn std::error::Error>> {
    tracing::info!("Initializing job queue system...");

    let config = BrokerConfig::from_env()?;
    tracing::info!("Using broker at {}", config.endpoint());

    let (broker, broker_handle) = start_broker(config.clone()).await?;

    let manager = Arc::new(QueueManager::new());

    let channel: Arc<dyn QueueChannel> = BrokerChannel::shared(MAIL_QUEUE, config);
    let mail = mail_queue(channel, Arc::new(TracingMailer));
    mail.on_job_failed(|job, error| {
        tracing::warn!("OTP mail {} gave up: {}", job.id, error);
        Ok(())
    });
    manager.start_and_register(mail).await?;

    for (name, status) in manager.get_global_status().await? {
        tracing::info!("Queue '{}': {}", name, status);
    }

    tracing::info!("Job queue system initialized");
    Ok(App {
        manager,
        broker,
        broker_handle,
    })
}

/// Stop every queue, then the broker.
pub async fn shutdown(app: App) -> Result<(), Box<dyn std::error::Error>> {
    let stopped = app.manager.stop_all().await;

    app.broker.send_message(BrokerMessage::Shutdown)?;
    app.broker_handle.await?;

    tracing::info!("Job queue system stopped");
    stopped.map_err(Into::into)
}
