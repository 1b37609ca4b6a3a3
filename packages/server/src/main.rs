mod init;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let app = init::init_job_queue().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    init::shutdown(app).await
}
