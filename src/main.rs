use anyhow::Context;
use channel_hub::Settings;
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let config = Settings::new().context("loading configuration")?;
    info!("Configuration loaded successfully ({} environment)", config.environment);

    let (hub, addr) = channel_hub::start(&config)
        .await
        .with_context(|| format!("starting hub on {}", config.server.address()))?;
    info!(
        "Hub ready at ws://{}{} with channels {:?}",
        addr,
        config.server.endpoint,
        hub.router().channels().await
    );

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Shutting down with {} open connections", hub.connection_count().await);
    Ok(())
}
