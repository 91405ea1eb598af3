// LifeNest - personal organizer core
// Entry point: opens the data directory and runs the background services

use lifenest::{config, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lifenest=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LifeNest v{}", env!("CARGO_PKG_VERSION"));

    let data_dir = config::default_data_dir();
    let state = AppState::initialize(data_dir).await?;

    let dispatcher = state.start_background_tasks().await?;

    tracing::info!("Running; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    dispatcher.abort();
    state.shutdown().await?;

    tracing::info!("Stopped");
    Ok(())
}
