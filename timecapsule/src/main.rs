// Time capsule daemon
// Entry point: wires the services, starts the background loops and waits
// for Ctrl-C.

use timecapsule::app::{data_dir_from_env, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "timecapsule=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting time capsule v{}", env!("CARGO_PKG_VERSION"));

    let state = AppState::build(data_dir_from_env()).await?;
    state.prepare().await?;

    let tasks = state.start_background().await?;

    let mut fired = state.notifier.subscribe();
    let listener = tokio::spawn(async move {
        while let Ok(notification) = fired.recv().await {
            tracing::debug!("Delivered notification {}", notification.id);
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    listener.abort();
    state.shutdown(tasks).await?;

    Ok(())
}
