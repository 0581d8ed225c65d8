//! Demo queue server.
//!
//! Loads settings from `QUEUE_CONFIG` (JSON) or falls back to a single
//! in-memory connection, runs until Ctrl-C, then stops gracefully.

mod init;

use std::sync::Arc;

use queue_core::{QueueSettings, StopOptions};
use queue_runtime::ScheduleRegistry;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = QueueSettings::from_env()?;
    let registry = Arc::new(ScheduleRegistry::new());
    let queue = init::build_queue(settings, registry.clone())?;

    let mut events = queue.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if event.is_error() {
                tracing::warn!("{}", event.description());
            } else {
                tracing::debug!("{}", event.description());
            }
        }
    });

    init::init_job_queue(&queue).await?;
    tracing::info!(connections = ?queue.connections(), "Queue server running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    let stopped = queue.stop(StopOptions::default()).await;
    registry.shutdown().await?;
    stopped?;

    Ok(())
}
