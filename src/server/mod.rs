// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;
use tracing::{info, warn};

mod context;
mod initialization;
mod spawner;

pub use context::ServerContext;
pub use initialization::LocalFsStatsProvider;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Initialize the control plane state.
    let mut server_context = initialization::setup(config).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut server_context).await?;

    // 3. Wait for a shutdown signal, then drain.
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received; stopping background tasks");
    let _ = server_context.shutdown_tx.send(());

    while let Some(result) = server_context.background_tasks.join_next().await {
        if let Err(e) = result {
            warn!("background task ended abnormally during shutdown: {e}");
        }
    }
    info!("shutdown complete");
    Ok(())
}
