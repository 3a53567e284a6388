// src/server/spawner.rs

//! Spawns all of the server's long-running background tasks.

use super::context::ServerContext;
use anyhow::Result;
use tracing::info;

/// Spawns all critical background tasks into the provided JoinSet.
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let server_state = &ctx.state;
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- Master task loop (the single writer of cluster state) ---
    let master = server_state.master.clone();
    let shutdown_rx_master = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        master.run(shutdown_rx_master).await;
        Ok(())
    });

    // --- Cluster-info collector ---
    let info_service = server_state.info.clone();
    let shutdown_rx_info = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        info_service.run(shutdown_rx_info).await;
        Ok(())
    });

    // --- Applied-state watcher: feeds node-join triggers to the collector ---
    let info_service = server_state.info.clone();
    let mut state_rx = server_state.master.subscribe_state();
    let mut shutdown_rx_watch = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        loop {
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    let state = state_rx.borrow_and_update().clone();
                    info_service.on_cluster_state(&state);
                }
                _ = shutdown_rx_watch.recv() => return Ok(()),
            }
        }
    });

    // --- Reconciliation driver: desired balances become master tasks ---
    let allocator = server_state.allocator.clone();
    let shutdown_rx_reconcile = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        allocator.run_reconciliations(shutdown_rx_reconcile).await;
        Ok(())
    });

    info!("all background tasks spawned");
    Ok(())
}
