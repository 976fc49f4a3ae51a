//! Signal handling for graceful shutdown and config reload.

use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

use crate::config::ConfigLoader;
use crate::state::AppState;

/// Completes when SIGTERM or SIGINT (Ctrl+C) is received, then flips the
/// shared shutdown flag so background processors stop as well.
pub async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "Failed to install shutdown signal handlers");
            std::future::pending::<()>().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
    shutdown_tx.send_replace(true);
}

/// Spawns a task that listens for SIGHUP and reloads tenants, menus and
/// policies. It exits when the shutdown flag flips.
pub fn spawn_config_reload_handler(
    state: AppState,
    config_loader: Arc<ConfigLoader>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(sighup) => sighup,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGHUP handler, reload disabled");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    tracing::info!("Received SIGHUP, reloading configuration");
                    match config_loader.reload() {
                        Ok(loaded) => {
                            let tenant_count = loaded.tenants.len();
                            state.tenants.replace(loaded.tenants);
                            state.policy.replace(loaded.policy);
                            if let Some(catalog) = &state.menus {
                                for (tenant_id, menu) in loaded.menus {
                                    catalog.replace_menu(tenant_id, menu);
                                }
                            }
                            tracing::info!(tenants = tenant_count, "Configuration reloaded successfully");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload configuration, keeping the previous one");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::debug!("Config reload handler shutting down");
                        break;
                    }
                }
            }
        }
    });
}
