//! Daemon runtime: wires the registry, discovery and periodic resync
//! together and runs until interrupted.

use std::sync::Arc;

use snapdeck_rpc::TcpConnector;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::registry::{Registry, spawn_discovery_listener, spawn_periodic_resync};

const DISCOVERY_CHANNEL_CAPACITY: usize = 32;

/// Run the daemon until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the signal handler
/// cannot be installed.
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;

    let cancel = CancellationToken::new();
    let registry = Arc::new(Registry::new(
        TcpConnector,
        config.supervisor.to_supervisor_config(),
        cancel.clone(),
    ));

    let (announce, announcements) = mpsc::channel(DISCOVERY_CHANNEL_CAPACITY);
    let listener = spawn_discovery_listener(Arc::clone(&registry), announcements);
    let resync = spawn_periodic_resync(
        Arc::clone(&registry),
        config.resync_interval(),
        cancel.clone(),
    );

    info!("Configured with {} static servers", config.servers.len());
    for entry in config.servers {
        if announce.send(entry.into()).await.is_err() {
            warn!("Discovery listener exited early");
            break;
        }
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Interrupted, shutting down");
        }
        () = cancel.cancelled() => {}
    }

    drop(announce);
    registry.shutdown().await;

    for task in [listener, resync] {
        if let Err(e) = task.await {
            warn!("Background task failed: {}", e);
        }
    }

    Ok(())
}
