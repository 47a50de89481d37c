//! Registry of known Snapcast servers.
//!
//! Devices enter the registry through discovery announcements. Each new name
//! gets a [`Device`] and a supervisor task; repeated announcements for a
//! known name are ignored. The registry is created at startup and drained at
//! shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use snapdeck_rpc::{Connector, TcpConnector};
use snapdeck_types::DeviceSnapshot;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerEntry;
use crate::device::{Device, DeviceAddr};
use crate::supervisor::{self, SupervisorConfig};

/// A Snapcast server announcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl From<ServerEntry> for Discovered {
    fn from(entry: ServerEntry) -> Self {
        Self {
            name: entry.name,
            host: entry.host,
            port: entry.port,
        }
    }
}

pub struct Registry<C: Connector = TcpConnector> {
    devices: RwLock<HashMap<String, Arc<Device>>>,
    supervisors: Mutex<Vec<JoinHandle<()>>>,
    connector: Arc<C>,
    config: SupervisorConfig,
    cancel: CancellationToken,
}

impl<C: Connector> Registry<C> {
    #[must_use]
    pub fn new(connector: C, config: SupervisorConfig, cancel: CancellationToken) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            supervisors: Mutex::new(Vec::new()),
            connector: Arc::new(connector),
            config,
            cancel,
        }
    }

    /// The token that stops every task this registry started
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Register an announced server. Returns `false` if the name is already
    /// known or the registry is shutting down.
    pub async fn discovered(&self, found: Discovered) -> bool {
        let mut devices = self.devices.write().await;

        if devices.contains_key(&found.name) {
            debug!("Ignoring repeated announcement for {}", found.name);
            return false;
        }
        if self.cancel.is_cancelled() {
            debug!("Ignoring announcement for {} during shutdown", found.name);
            return false;
        }

        let device = Arc::new(Device::new(DeviceAddr {
            name: found.name.clone(),
            host: found.host,
            port: found.port,
        }));
        info!(
            "Discovered Snapcast server {} at {}",
            found.name,
            device.addr()
        );

        let handle = tokio::spawn(supervisor::run(
            Arc::clone(&device),
            Arc::clone(&self.connector),
            self.config,
            self.cancel.clone(),
        ));
        self.supervisors.lock().await.push(handle);

        devices.insert(found.name, device);
        true
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.read().await.get(name).cloned()
    }

    pub async fn devices(&self) -> Vec<Arc<Device>> {
        let mut devices: Vec<_> = self.devices.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.name().cmp(b.name()));
        devices
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// Devices with a live session right now
    pub async fn connected(&self) -> Vec<Arc<Device>> {
        let mut connected = Vec::new();
        for device in self.devices().await {
            if device.is_connected().await {
                connected.push(device);
            }
        }
        connected
    }

    /// State of every known device, sorted by name
    pub async fn snapshot(&self) -> Vec<DeviceSnapshot> {
        let mut snapshots = Vec::new();
        for device in self.devices().await {
            snapshots.push(device.snapshot().await);
        }
        snapshots
    }

    /// Start one background sync per connected device. Returns how many
    /// were started.
    pub async fn resync_all(&self) -> usize {
        let connected = self.connected().await;
        for device in &connected {
            let device = Arc::clone(device);
            tokio::spawn(async move {
                let _ = device.sync().await;
            });
        }
        connected.len()
    }

    /// Cancel every supervisor and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let handles = std::mem::take(&mut *self.supervisors.lock().await);
        info!("Stopping {} supervisors", handles.len());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Supervisor task failed: {}", e);
            }
        }

        self.devices.write().await.clear();
    }
}

/// Feed discovery announcements into the registry until cancelled or the
/// sender side is dropped.
pub fn spawn_discovery_listener<C: Connector>(
    registry: Arc<Registry<C>>,
    mut announcements: mpsc::Receiver<Discovered>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let cancel = registry.cancel_token().clone();
        loop {
            let found = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                found = announcements.recv() => found,
            };
            let Some(found) = found else {
                debug!("Discovery channel closed");
                break;
            };
            registry.discovered(found).await;
        }
    })
}

/// Resync every connected device each `interval` until `cancel` fires.
pub fn spawn_periodic_resync<C: Connector>(
    registry: Arc<Registry<C>>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let count = registry.resync_all().await;
                    debug!("Synchronizing {} Snapcast servers", count);
                }
            }
        }
    })
}
