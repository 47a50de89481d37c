//! One Snapcast server: its address, live session, cached state and the
//! commands that can be issued against it.
//!
//! The address never changes. The session slot and the cache each sit behind
//! their own lock, so reading the cache never waits on a reconnect.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};
use snapdeck_rpc::{Session, method};
use snapdeck_types::{Client, ConnectionState, DeviceSnapshot, ServerState, Stream};
use tokio::sync::{RwLock, watch};
use tracing::debug;

use crate::error::CommandError;
use crate::sync;

/// Where a Snapcast server can be reached
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddr {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl fmt::Display for DeviceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything learned from the last successful `Server.GetStatus`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceCache {
    pub clients: Vec<Client>,
    pub streams: Vec<Stream>,
    /// Client id to the id of the group it belongs to
    pub client_groups: HashMap<String, String>,
}

impl DeviceCache {
    #[must_use]
    pub fn group_of(&self, client_id: &str) -> Option<&str> {
        self.client_groups.get(client_id).map(String::as_str)
    }

    #[must_use]
    pub fn to_server_state(&self) -> ServerState {
        ServerState {
            clients: self.clients.clone(),
            streams: self.streams.clone(),
        }
    }
}

pub struct Device {
    addr: DeviceAddr,
    session: RwLock<Option<Arc<Session>>>,
    cache: RwLock<Arc<DeviceCache>>,
    state: watch::Sender<ConnectionState>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("addr", &self.addr)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Device {
    #[must_use]
    pub fn new(addr: DeviceAddr) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            addr,
            session: RwLock::new(None),
            cache: RwLock::new(Arc::new(DeviceCache::default())),
            state,
        }
    }

    #[must_use]
    pub fn addr(&self) -> &DeviceAddr {
        &self.addr
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.addr.name
    }

    // --- Session slot ---

    /// The installed session, if it is still usable
    pub async fn session(&self) -> Option<Arc<Session>> {
        self.session
            .read()
            .await
            .as_ref()
            .filter(|session| !session.is_closed())
            .cloned()
    }

    pub async fn is_connected(&self) -> bool {
        self.session().await.is_some()
    }

    pub(crate) async fn install_session(&self, session: Arc<Session>) {
        *self.session.write().await = Some(session);
    }

    pub(crate) async fn clear_session(&self) -> Option<Arc<Session>> {
        self.session.write().await.take()
    }

    // --- Connection state ---

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!("[{}] {} -> {}", self.addr.name, current, state);
            *current = state;
            true
        });
    }

    // --- Cache ---

    pub async fn cache(&self) -> Arc<DeviceCache> {
        self.cache.read().await.clone()
    }

    /// Replace the whole cache in one write
    pub(crate) async fn publish(&self, cache: DeviceCache) {
        *self.cache.write().await = Arc::new(cache);
    }

    /// Clients and streams as last synchronized
    pub async fn state(&self) -> ServerState {
        self.cache().await.to_server_state()
    }

    pub async fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            name: self.addr.name.clone(),
            host: self.addr.host.clone(),
            port: self.addr.port,
            state: self.connection_state(),
            server: self.state().await,
        }
    }

    /// Refresh the cache from the server.
    ///
    /// # Errors
    ///
    /// Returns the request failure; the cache is left untouched in that case.
    pub async fn sync(&self) -> Result<(), CommandError> {
        sync::sync(self).await
    }

    // --- Commands ---

    /// Mute or unmute a client.
    ///
    /// # Errors
    ///
    /// `NotConnected` without a live session, `Rpc` if the request fails.
    pub async fn set_muted(&self, client_id: &str, muted: bool) -> Result<(), CommandError> {
        self.command(
            method::CLIENT_SET_VOLUME,
            json!({"id": client_id, "volume": {"muted": muted}}),
        )
        .await
    }

    /// Set a client's volume; values above 100 are clamped.
    ///
    /// # Errors
    ///
    /// `NotConnected` without a live session, `Rpc` if the request fails.
    pub async fn set_volume(&self, client_id: &str, percent: u8) -> Result<(), CommandError> {
        self.command(
            method::CLIENT_SET_VOLUME,
            json!({"id": client_id, "volume": {"percent": percent.min(100)}}),
        )
        .await
    }

    /// Set a client's latency in milliseconds.
    ///
    /// # Errors
    ///
    /// `NotConnected` without a live session, `Rpc` if the request fails.
    pub async fn set_latency(&self, client_id: &str, latency: u32) -> Result<(), CommandError> {
        self.command(
            method::CLIENT_SET_LATENCY,
            json!({"id": client_id, "latency": latency}),
        )
        .await
    }

    /// Switch the group containing `client_id` to `stream_id`.
    ///
    /// Snapcast routes streams per group, so this affects every client in
    /// the same group.
    ///
    /// # Errors
    ///
    /// `NotConnected` without a live session, `UnknownClient` when the client
    /// is in no group even after a resync, `Rpc` if a request fails.
    pub async fn set_stream(&self, client_id: &str, stream_id: &str) -> Result<(), CommandError> {
        if self.session().await.is_none() {
            return Err(CommandError::NotConnected);
        }

        let group_id = match self.group_of(client_id).await {
            Some(group_id) => group_id,
            None => {
                debug!(
                    "[{}] No group cached for client {}, resyncing",
                    self.addr.name, client_id
                );
                self.sync().await?;
                self.group_of(client_id)
                    .await
                    .ok_or_else(|| CommandError::UnknownClient(client_id.to_string()))?
            }
        };

        self.command(
            method::GROUP_SET_STREAM,
            json!({"id": group_id, "stream_id": stream_id}),
        )
        .await
    }

    /// Remove a client from the server's client list.
    ///
    /// # Errors
    ///
    /// `NotConnected` without a live session, `Rpc` if the request fails.
    pub async fn delete_client(&self, client_id: &str) -> Result<(), CommandError> {
        self.command(method::SERVER_DELETE_CLIENT, json!({"id": client_id}))
            .await
    }

    async fn group_of(&self, client_id: &str) -> Option<String> {
        self.cache().await.group_of(client_id).map(str::to_string)
    }

    async fn command(&self, method: &str, params: Value) -> Result<(), CommandError> {
        let session = self.session().await.ok_or(CommandError::NotConnected)?;
        session.request(method, Some(params)).await?;

        // A failed refresh is logged by sync and keeps the previous cache
        let _ = self.sync().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn living_room() -> DeviceAddr {
        DeviceAddr {
            name: "living-room".to_string(),
            host: "192.168.1.10".to_string(),
            port: 1705,
        }
    }

    #[test]
    fn test_addr_display() {
        assert_eq!(living_room().to_string(), "192.168.1.10:1705");
    }

    #[tokio::test]
    async fn test_new_device_is_disconnected_and_empty() {
        let device = Device::new(living_room());
        assert_eq!(device.name(), "living-room");
        assert_eq!(device.connection_state(), ConnectionState::Disconnected);
        assert!(!device.is_connected().await);
        assert_eq!(device.state().await, ServerState::default());
    }

    #[tokio::test]
    async fn test_commands_fail_fast_without_session() {
        let device = Device::new(living_room());

        assert!(matches!(
            device.set_muted("c1", true).await,
            Err(CommandError::NotConnected)
        ));
        assert!(matches!(
            device.set_volume("c1", 50).await,
            Err(CommandError::NotConnected)
        ));
        assert!(matches!(
            device.set_latency("c1", 10).await,
            Err(CommandError::NotConnected)
        ));
        assert!(matches!(
            device.set_stream("c1", "s1").await,
            Err(CommandError::NotConnected)
        ));
        assert!(matches!(
            device.delete_client("c1").await,
            Err(CommandError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_closed_session_counts_as_disconnected() {
        let device = Device::new(living_room());
        let (stream, _peer) = tokio::io::duplex(1024);
        let session = Arc::new(Session::new(stream, "test", snapdeck_rpc::SessionConfig::default()));

        device.install_session(session.clone()).await;
        assert!(device.is_connected().await);

        session.close();
        assert!(!device.is_connected().await);
        assert!(matches!(
            device.set_latency("c1", 10).await,
            Err(CommandError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_publish_replaces_cache() {
        let device = Device::new(living_room());
        let cache = DeviceCache {
            clients: vec![Client {
                id: "c1".to_string(),
                stream: "s1".to_string(),
                ..Client::default()
            }],
            streams: Vec::new(),
            client_groups: HashMap::from([("c1".to_string(), "g1".to_string())]),
        };

        device.publish(cache.clone()).await;
        assert_eq!(*device.cache().await, cache);
        assert_eq!(device.group_of("c1").await.as_deref(), Some("g1"));
        assert_eq!(device.state().await.clients.len(), 1);

        let snapshot = device.snapshot().await;
        assert_eq!(snapshot.name, "living-room");
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        assert_eq!(snapshot.server.clients[0].id, "c1");
    }

    #[tokio::test]
    async fn test_state_transitions_are_published() {
        let device = Device::new(living_room());
        let mut rx = device.subscribe();

        device.set_state(ConnectionState::Connecting);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connecting);

        // Same state again is not a transition
        device.set_state(ConnectionState::Connecting);
        assert!(!rx.has_changed().unwrap());
    }
}
