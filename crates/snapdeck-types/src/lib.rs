//! Shared types for snapdeck components.
//!
//! This crate provides the cached view of a Snapcast server that the daemon
//! keeps in sync and hands out to readers. All types are serializable so a
//! REST layer can pass snapshots through unchanged.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Default Snapcast JSON-RPC control port
pub const DEFAULT_CONTROL_PORT: u16 = 1705;

/// Deserialize a map that may be null or missing (both become an empty map)
fn deserialize_null_as_empty_map<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<Map<String, Value>> = Option::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// A Snapcast client (one playback endpoint)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub muted: bool,
    /// Volume percentage, 0-100
    pub volume: u8,
    pub name: String,
    /// Latency in milliseconds
    pub latency: u32,
    pub connected: bool,
    /// Id of the stream assigned to the client's group
    pub stream: String,
}

/// A Snapcast audio stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    /// Free-form status reported by the server ("playing", "idle", ...)
    pub status: String,
    /// Opaque metadata, passed through verbatim
    #[serde(default, deserialize_with = "deserialize_null_as_empty_map")]
    pub meta: Map<String, Value>,
}

/// Point-in-time copy of a server's cached clients and streams
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerState {
    pub clients: Vec<Client>,
    pub streams: Vec<Stream>,
}

impl ServerState {
    #[must_use]
    pub fn client(&self, id: &str) -> Option<&Client> {
        self.clients.iter().find(|c| c.id == id)
    }

    #[must_use]
    pub fn stream(&self, id: &str) -> Option<&Stream> {
        self.streams.iter().find(|s| s.id == id)
    }
}

/// Lifecycle of the connection to one server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: the supervisor has exited
    Stopped,
}

impl ConnectionState {
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Everything a reader needs to render one discovered server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub state: ConnectionState,
    #[serde(flatten)]
    pub server: ServerState,
}
