//! Error types for the snapdeck daemon.

/// Failure of a facade mutation against one Snapcast server
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// No live session is installed for the device
    #[error("Not connected to server")]
    NotConnected,

    /// The client is not a member of any known group, even after a resync
    #[error("Could not find group for client {0}")]
    UnknownClient(String),

    /// The request reached the transport layer and failed there or remotely
    #[error(transparent)]
    Rpc(#[from] snapdeck_rpc::Error),
}

impl CommandError {
    /// True when retrying after a reconnect could succeed
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        match self {
            CommandError::NotConnected => true,
            CommandError::UnknownClient(_) => false,
            CommandError::Rpc(e) => e.is_transport(),
        }
    }
}

/// Errors that can occur in the daemon
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration is present but unusable
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Facade command failed
    #[error("Command failed: {0}")]
    Command(#[from] CommandError),
}

/// Result type alias for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;
