//! Error types for the snapdeck-rpc crate.
//!
//! Failures split into two families: transport failures, after which the
//! session is unusable, and remote errors, where the server answered but
//! rejected the request.

use crate::protocol::RpcError;
use crate::transport::CodecError;

/// The connection itself failed
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect: {0}")]
    DialFailed(#[source] std::io::Error),

    #[error("Request timeout")]
    Timeout,

    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

/// Unified error type for RPC operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Remote error: {0}")]
    Remote(#[from] RpcError),

    #[error("Decode error: {0}")]
    Decode(#[from] CodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Transport and decode failures both leave the session unusable
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Decode(_))
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Transport(TransportError::Timeout))
    }

    #[must_use]
    pub fn remote(&self) -> Option<&RpcError> {
        match self {
            Error::Remote(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_rpc_error() {
        let err: Error = RpcError::method_not_found().into();

        match &err {
            Error::Remote(e) => {
                assert_eq!(e.code, -32601);
                assert!(e.message.contains("not found"));
            }
            _ => panic!("Expected Remote error"),
        }
        assert!(!err.is_transport());
        assert_eq!(err.remote().map(|e| e.code), Some(-32601));
    }

    #[test]
    fn test_transport_classification() {
        let err: Error = TransportError::Timeout.into();
        assert!(err.is_transport());
        assert!(err.is_timeout());

        let err: Error = TransportError::ConnectionLost("reset".to_string()).into();
        assert!(err.is_transport());
        assert!(!err.is_timeout());

        let err: Error = CodecError::MessageTooLarge(1).into();
        assert!(err.is_transport());
    }

    #[test]
    fn test_json_error_is_not_transport() {
        let json_err = serde_json::from_str::<serde_json::Value>("}{").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
        assert!(!err.is_transport());
    }

    #[test]
    fn test_error_display() {
        let err: Error = TransportError::Timeout.into();
        assert_eq!(err.to_string(), "Request timeout");

        let err: Error = TransportError::ConnectionLost("peer closed".to_string()).into();
        assert_eq!(err.to_string(), "Connection lost: peer closed");

        let err: Error = RpcError::new(-32603, "Internal error").into();
        assert!(err.to_string().contains("-32603"));
        assert!(err.to_string().contains("Internal error"));
    }

    #[test]
    fn test_dial_failed_keeps_source() {
        use std::error::Error as _;

        let io_err =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        let err = TransportError::DialFailed(io_err);
        assert!(err.to_string().contains("connection refused"));
        assert!(err.source().is_some());
    }
}
