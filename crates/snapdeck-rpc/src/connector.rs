//! Establishing the byte stream a [`Session`](crate::Session) runs over.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::TransportError;

/// Deadline for establishing a connection
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens duplex streams to a `host:port` endpoint.
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    fn connect(&self, host: &str, port: u16) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP, as spoken by the Snapcast control port
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Connect with a deadline, mapping every failure to `DialFailed`.
///
/// # Errors
///
/// Returns `TransportError::DialFailed` if the connection is refused, fails,
/// or does not complete within `timeout`.
pub async fn dial<C: Connector>(
    connector: &C,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<C::Stream, TransportError> {
    match tokio::time::timeout(timeout, connector.connect(host, port)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(TransportError::DialFailed(e)),
        Err(_) => Err(TransportError::DialFailed(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("no connection to {host}:{port} after {timeout:?}"),
        ))),
    }
}
