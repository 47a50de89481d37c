//! Snapcast JSON-RPC plumbing for snapdeck.
//!
//! This crate provides the wire protocol types, the newline-delimited codec,
//! and the transport session used to talk to a Snapcast server's control
//! port.
//!
//! # Architecture
//!
//! - [`protocol`]: JSON-RPC 2.0 envelopes and the Snapcast method names
//! - [`transport`]: newline-delimited codec with an incomplete/invalid split
//! - [`session`]: one live connection, one request in flight at a time
//! - [`connector`]: dialing, with a deadline
//! - [`error`]: transport vs. remote error taxonomy
//!
//! # Example
//!
//! ```no_run
//! use snapdeck_rpc::{Session, SessionConfig, TcpConnector, dial, method};
//!
//! # async fn example() -> Result<(), snapdeck_rpc::Error> {
//! let stream = dial(&TcpConnector, "192.168.1.10", 1705, snapdeck_rpc::DEFAULT_DIAL_TIMEOUT).await?;
//! let session = Session::new(stream, "192.168.1.10:1705", SessionConfig::default());
//!
//! let status = session.request(method::SERVER_GET_STATUS, None).await?;
//! println!("{}", status["server"]["server"]["snapserver"]["version"]);
//! # Ok(())
//! # }
//! ```

pub mod connector;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use connector::{Connector, DEFAULT_DIAL_TIMEOUT, TcpConnector, dial};

pub use error::{Error, Result, TransportError};

pub use protocol::{
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION, METHOD_NOT_FOUND, Message,
    Notification, PARSE_ERROR, Request, Response, RpcError, method,
};

pub use session::{DEFAULT_IDLE_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, Session, SessionConfig};

pub use transport::{CodecError, Decoded, MAX_MESSAGE_SIZE, SnapcastCodec, decode_frame};
