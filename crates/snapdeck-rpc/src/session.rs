//! Transport session over one live connection to a Snapcast server.
//!
//! A [`Session`] owns both halves of a duplex stream. A background reader
//! task decodes incoming frames, routes responses to the waiting request and
//! watches for silence; requests themselves are serialized so exactly one is
//! in flight at a time. Any transport failure invalidates the session for
//! good: reconnecting is the caller's job.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, TransportError};
use crate::protocol::{Message, Request, Response};
use crate::transport::{CodecError, SnapcastCodec};

/// Deadline for writing a request and, separately, for receiving its response
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A connection that stays silent this long is considered dead
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub request_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Pending request waiting for a response
type PendingRequest = oneshot::Sender<Result<Response, Error>>;

type PendingMap = Arc<Mutex<HashMap<u64, PendingRequest>>>;

/// One live connection plus its request serialization state
pub struct Session {
    peer: String,
    /// Held for a full request/response round trip
    writer: Mutex<FramedWrite<BoxedWriter, SnapcastCodec>>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: CancellationToken,
    config: SessionConfig,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("closed", &self.closed.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Take ownership of an established stream and start reading from it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<S>(stream: S, peer: impl Into<String>, config: SessionConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let peer = peer.into();
        let (read_half, write_half) = tokio::io::split(stream);
        let writer: BoxedWriter = Box::new(write_half);

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();

        let reader = tokio::spawn(read_loop(
            FramedRead::new(read_half, SnapcastCodec::new()),
            pending.clone(),
            closed.clone(),
            config.idle_timeout,
            peer.clone(),
        ));

        Self {
            peer,
            writer: Mutex::new(FramedWrite::new(writer, SnapcastCodec::new())),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            config,
            reader,
        }
    }

    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the session has been invalidated.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Invalidate the session. Idempotent.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!("[{}] Closing session", self.peer);
            self.closed.cancel();
        }
    }

    /// Let requests already holding or queued on the session finish, then
    /// invalidate it. Each of them is still bounded by its own deadline.
    pub async fn close_when_idle(&self) {
        let _writer = self.writer.lock().await;
        self.close();
    }

    /// Send a request and wait for its response.
    ///
    /// Concurrent callers queue behind each other in arrival order; each
    /// holds the session for its full round trip.
    ///
    /// # Errors
    ///
    /// Returns `Error::Remote` if the server rejected the request. Any other
    /// error means the session is now closed.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, Error> {
        let mut writer = self.writer.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        // The reader drains pending requests after it marks the session closed,
        // so checking here catches a close that raced the insert
        if self.closed.is_cancelled() {
            self.pending.lock().await.remove(&id);
            return Err(TransportError::ConnectionLost("session closed".to_string()).into());
        }

        trace!("[{}] -> {} (id {})", self.peer, method, id);
        let outcome = self
            .round_trip(&mut writer, Request::new(method, params, id), rx)
            .await;
        self.pending.lock().await.remove(&id);

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                if e.is_transport() {
                    warn!("[{}] {} failed: {}", self.peer, method, e);
                    self.close();
                }
                return Err(e);
            }
        };

        trace!("[{}] <- {} (id {})", self.peer, method, id);
        response.into_result().map_err(Error::Remote)
    }

    async fn round_trip(
        &self,
        writer: &mut FramedWrite<BoxedWriter, SnapcastCodec>,
        request: Request,
        rx: oneshot::Receiver<Result<Response, Error>>,
    ) -> Result<Response, Error> {
        let timeout = self.config.request_timeout;

        match tokio::time::timeout(timeout, writer.send(request)).await {
            Err(_) => return Err(TransportError::Timeout.into()),
            Ok(Err(CodecError::Json(e))) => return Err(Error::Json(e)),
            Ok(Err(e)) => return Err(TransportError::ConnectionLost(e.to_string()).into()),
            Ok(Ok(())) => {}
        }

        tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|_| TransportError::ConnectionLost("reader stopped".to_string()))?
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.closed.cancel();
        self.reader.abort();
    }
}

async fn read_loop<R>(
    mut frames: FramedRead<R, SnapcastCodec>,
    pending: PendingMap,
    closed: CancellationToken,
    idle_timeout: Duration,
    peer: String,
) where
    R: AsyncRead + Unpin,
{
    let mut decode_failure: Option<CodecError> = None;

    let reason = loop {
        let next = tokio::select! {
            () = closed.cancelled() => break "session closed".to_string(),
            next = tokio::time::timeout(idle_timeout, frames.next()) => next,
        };

        match next {
            Err(_) => break format!("no data received for {idle_timeout:?}"),
            Ok(None) => break "connection closed by peer".to_string(),
            Ok(Some(Err(e))) => {
                let reason = e.to_string();
                if e.is_decode_failure() {
                    decode_failure = Some(e);
                }
                break reason;
            }
            Ok(Some(Ok(Message::Response(resp)))) => {
                let tx = pending.lock().await.remove(&resp.id);
                match tx {
                    Some(tx) => {
                        let _ = tx.send(Ok(resp));
                    }
                    None => debug!("[{}] Dropping response for unknown id {}", peer, resp.id),
                }
            }
            Ok(Some(Ok(Message::Notification(notification)))) => {
                trace!("[{}] Ignoring notification {}", peer, notification.method);
            }
        }
    };

    debug!("[{}] Session reader stopped: {}", peer, reason);
    closed.cancel();

    let mut pending = pending.lock().await;
    for (_, tx) in pending.drain() {
        let err = match decode_failure.take() {
            Some(e) => Error::Decode(e),
            None => TransportError::ConnectionLost(reason.clone()).into(),
        };
        let _ = tx.send(Err(err));
    }
}
