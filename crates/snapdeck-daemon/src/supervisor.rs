//! Per-device connection supervisor.
//!
//! One task per device keeps a session alive for as long as the daemon runs:
//! dial, install the session, sync, wait for it to die, cool down, repeat.

use std::sync::Arc;
use std::time::Duration;

use snapdeck_rpc::{Connector, DEFAULT_DIAL_TIMEOUT, Session, SessionConfig, dial};
use snapdeck_types::ConnectionState;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::device::Device;

/// Wait after a failed dial before trying again
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Wait after losing an established session before redialing
pub const DEFAULT_COOL_DOWN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub dial_timeout: Duration,
    pub retry_backoff: Duration,
    pub cool_down: Duration,
    pub session: SessionConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            cool_down: DEFAULT_COOL_DOWN,
            session: SessionConfig::default(),
        }
    }
}

/// Drive `device` through connect/sync/reconnect until `cancel` fires.
///
/// Transport failures never escape; they only move the device between
/// `Disconnected`, `Connecting` and `Connected`. Ends in `Stopped`.
pub async fn run<C: Connector>(
    device: Arc<Device>,
    connector: Arc<C>,
    config: SupervisorConfig,
    cancel: CancellationToken,
) {
    let name = device.name().to_string();
    let addr = device.addr().clone();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        device.set_state(ConnectionState::Connecting);
        debug!("[{}] Connecting to {}", name, addr);

        let dialed = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = dial(&*connector, &addr.host, addr.port, config.dial_timeout) => result,
        };

        let stream = match dialed {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    "[{}] {} (retrying in {:?})",
                    name, e, config.retry_backoff
                );
                device.set_state(ConnectionState::Disconnected);
                if sleep_or_cancelled(config.retry_backoff, &cancel).await {
                    break;
                }
                continue;
            }
        };

        let session = Arc::new(Session::new(stream, addr.to_string(), config.session));
        device.install_session(Arc::clone(&session)).await;

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                release(&device, &session).await;
                break;
            }
            _ = device.sync() => {}
        }

        if !session.is_closed() {
            device.set_state(ConnectionState::Connected);
            info!("[{}] Connected to Snapcast server at {}", name, addr);
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                release(&device, &session).await;
                break;
            }
            () = session.closed() => {}
        }

        device.clear_session().await;
        device.set_state(ConnectionState::Disconnected);
        warn!(
            "[{}] Connection to {} lost (reconnecting in {:?})",
            name, addr, config.cool_down
        );

        if sleep_or_cancelled(config.cool_down, &cancel).await {
            break;
        }
    }

    device.set_state(ConnectionState::Stopped);
    info!("[{}] Supervisor stopped", name);
}

/// Uninstall the session so no new command can reach it, then close it once
/// the requests already on it are done.
async fn release(device: &Device, session: &Session) {
    device.clear_session().await;
    session.close_when_idle().await;
}

/// Returns `true` if cancelled before `duration` elapsed
async fn sleep_or_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(duration) => false,
    }
}
