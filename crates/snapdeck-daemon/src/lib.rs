//! Snapdeck daemon library: keeps one supervised connection per Snapcast
//! server, mirrors each server's state and exposes commands against it.
//!
//! - [`registry`]: device map fed by discovery announcements
//! - [`device`]: per-server session slot, cache and command facade
//! - [`supervisor`]: reconnect loop per device
//! - [`sync`]: `Server.GetStatus` to cache
//! - [`config`]: `config.json` and defaults

pub mod config;
pub mod device;
pub mod error;
pub mod registry;
pub mod server;
pub mod supervisor;
pub mod sync;

pub use config::{Config, ServerEntry, TimingConfig};
pub use device::{Device, DeviceAddr, DeviceCache};
pub use error::{CommandError, DaemonError, Result};
pub use registry::{Discovered, Registry, spawn_discovery_listener, spawn_periodic_resync};
pub use server::run;
pub use supervisor::SupervisorConfig;
