//! Daemon configuration loaded from `config.json`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snapdeck_rpc::SessionConfig;
use snapdeck_types::DEFAULT_CONTROL_PORT;
use tracing::warn;

use crate::error::{DaemonError, Result};
use crate::supervisor::SupervisorConfig;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Servers to connect to without waiting for a discovery announcement
    #[serde(default)]
    pub servers: Vec<ServerEntry>,

    #[serde(default)]
    pub supervisor: TimingConfig,

    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            supervisor: TimingConfig::default(),
            resync_interval_secs: default_resync_interval_secs(),
        }
    }
}

/// A statically configured Snapcast server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEntry {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Connection timings, all in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingConfig {
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_cool_down_ms")]
    pub cool_down_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            dial_timeout_ms: default_dial_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            cool_down_ms: default_cool_down_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_CONTROL_PORT
}
fn default_resync_interval_secs() -> u64 {
    60
}
fn default_dial_timeout_ms() -> u64 {
    5_000
}
fn default_retry_backoff_ms() -> u64 {
    10_000
}
fn default_cool_down_ms() -> u64 {
    5_000
}
fn default_idle_timeout_ms() -> u64 {
    90_000
}
fn default_request_timeout_ms() -> u64 {
    5_000
}

impl TimingConfig {
    /// Every timing must be non-zero; a zero idle or request timeout would
    /// tear down each session as soon as it opens.
    ///
    /// # Errors
    ///
    /// Returns `DaemonError::Config` naming the first zero field.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("dialTimeoutMs", self.dial_timeout_ms),
            ("retryBackoffMs", self.retry_backoff_ms),
            ("coolDownMs", self.cool_down_ms),
            ("idleTimeoutMs", self.idle_timeout_ms),
            ("requestTimeoutMs", self.request_timeout_ms),
        ];
        match fields.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(DaemonError::Config(format!(
                "supervisor.{name} must be greater than zero"
            ))),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn to_supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            dial_timeout: Duration::from_millis(self.dial_timeout_ms),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            cool_down: Duration::from_millis(self.cool_down_ms),
            session: SessionConfig {
                request_timeout: Duration::from_millis(self.request_timeout_ms),
                idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            },
        }
    }
}

impl Config {
    /// `<config dir>/snapdeck/config.json`, when the platform has a config dir
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "snapdeck").map(|dirs| dirs.config_dir().join("config.json"))
    }

    /// Load config from file. A missing file yields the defaults.
    ///
    /// Values are not checked here; [`Config::validate`] runs once the
    /// final config is assembled.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        warn_unknown_fields(&content, &path.display().to_string());
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    ///
    /// # Errors
    ///
    /// Returns `DaemonError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.resync_interval_secs == 0 {
            return Err(DaemonError::Config(
                "resyncIntervalSecs must be greater than zero".to_string(),
            ));
        }
        self.supervisor.validate()?;
        for entry in &self.servers {
            if entry.name.is_empty() || entry.host.is_empty() {
                return Err(DaemonError::Config(format!(
                    "server entry needs a name and a host: {entry:?}"
                )));
            }
            if entry.port == 0 {
                return Err(DaemonError::Config(format!(
                    "server {} has port 0",
                    entry.name
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
}

/// Parses `NAME=HOST[:PORT]` as given on the command line
impl FromStr for ServerEntry {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (name, addr) = s
            .split_once('=')
            .ok_or_else(|| format!("expected NAME=HOST[:PORT], got {s:?}"))?;

        let (host, port) = match addr.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|e| format!("invalid port {port:?}: {e}"))?;
                (host, port)
            }
            None => (addr, DEFAULT_CONTROL_PORT),
        };

        if name.is_empty() || host.is_empty() {
            return Err(format!("expected NAME=HOST[:PORT], got {s:?}"));
        }

        Ok(Self {
            name: name.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

const TOP_LEVEL_KEYS: &[&str] = &["servers", "supervisor", "resyncIntervalSecs"];
const SERVER_KEYS: &[&str] = &["name", "host", "port"];
const TIMING_KEYS: &[&str] = &[
    "dialTimeoutMs",
    "retryBackoffMs",
    "coolDownMs",
    "idleTimeoutMs",
    "requestTimeoutMs",
];

/// Warn about keys serde would silently ignore.
fn warn_unknown_fields(content: &str, config_name: &str) {
    let Ok(value) = serde_json::from_str::<Value>(content) else {
        return;
    };

    for path in find_unknown_keys(&value) {
        warn!("Unknown config field in {config_name}: {path}");
    }
}

fn find_unknown_keys(value: &Value) -> Vec<String> {
    let mut unknowns = Vec::new();

    let Value::Object(obj) = value else {
        return unknowns;
    };

    unknowns.extend(unknown_in(value, TOP_LEVEL_KEYS, ""));

    if let Some(supervisor) = obj.get("supervisor") {
        unknowns.extend(unknown_in(supervisor, TIMING_KEYS, "supervisor"));
    }

    if let Some(Value::Array(servers)) = obj.get("servers") {
        for (i, server) in servers.iter().enumerate() {
            unknowns.extend(unknown_in(server, SERVER_KEYS, &format!("servers[{i}]")));
        }
    }

    unknowns
}

fn unknown_in(value: &Value, expected: &[&str], prefix: &str) -> Vec<String> {
    let Value::Object(obj) = value else {
        return Vec::new();
    };
    let expected: HashSet<&str> = expected.iter().copied().collect();

    obj.keys()
        .filter(|key| !expected.contains(key.as_str()))
        .map(|key| {
            if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            }
        })
        .collect()
}
