//! TOML-based configuration for the controller.
//!
//! Lives next to the server's file in the platform config directory, as
//! `client.toml`:
//!
//! ```toml
//! [client]
//! secret = "change-me"
//! log_level = "info"
//! suppress_self_discovery = true
//! event_queue_capacity = 20
//! discovery_queue_capacity = 10
//! discovery_timeout_secs = 5      # omit to listen until Ctrl-C
//! broadcast_addresses = ["10.0.0.255"]
//!
//! [discovery]
//! broadcast_port = 8829
//! query_tag = "bt-discovery"
//! response_tag = "bt-discovery-server"
//! ```
//!
//! `BTREMOTE_SECRET` and the `BTREMOTE_BROADCAST_*` variables override the
//! file.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use btremote_core::config::{apply_discovery_env, env_value, platform_config_dir, EnvError, ENV_SECRET};
use btremote_core::DiscoveryConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::registry::DEFAULT_EVENT_QUEUE_CAPACITY;
use crate::infrastructure::network::discovery::DEFAULT_QUEUE_CAPACITY;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    InvalidEnv(#[from] EnvError),
}

/// Top-level client configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    /// Shared secret attached to every RPC call.
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Ignore responses coming from this machine's own addresses.
    #[serde(default = "default_true")]
    pub suppress_self_discovery: bool,
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
    #[serde(default = "default_discovery_queue_capacity")]
    pub discovery_queue_capacity: usize,
    /// Stop listening for responses after this many seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_timeout_secs: Option<u64>,
    /// Broadcast addresses queried in addition to the local interfaces'.
    #[serde(default)]
    pub broadcast_addresses: Vec<Ipv4Addr>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_event_queue_capacity() -> usize {
    DEFAULT_EVENT_QUEUE_CAPACITY
}
fn default_discovery_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            log_level: default_log_level(),
            suppress_self_discovery: default_true(),
            event_queue_capacity: default_event_queue_capacity(),
            discovery_queue_capacity: default_discovery_queue_capacity(),
            discovery_timeout_secs: None,
            broadcast_addresses: Vec::new(),
        }
    }
}

impl ClientConfig {
    pub fn discovery_timeout(&self) -> Option<Duration> {
        self.discovery_timeout_secs.map(Duration::from_secs)
    }
}

impl AppConfig {
    /// Layers `BTREMOTE_SECRET` and the `BTREMOTE_BROADCAST_*` variables on
    /// top of the loaded values.  Empty variables are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for a port that does not parse.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(secret) = env_value(&lookup, ENV_SECRET) {
            self.client.secret = secret;
        }
        apply_discovery_env(&mut self.discovery, lookup)?;
        Ok(())
    }
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot
/// be determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(platform_config_dir()
        .ok_or(ConfigError::NoPlatformConfigDir)?
        .join("client.toml"))
}

/// Loads the config from the default location.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning the defaults if the file does
/// not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
