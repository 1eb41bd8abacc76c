//! TOML-based configuration for the peer service.
//!
//! Read from `config.toml` in the platform config directory unless a path is
//! given on the command line:
//! - Windows:  `%APPDATA%\btremote\config.toml`
//! - Linux:    `~/.config/btremote/config.toml`
//! - macOS:    `~/Library/Application Support/btremote/config.toml`
//!
//! ```toml
//! [server]
//! port = 0               # 0 = let the OS pick a free port
//! bind_address = "0.0.0.0"
//! secret = "change-me"
//! log_level = "info"
//!
//! [discovery]
//! broadcast_port = 8829
//! query_tag = "bt-discovery"
//! response_tag = "bt-discovery-server"
//!
//! [[devices]]
//! address = "AA:BB:CC:DD:EE:FF"
//! name = "Headphones"
//! trusted = true
//! paired = true
//! connected = false
//! ```
//!
//! Every field has a `#[serde(default = "...")]` so a missing file or table
//! still yields a working config.  After loading, the `BTREMOTE_*`
//! environment variables are layered on top by [`AppConfig::apply_env_overrides`].

use std::path::{Path, PathBuf};

use btremote_core::config::{
    apply_discovery_env, env_value, parse_port, platform_config_dir, EnvError, ENV_PORT,
    ENV_SECRET,
};
use btremote_core::{DeviceSnapshot, DiscoveryConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// An environment override holds an unusable value.
    #[error(transparent)]
    InvalidEnv(#[from] EnvError),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Seed table for the in-memory device adapter.
    #[serde(default)]
    pub devices: Vec<DeviceSnapshot>,
}

/// RPC listener and process settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// TCP port of the RPC listener.  `0` binds an OS-assigned port.
    #[serde(default)]
    pub port: u16,
    /// IP address to bind both sockets to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Shared secret every RPC call must carry.
    #[serde(default)]
    pub secret: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            bind_address: default_bind_address(),
            secret: String::new(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Layers `BTREMOTE_PORT`, `BTREMOTE_SECRET` and the `BTREMOTE_BROADCAST_*`
    /// variables on top of the loaded values.  Empty variables are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for a port that does not parse.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = env_value(&lookup, ENV_PORT) {
            self.server.port = parse_port(ENV_PORT, value)?;
        }
        if let Some(secret) = env_value(&lookup, ENV_SECRET) {
            self.server.secret = secret;
        }
        apply_discovery_env(&mut self.discovery, lookup)?;
        Ok(())
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(platform_config_dir()
        .ok_or(ConfigError::NoPlatformConfigDir)?
        .join("config.toml"))
}

/// Loads the config from the default location.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
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

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
