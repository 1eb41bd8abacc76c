//! Discovery settings shared by the responder and the requester.
//!
//! Both roles must agree on the broadcast port and on the two tags, so the
//! struct lives here and is embedded in each application's config file under
//! a `[discovery]` table:
//!
//! ```toml
//! [discovery]
//! broadcast_port = 8829
//! query_tag = "bt-discovery"
//! response_tag = "bt-discovery-server"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default UDP port the responder listens on.
pub const DEFAULT_BROADCAST_PORT: u16 = 8829;
/// Default tag of query datagrams.
pub const DEFAULT_QUERY_TAG: &str = "bt-discovery";
/// Default tag of response datagrams.
pub const DEFAULT_RESPONSE_TAG: &str = "bt-discovery-server";

/// Environment variable overriding the service (RPC) port.
pub const ENV_PORT: &str = "BTREMOTE_PORT";
/// Environment variable holding the shared secret.
pub const ENV_SECRET: &str = "BTREMOTE_SECRET";
/// Environment variable overriding [`DiscoveryConfig::broadcast_port`].
pub const ENV_BROADCAST_PORT: &str = "BTREMOTE_BROADCAST_PORT";
/// Environment variable overriding [`DiscoveryConfig::query_tag`].
pub const ENV_QUERY_TAG: &str = "BTREMOTE_BROADCAST_MESSAGE";
/// Environment variable overriding [`DiscoveryConfig::response_tag`].
pub const ENV_RESPONSE_TAG: &str = "BTREMOTE_BROADCAST_SERVER_RESPONSE";

/// Older deployments export `REMOTE_BLUETOOTH_*` names.  Each is read when its
/// `BTREMOTE_*` counterpart is unset or empty.
pub const LEGACY_ENV_NAMES: [(&str, &str); 5] = [
    (ENV_PORT, "REMOTE_BLUETOOTH_PORT"),
    (ENV_SECRET, "REMOTE_BLUETOOTH_SECRET"),
    (ENV_BROADCAST_PORT, "REMOTE_BLUETOOTH_BROADCAST_PORT"),
    (ENV_QUERY_TAG, "REMOTE_BLUETOOTH_BROADCAST_MESSAGE"),
    (ENV_RESPONSE_TAG, "REMOTE_BLUETOOTH_BROADCAST_SERVER_RESPONSE"),
];

/// An environment override that could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid value {value:?} for {var}")]
pub struct EnvError {
    pub var: &'static str,
    pub value: String,
}

/// Well-known port and tag pair of the discovery protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// UDP port the responder binds and the requester broadcasts to.
    #[serde(default = "default_broadcast_port")]
    pub broadcast_port: u16,
    /// Tag identifying query datagrams.
    #[serde(default = "default_query_tag")]
    pub query_tag: String,
    /// Tag identifying response datagrams.
    #[serde(default = "default_response_tag")]
    pub response_tag: String,
}

impl DiscoveryConfig {
    pub fn query_tag_bytes(&self) -> &[u8] {
        self.query_tag.as_bytes()
    }

    pub fn response_tag_bytes(&self) -> &[u8] {
        self.response_tag.as_bytes()
    }
}

/// Applies the `BTREMOTE_BROADCAST_*` overrides found through `lookup`.
///
/// `lookup` is usually `|k| std::env::var(k).ok()`; tests pass a closure over
/// a fixed map.  Empty values are ignored.
///
/// # Errors
///
/// Returns [`EnvError`] if the broadcast port override is not a valid port.
pub fn apply_discovery_env(
    config: &mut DiscoveryConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), EnvError> {
    if let Some(value) = env_value(&lookup, ENV_BROADCAST_PORT) {
        config.broadcast_port = parse_port(ENV_BROADCAST_PORT, value)?;
    }
    if let Some(value) = env_value(&lookup, ENV_QUERY_TAG) {
        config.query_tag = value;
    }
    if let Some(value) = env_value(&lookup, ENV_RESPONSE_TAG) {
        config.response_tag = value;
    }
    Ok(())
}

/// Reads `var`, falling back to its [`LEGACY_ENV_NAMES`] alias.  Empty
/// values count as unset.
pub fn env_value(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    non_empty(lookup(var)).or_else(|| {
        LEGACY_ENV_NAMES
            .iter()
            .find(|(name, _)| *name == var)
            .and_then(|(_, legacy)| non_empty(lookup(legacy)))
    })
}

/// Parses a port number read from the environment variable `var`.
///
/// # Errors
///
/// Returns [`EnvError`] if `value` is not a valid `u16`.
pub fn parse_port(var: &'static str, value: String) -> Result<u16, EnvError> {
    value.trim().parse().map_err(|_| EnvError { var, value })
}

/// Drops empty strings so an exported-but-blank variable means "unset".
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Resolves the platform config directory (`…/btremote`).
///
/// - Windows:  `%APPDATA%\btremote`
/// - Linux:    `$XDG_CONFIG_HOME/btremote` or `~/.config/btremote`
/// - macOS:    `~/Library/Application Support/btremote`
pub fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("btremote"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("btremote")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("btremote"))
    }
}

fn default_broadcast_port() -> u16 {
    DEFAULT_BROADCAST_PORT
}
fn default_query_tag() -> String {
    DEFAULT_QUERY_TAG.to_string()
}
fn default_response_tag() -> String {
    DEFAULT_RESPONSE_TAG.to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            broadcast_port: default_broadcast_port(),
            query_tag: default_query_tag(),
            response_tag: default_response_tag(),
        }
    }
}
