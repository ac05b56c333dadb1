//! TOML-based configuration persistence for a LanRelay node.
//!
//! Reads and writes `NodeConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\LanRelay\config.toml`
//! - Linux:    `$XDG_CONFIG_HOME/lanrelay/config.toml` or `~/.config/lanrelay/config.toml`
//! - macOS:    `~/Library/Application Support/LanRelay/config.toml`
//!
//! ```toml
//! [node]
//! display_name = "office-pc"
//! identity = "hostname"
//!
//! [network]
//! discovery_port = 12344
//! peer_ttl_secs = 30
//!
//! [transfer]
//! framing = "length_prefixed"
//! ```
//!
//! Every field carries a serde default, so an absent file, a missing section,
//! or a file written by an older version all load cleanly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::inject_text::InjectionConfig;
use crate::infrastructure::network::transfer::TransferFraming;

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
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level node configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub injection: InjectionSection,
    #[serde(default)]
    pub transfer: TransferSection,
}

/// Which announcement variant the node speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// `"<name>|<isHost>"`; peers key us by name and source address.
    #[default]
    Hostname,
    /// `"DISCOVER:<id>"` with a stored UUID.
    Persistent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSection {
    /// Name shown to peers. Empty means "use the system hostname".
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub identity: IdentityMode,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// UDP port for presence announcements.
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// UDP port for unicast chat.
    #[serde(default = "default_message_port")]
    pub message_port: u16,
    /// TCP port for approved transfers.
    #[serde(default = "default_transfer_port")]
    pub transfer_port: u16,
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,
    /// Socket read timeout; bounds how long shutdown waits on a receive loop.
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    /// Bind one `0.0.0.0` discovery socket instead of one per interface.
    ///
    /// On Linux a UDP socket bound to a unicast interface address does not
    /// receive subnet or limited broadcasts, so per-interface binding hears
    /// no peers there. Set this to `true` on Linux nodes.
    #[serde(default)]
    pub bind_wildcard: bool,
    #[serde(default)]
    pub suppress_broadcast_while_connected: bool,
    /// Drop peers silent for this long. Absent: peers are never dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InjectionSection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    #[serde(default = "default_activation_settle_ms")]
    pub activation_settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferSection {
    #[serde(default)]
    pub framing: TransferFraming,
    /// How long a pending transfer waits for a local decision.
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_discovery_port() -> u16 {
    12344
}
fn default_message_port() -> u16 {
    12345
}
fn default_transfer_port() -> u16 {
    12346
}
fn default_broadcast_interval_ms() -> u64 {
    2000
}
fn default_receive_timeout_ms() -> u64 {
    1000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_idle_poll_ms() -> u64 {
    100
}
fn default_activation_settle_ms() -> u64 {
    100
}
fn default_approval_timeout_secs() -> u64 {
    30
}
fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            identity: IdentityMode::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            message_port: default_message_port(),
            transfer_port: default_transfer_port(),
            broadcast_interval_ms: default_broadcast_interval_ms(),
            receive_timeout_ms: default_receive_timeout_ms(),
            bind_wildcard: false,
            suppress_broadcast_while_connected: false,
            peer_ttl_secs: None,
        }
    }
}

impl Default for InjectionSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            idle_poll_ms: default_idle_poll_ms(),
            activation_settle_ms: default_activation_settle_ms(),
        }
    }
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            framing: TransferFraming::default(),
            approval_timeout_secs: default_approval_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl NetworkConfig {
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    /// Never zero: a zero read timeout means "block forever" to the OS.
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms.max(1))
    }

    pub fn peer_ttl(&self) -> Option<Duration> {
        self.peer_ttl_secs.map(Duration::from_secs)
    }
}

impl InjectionSection {
    pub fn to_injection_config(&self) -> InjectionConfig {
        InjectionConfig {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            idle_poll: Duration::from_millis(self.idle_poll_ms.max(1)),
            activation_settle: Duration::from_millis(self.activation_settle_ms),
        }
    }
}

impl TransferSection {
    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for LanRelay files.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `NodeConfig` from `path`, returning `NodeConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<NodeConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(NodeConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Persists `config` to `path`, creating the parent directory.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &NodeConfig, path: &Path) -> Result<(), ConfigError> {
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

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("LanRelay"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("lanrelay"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("LanRelay")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
