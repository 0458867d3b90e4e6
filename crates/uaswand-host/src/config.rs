//! TOML-based configuration for the host application.
//!
//! Reads and writes `HostConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\UasWand\config.toml`
//! - Linux:    `~/.config/uaswand/config.toml`
//! - macOS:    `~/Library/Application Support/UasWand/config.toml`
//!
//! Every field carries a serde default so a partial (or absent) file still
//! yields a working configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uaswand_core::DeviceSignature;

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

/// Top-level host configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Timeouts, credentials, and transport behavior for device connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// Overall budget for one connect sequence, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Per-request deadline for a single command exchange, in seconds.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Basic-auth username sent with every HTTP request.
    #[serde(default = "default_username")]
    pub username: String,
    /// Basic-auth password sent with every HTTP request.
    #[serde(default = "default_password")]
    pub password: String,
    /// Use `https://` URLs for the REST transport.
    #[serde(default)]
    pub use_https: bool,
    /// Accept self-signed device certificates.
    ///
    /// Defaults to true: production devices serve self-signed certs and
    /// there is no CA to pin against. Set to false only on networks where
    /// devices carry real certificates.
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
    /// Delay after a WiFi restart before the link is considered settled,
    /// in seconds.
    #[serde(default = "default_wifi_settle_secs")]
    pub wifi_restart_settle_secs: u64,
    /// Round-trip latency above this many milliseconds raises a health
    /// issue.
    #[serde(default = "default_latency_warn_ms")]
    pub latency_warn_ms: u64,
}

/// Network sweep parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    /// TCP ports probed on every swept host, in order.
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    /// Per-host, per-port probe deadline in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Maximum number of hosts probed concurrently.
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,
    /// Loopback port checked for a locally running simulator.
    #[serde(default = "default_simulator_port")]
    pub simulator_port: u16,
}

/// Serial transport parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialConfig {
    /// Read/write deadline for one serial command, in seconds.
    #[serde(default = "default_serial_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Recognition policy for UAS-WAND hardware on USB serial ports.
    #[serde(default)]
    pub signature: DeviceSignature,
}

/// Logging verbosity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default log filter when `RUST_LOG` is unset (trace/debug/info/warn/error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_connect_timeout_secs() -> u64 {
    15
}
fn default_command_timeout_secs() -> u64 {
    10
}
fn default_username() -> String {
    "test".to_string()
}
fn default_password() -> String {
    "0000".to_string()
}
fn default_true() -> bool {
    true
}
fn default_wifi_settle_secs() -> u64 {
    5
}
fn default_latency_warn_ms() -> u64 {
    1000
}
fn default_ports() -> Vec<u16> {
    vec![80, 8080, 5000, 443, 8443]
}
fn default_probe_timeout_ms() -> u64 {
    1500
}
fn default_probe_concurrency() -> usize {
    15
}
fn default_simulator_port() -> u16 {
    5000
}
fn default_serial_timeout_secs() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            discovery: DiscoveryConfig::default(),
            serial: SerialConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            username: default_username(),
            password: default_password(),
            use_https: false,
            accept_invalid_certs: default_true(),
            wifi_restart_settle_secs: default_wifi_settle_secs(),
            latency_warn_ms: default_latency_warn_ms(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            ports: default_ports(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_concurrency: default_probe_concurrency(),
            simulator_port: default_simulator_port(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_serial_timeout_secs(),
            signature: DeviceSignature::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn wifi_restart_settle(&self) -> Duration {
        Duration::from_secs(self.wifi_restart_settle_secs)
    }
}

impl DiscoveryConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl SerialConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
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

/// Loads `HostConfig` from disk, returning `HostConfig::default()` if the
/// file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<HostConfig, ConfigError> {
    let path = config_file_path()?;

    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let cfg: HostConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HostConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config` to disk.
///
/// Creates the config directory and file if they do not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &HostConfig) -> Result<(), ConfigError> {
    let path = config_file_path()?;

    // Ensure directory exists before writing.
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config base directory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        // %APPDATA% e.g. C:\Users\<user>\AppData\Roaming
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("UasWand"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("uaswand"))
    }

    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/UasWand
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("UasWand")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
