//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file
//! - Environment variables (`ROOMHUB_*`, nested keys separated by `__`)

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file locations, checked in order.
const CONFIG_PATHS: [&str; 3] = [
    "roomhub.toml",
    "/etc/roomhub/roomhub.toml",
    "~/.config/roomhub/roomhub.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// User directory seed.
    #[serde(default)]
    pub directory: DirectoryConfig,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Per-connection outbound queue capacity.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between server pings in milliseconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    /// Read deadline in milliseconds, refreshed by any inbound frame.
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_ms: u64,

    /// Deadline for a single write in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// User directory configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Known users.
    #[serde(default)]
    pub users: Vec<DirectoryUser>,
}

/// One user directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub email: String,
    pub user_id: String,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_max_message_size() -> usize {
    roomhub_protocol::MAX_MESSAGE_SIZE
}

fn default_outbound_queue_capacity() -> usize {
    roomhub_core::DEFAULT_QUEUE_CAPACITY
}

fn default_max_connections() -> usize {
    100_000
}

fn default_ping_interval() -> u64 {
    54_000 // 9/10 of the pong timeout
}

fn default_pong_timeout() -> u64 {
    60_000
}

fn default_write_timeout() -> u64 {
    10_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            directory: DirectoryConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval(),
            pong_timeout_ms: default_pong_timeout(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl HeartbeatConfig {
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    #[must_use]
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Config {
    /// Load configuration from the first default path that exists, with
    /// environment overrides applied on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// an environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let file = CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        Self::layered(file.as_deref())
    }

    /// Load configuration from `file` (if any) layered with `ROOMHUB_*`
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or deserialized.
    pub fn layered(file: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = file {
            tracing::debug!(path = %path.display(), "Using config file");
            builder = builder.add_source(::config::File::from(path.to_path_buf()));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("ROOMHUB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check values that would break sessions at runtime.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let heartbeat = &self.heartbeat;
        if heartbeat.ping_interval_ms == 0 {
            bail!("heartbeat.ping_interval_ms must be greater than zero");
        }
        if heartbeat.write_timeout_ms == 0 {
            bail!("heartbeat.write_timeout_ms must be greater than zero");
        }
        if heartbeat.ping_interval_ms >= heartbeat.pong_timeout_ms {
            bail!(
                "heartbeat.ping_interval_ms ({}) must be less than heartbeat.pong_timeout_ms ({})",
                heartbeat.ping_interval_ms,
                heartbeat.pong_timeout_ms
            );
        }
        if self.limits.max_message_size == 0 {
            bail!("limits.max_message_size must be greater than zero");
        }
        // A zero-capacity channel cannot be created.
        if self.limits.outbound_queue_capacity == 0 {
            bail!("limits.outbound_queue_capacity must be greater than zero");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}
