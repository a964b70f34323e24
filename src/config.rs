// src/config.rs

//! Manages server configuration: loading, resolving dynamic values, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// The environment variable that, when set, overrides `ingress.token`.
pub const INGRESS_TOKEN_ENV: &str = "SLIPSTREAM_INGRESS_TOKEN";

/// Per-connection session settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Capacity of each connection's outbound queue. A full queue drops new messages.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// How often the server sends a keepalive probe.
    #[serde(default = "default_ping_interval", with = "humantime_serde")]
    pub ping_interval: Duration,
    /// A session with no inbound frame for this long is considered dead.
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Upper bound on a single frame write.
    #[serde(default = "default_write_timeout", with = "humantime_serde")]
    pub write_timeout: Duration,
    /// Largest inbound frame accepted from a client.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_outbound_queue_capacity(),
            ping_interval: default_ping_interval(),
            read_timeout: default_read_timeout(),
            write_timeout: default_write_timeout(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}

fn default_outbound_queue_capacity() -> usize {
    256
}
fn default_ping_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_read_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_write_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_max_message_bytes() -> usize {
    32 * 1024
}

/// Settings for the class reminder task.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RemindersConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// How often upcoming classes are scanned.
    #[serde(default = "default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,
    /// How far ahead of now a class start must fall to be reminded.
    #[serde(default = "default_lookahead", with = "humantime_serde")]
    pub lookahead: Duration,
    /// If true, each student is reminded at most once per class occurrence.
    #[serde(default = "default_true")]
    pub dedupe: bool,
}

impl Default for RemindersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval: default_tick_interval(),
            lookahead: default_lookahead(),
            dedupe: true,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_tick_interval() -> Duration {
    Duration::from_secs(60)
}
fn default_lookahead() -> Duration {
    Duration::from_secs(15 * 60)
}

/// Where the verified identity and role are read from.
///
/// Authentication happens upstream; the gateway forwards the result in headers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuthConfig {
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
    #[serde(default = "default_role_header")]
    pub role_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            identity_header: default_identity_header(),
            role_header: default_role_header(),
        }
    }
}

fn default_identity_header() -> String {
    "x-user-id".to_string()
}
fn default_role_header() -> String {
    "x-user-role".to_string()
}

/// Settings for the internal domain-event endpoints.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct IngressConfig {
    /// When set, requests must carry this value in `x-internal-token`.
    #[serde(default)]
    pub token: Option<String>,
}

/// Settings for the schedule store.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StoreConfig {
    /// JSON file with schedules and students to load at startup.
    #[serde(default)]
    pub seed_path: Option<PathBuf>,
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    9464
}

/// The configuration as written in the TOML file.
#[derive(Deserialize, Debug)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_max_clients")]
    max_clients: usize,
    #[serde(default)]
    session: SessionConfig,
    #[serde(default)]
    reminders: RemindersConfig,
    #[serde(default)]
    auth: AuthConfig,
    #[serde(default)]
    ingress: IngressConfig,
    #[serde(default)]
    store: StoreConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    10000
}

/// The main configuration struct for the server.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub max_clients: usize,
    pub session: SessionConfig,
    pub reminders: RemindersConfig,
    pub auth: AuthConfig,
    pub ingress: IngressConfig,
    pub store: StoreConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            session: SessionConfig::default(),
            reminders: RemindersConfig::default(),
            auth: AuthConfig::default(),
            ingress: IngressConfig::default(),
            store: StoreConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml(&contents).with_context(|| format!("Invalid configuration in '{path}'"))
    }

    /// Parses, resolves and validates a configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let token = resolve_ingress_token(
            raw_config.ingress.token,
            std::env::var(INGRESS_TOKEN_ENV).ok(),
        );

        let config = Config {
            host: raw_config.host,
            port: raw_config.port,
            log_level: raw_config.log_level,
            max_clients: raw_config.max_clients,
            session: raw_config.session,
            reminders: raw_config.reminders,
            auth: AuthConfig {
                identity_header: raw_config.auth.identity_header.to_ascii_lowercase(),
                role_header: raw_config.auth.role_header.to_ascii_lowercase(),
            },
            ingress: IngressConfig { token },
            store: raw_config.store,
            metrics: raw_config.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    /// The `host:port` string the server binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }

        let session = &self.session;
        if session.outbound_queue_capacity == 0 {
            return Err(anyhow!("session.outbound_queue_capacity cannot be 0"));
        }
        if session.ping_interval.is_zero() {
            return Err(anyhow!("session.ping_interval cannot be 0"));
        }
        if session.ping_interval >= session.read_timeout {
            return Err(anyhow!(
                "session.ping_interval ({:?}) must be shorter than session.read_timeout ({:?})",
                session.ping_interval,
                session.read_timeout
            ));
        }
        if session.write_timeout.is_zero() {
            return Err(anyhow!("session.write_timeout cannot be 0"));
        }
        if session.max_message_bytes == 0 {
            return Err(anyhow!("session.max_message_bytes cannot be 0"));
        }

        let reminders = &self.reminders;
        if reminders.tick_interval.is_zero() {
            return Err(anyhow!("reminders.tick_interval cannot be 0"));
        }
        if reminders.lookahead.is_zero() {
            return Err(anyhow!("reminders.lookahead cannot be 0"));
        }
        if reminders.lookahead >= Duration::from_secs(24 * 60 * 60) {
            return Err(anyhow!("reminders.lookahead must be shorter than 24h"));
        }
        if reminders.enabled && reminders.tick_interval > reminders.lookahead {
            warn!(
                "reminders.tick_interval ({:?}) exceeds reminders.lookahead ({:?}); some classes may never be reminded.",
                reminders.tick_interval, reminders.lookahead
            );
        }

        if self.auth.identity_header.trim().is_empty() || self.auth.role_header.trim().is_empty() {
            return Err(anyhow!("auth headers cannot be empty"));
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!("metrics.port cannot equal port"));
            }
        }

        Ok(())
    }
}

/// Picks the ingress token: a non-empty environment value wins over the file.
/// Empty strings are treated as unset.
fn resolve_ingress_token(from_file: Option<String>, from_env: Option<String>) -> Option<String> {
    from_env
        .filter(|t| !t.is_empty())
        .or(from_file)
        .filter(|t| !t.is_empty())
}
