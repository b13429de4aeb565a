use std::path::PathBuf;
use std::time::Duration;

use tracing::{trace, warn};

use crate::{Device, Node, Range, Sensor};

/// Shortest poll interval the hub accepts.
pub const MIN_INTERVAL_SECS: u64 = 10;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./senseye.db")
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Seconds between two poll cycles
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Hard limit for connecting to a node and receiving its readings
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,

    /// Upper bound of nodes polled at the same time
    #[serde(default = "default_max_concurrent_polls")]
    pub max_concurrent_polls: usize,

    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    /// Outgoing mail server. Alerts are only logged without it.
    pub smtp: Option<SmtpConfig>,

    /// Administrator created on first run if no user exists yet
    pub admin: Option<UserConfig>,

    /// Fleet inventory upserted into the store on startup
    pub inventory: Option<Inventory>,
}

impl Config {
    pub fn interval(&self) -> Duration {
        if self.interval_secs < MIN_INTERVAL_SECS {
            warn!(
                "interval of {}s is below the minimum, using {MIN_INTERVAL_SECS}s",
                self.interval_secs
            );
            return Duration::from_secs(MIN_INTERVAL_SECS);
        }
        Duration::from_secs(self.interval_secs)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs.max(1))
    }

    pub fn storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SmtpConfig {
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    /// Falls back to `SENSEYE_SMTP_PASSWORD` when omitted
    pub password: Option<String>,
    pub from: String,
}

const SMTP_PASSWORD: &str = "SENSEYE_SMTP_PASSWORD";

impl SmtpConfig {
    pub fn password(&self) -> Option<String> {
        self.password
            .clone()
            .or_else(|| std::env::var(SMTP_PASSWORD).ok())
    }
}

fn default_smtp_port() -> u16 {
    587
}

/// A user as written in the configuration, with a plaintext password.
#[derive(Clone, serde::Deserialize)]
pub struct UserConfig {
    pub username: String,
    pub email: String,
    pub group: String,
    pub password: String,
}

impl std::fmt::Debug for UserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserConfig")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("group", &self.group)
            .field("password", &"<redacted>")
            .finish()
    }
}

const ADMIN_USERNAME: &str = "SENSEYE_ADMIN_USERNAME";
const ADMIN_EMAIL: &str = "SENSEYE_ADMIN_EMAIL";
const ADMIN_GROUP: &str = "SENSEYE_ADMIN_GROUP";
const ADMIN_PASSWORD: &str = "SENSEYE_ADMIN_PASSWORD";

impl UserConfig {
    /// Read administrator credentials from the environment.
    ///
    /// Returns `None` unless all four variables are set.
    pub fn admin_from_env() -> Option<Self> {
        Some(Self {
            username: std::env::var(ADMIN_USERNAME).ok()?,
            email: std::env::var(ADMIN_EMAIL).ok()?,
            group: std::env::var(ADMIN_GROUP).ok()?,
            password: std::env::var(ADMIN_PASSWORD).ok()?,
        })
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub devices: Vec<Device>,
    #[serde(default)]
    pub sensors: Vec<Sensor>,
    #[serde(default)]
    pub ranges: Vec<Range>,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

fn default_interval() -> u64 {
    300
}

fn default_node_timeout() -> u64 {
    10
}

fn default_max_concurrent_polls() -> usize {
    16
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
}
