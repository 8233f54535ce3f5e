//! Configuration for maildrop

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// POP3 listener configuration
    #[serde(default)]
    pub pop3: Pop3Config,

    /// Mailbox store selection
    #[serde(default)]
    pub store: StoreConfig,

    /// Database configuration (postgres store only)
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname announced in the greeting
    #[serde(default = "default_hostname")]
    pub hostname: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

/// POP3 server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pop3Config {
    /// POP3 server bind address
    #[serde(default = "default_pop3_bind")]
    pub bind: String,

    /// Idle timeout in seconds
    #[serde(default = "default_pop3_timeout")]
    pub timeout_secs: u64,

    /// Maximum concurrent connections
    #[serde(default = "default_pop3_max_connections")]
    pub max_connections: usize,
}

impl Default for Pop3Config {
    fn default() -> Self {
        Self {
            bind: default_pop3_bind(),
            timeout_secs: default_pop3_timeout(),
            max_connections: default_pop3_max_connections(),
        }
    }
}

impl Pop3Config {
    /// Replace the port of the bind address, keeping the host part
    pub fn set_port(&mut self, port: u16) {
        let host = match self.bind.rsplit_once(':') {
            Some((host, _)) => host.to_string(),
            None => self.bind.clone(),
        };
        self.bind = format!("{}:{}", host, port);
    }
}

fn default_pop3_bind() -> String {
    "0.0.0.0:110".to_string()
}

fn default_pop3_timeout() -> u64 {
    600
}

fn default_pop3_max_connections() -> usize {
    500
}

/// Mailbox store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// PostgreSQL via sqlx
    Postgres,
    /// In-process store, contents are lost on exit
    Memory,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store backend: "postgres" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,

    /// Mailboxes loaded into the memory store at startup
    #[serde(default)]
    pub mailboxes: Vec<SeedMailbox>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            mailboxes: Vec::new(),
        }
    }
}

/// A mailbox for the memory backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedMailbox {
    pub name: String,
    pub password: String,
    /// Files whose contents become the mailbox's messages, in order
    #[serde(default)]
    pub messages: Vec<PathBuf>,
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Postgres
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    2
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from the default locations
    pub fn load() -> crate::Result<Self> {
        let paths = [
            PathBuf::from("./maildrop.toml"),
            PathBuf::from("/etc/maildrop/maildrop.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }
}
