use std::{fs, path::Path, time::Duration};

use msglog_stream::{DEFAULT_LOG_TTL, ServerOptions};
use serde::{Deserialize, Serialize};

/// Service configuration file (config.yaml)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How long in-flight requests may take to finish once shutdown starts
    pub shutdown_timeout_ms: u64,
    /// Deadline for each store call made on behalf of a request
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let defaults = ServerOptions::default();
        ServerConfig {
            host: defaults.host,
            port: defaults.port,
            shutdown_timeout_ms: defaults.shutdown_timeout.as_millis() as u64,
            request_timeout_ms: defaults.request_timeout.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// e.g. redis://localhost:6379/0; messages are kept in memory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Sliding expiry of each (user, session) log
    pub ttl_seconds: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            ttl_seconds: DEFAULT_LOG_TTL.as_secs(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found at {}", .0.display())]
    FileNotFound(std::path::PathBuf),
    #[error("Failed to read {}: {}", .0.display(), .1)]
    ReadError(std::path::PathBuf, std::io::Error),
    #[error("Failed to parse {}: {}", .0.display(), .1)]
    ParseError(std::path::PathBuf, serde_yml::Error),
}

impl Config {
    /// Load configuration from the specified file path
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::FileNotFound(config_path.to_path_buf()));
        }

        let content = fs::read_to_string(config_path)
            .map_err(|e| ConfigError::ReadError(config_path.to_path_buf(), e))?;

        Self::parse(&content).map_err(|e| ConfigError::ParseError(config_path.to_path_buf(), e))
    }

    /// Parse configuration from YAML text. An empty document yields defaults.
    pub fn parse(content: &str) -> Result<Self, serde_yml::Error> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        serde_yml::from_str(content)
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            port: self.server.port,
            host: self.server.host.clone(),
            request_timeout: Duration::from_millis(self.server.request_timeout_ms),
            shutdown_timeout: Duration::from_millis(self.server.shutdown_timeout_ms),
        }
    }

    pub fn log_ttl(&self) -> Duration {
        Duration::from_secs(self.log.ttl_seconds)
    }
}
