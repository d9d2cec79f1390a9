//! Configuration loading and management.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server identity.
    pub server: ServerConfig,
    /// Realtime (WebSocket) listen configuration.
    pub listen: ListenConfig,
    /// Request-style HTTP API configuration.
    pub http: HttpConfig,
    /// WebSocket handshake options.
    #[serde(default)]
    pub websocket: WebSocketConfig,
    /// Database configuration.
    pub database: Option<DatabaseConfig>,
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name (e.g., "scribed.straylight.net").
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

/// Realtime listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to bind the WebSocket listener to (e.g., "0.0.0.0:9090").
    pub address: SocketAddr,
}

/// HTTP API listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Address to bind the HTTP API to (e.g., "0.0.0.0:8080").
    pub address: SocketAddr,
}

/// WebSocket handshake options.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebSocketConfig {
    /// Allowed Origin headers. Empty means allow all.
    #[serde(default)]
    pub allow_origins: Vec<String>,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    pub path: String,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
