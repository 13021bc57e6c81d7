//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (WAYPOST_HOST, WAYPOST_PORT, WAYPOST_ENDPOINT)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Paths served by fixed routes; the ingest endpoint may not shadow them.
const RESERVED_PATHS: &[&str] = &["/api/positions", "/stream", "/health"];

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Ingest endpoint is not a literal absolute path.
    #[error("Ingest endpoint must be a literal path starting with '/': {0:?}")]
    InvalidEndpoint(String),

    /// Ingest endpoint collides with a built-in route.
    #[error("Ingest endpoint {0:?} is reserved")]
    ReservedEndpoint(String),

    /// Mailbox capacity is zero.
    #[error("stream.mailbox_capacity must be at least 1")]
    ZeroMailboxCapacity,

    /// Keep-alive interval is zero.
    #[error("stream.keepalive_secs must be at least 1")]
    ZeroKeepalive,

    /// Host and port do not resolve to an address.
    #[error("Invalid bind address {0}")]
    InvalidAddress(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path reporters POST position batches to.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Stream configuration.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Stale player eviction.
    #[serde(default)]
    pub eviction: EvictionConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Pending messages buffered per subscriber before drops start.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Idle seconds before a keep-alive comment is sent.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum ingest body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Eviction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Default age, in seconds, past which a player counts as inactive.
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
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

// Default value functions
fn default_host() -> String {
    std::env::var("WAYPOST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("WAYPOST_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_endpoint() -> String {
    std::env::var("WAYPOST_ENDPOINT").unwrap_or_else(|_| "/collect".to_string())
}

fn default_true() -> bool {
    true
}

fn default_mailbox_capacity() -> usize {
    100
}

fn default_keepalive() -> u64 {
    15
}

fn default_max_body_bytes() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_max_age() -> u64 {
    60
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            endpoint: default_endpoint(),
            stream: StreamConfig::default(),
            limits: LimitsConfig::default(),
            eviction: EvictionConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            keepalive_secs: default_keepalive(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age(),
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

impl StreamConfig {
    /// Keep-alive interval.
    #[must_use]
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

impl EvictionConfig {
    /// Default inactivity threshold.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if the resulting configuration is invalid.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "waypost.toml",
            "/etc/waypost/waypost.toml",
            "~/.config/waypost/waypost.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
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

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Check the configuration for values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_plain_path(&self.endpoint) {
            return Err(ConfigError::InvalidEndpoint(self.endpoint.clone()));
        }
        if RESERVED_PATHS.contains(&self.endpoint.as_str()) {
            return Err(ConfigError::ReservedEndpoint(self.endpoint.clone()));
        }
        if self.stream.mailbox_capacity == 0 {
            return Err(ConfigError::ZeroMailboxCapacity);
        }
        if self.stream.keepalive_secs == 0 {
            return Err(ConfigError::ZeroKeepalive);
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not resolve.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let invalid = || ConfigError::InvalidAddress(format!("{}:{}", self.host, self.port));

        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| invalid())?
            .next()
            .ok_or_else(invalid)
    }
}

/// A literal route: `/` or `/`-separated non-empty segments with no
/// capture, wildcard, query or fragment syntax.
fn is_plain_path(path: &str) -> bool {
    let Some(rest) = path.strip_prefix('/') else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    rest.split('/').all(|segment| {
        !segment.is_empty()
            && !segment
                .chars()
                .any(|c| matches!(c, ':' | '*' | '?' | '#' | '{' | '}') || c.is_whitespace())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        toml::from_str("host = \"127.0.0.1\"\nport = 8080\nendpoint = \"/collect\"").unwrap()
    }

    #[test]
    fn test_default_sections() {
        let config = base();
        assert_eq!(config.stream.mailbox_capacity, 100);
        assert_eq!(config.stream.keepalive(), Duration::from_secs(15));
        assert_eq!(config.limits.max_body_bytes, 1024 * 1024);
        assert_eq!(config.eviction.max_age(), Duration::from_secs(60));
        assert!(config.metrics.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_bind_addr() {
        let addr = base().bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000
            endpoint = "/luanti/positions"

            [stream]
            keepalive_secs = 5

            [metrics]
            enabled = false
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.endpoint, "/luanti/positions");
        assert_eq!(config.stream.keepalive_secs, 5);
        assert_eq!(config.stream.mailbox_capacity, 100);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = base();
        config.endpoint = "collect".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidEndpoint(_))));

        let rejected = [
            "/*", "/collect/:", "/a/*rest/b", "/:id", "/{id}", "/collect/", "//x", "/a?b", "/a#b",
            "/a b",
        ];
        for endpoint in rejected {
            let mut config = base();
            config.endpoint = endpoint.to_string();
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidEndpoint(_))),
                "{endpoint} accepted"
            );
        }

        for endpoint in ["/", "/luanti/positions", "/v1.collect"] {
            let mut config = base();
            config.endpoint = endpoint.to_string();
            assert!(config.validate().is_ok(), "{endpoint} rejected");
        }

        let mut config = base();
        config.endpoint = "/stream".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::ReservedEndpoint(_))));

        let mut config = base();
        config.stream.mailbox_capacity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroMailboxCapacity)));

        let mut config = base();
        config.stream.keepalive_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroKeepalive)));
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("waypost-config-{}.toml", std::process::id()));
        std::fs::write(&path, "port = 8123\nendpoint = \"/collect\"\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.port, 8123);

        std::fs::write(&path, "endpoint = \"nope\"\n").unwrap();
        assert!(Config::from_file(&path).is_err());

        std::fs::remove_file(&path).unwrap();
    }
}
