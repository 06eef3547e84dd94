//! Static configuration for the proxy.
//!
//! Immutable after startup and shared read-only by every handler task.
//! The compiled-in defaults point at getdnsapi.net's public DOT resolver;
//! an optional TOML file can override any field.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. Missing fields fall back to
    /// the compiled-in defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        Ok(config)
    }
}

/// Listening configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address for the UDP listener
    #[serde(default = "default_listen")]
    pub udp_listen: SocketAddr,
    /// Address for the TCP listener
    #[serde(default = "default_listen")]
    pub tcp_listen: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            udp_listen: default_listen(),
            tcp_listen: default_listen(),
            log_level: default_log_level(),
        }
    }
}

/// Upstream DOT resolver configuration.
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    /// IP address the connection is dialed to
    #[serde(default = "default_upstream_ip")]
    pub ip: IpAddr,
    /// DOT port on the upstream resolver
    #[serde(default = "default_upstream_port")]
    pub port: u16,
    /// Hostname the upstream's certificate is verified against (never
    /// used for routing)
    #[serde(default = "default_upstream_hostname")]
    pub hostname: String,
    /// Bound on the upstream dial and on the exchange, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            ip: default_upstream_ip(),
            port: default_upstream_port(),
            hostname: default_upstream_hostname(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl UpstreamConfig {
    /// Socket address the upstream connection is dialed to.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_listen() -> SocketAddr {
    "0.0.0.0:53".parse().unwrap()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_upstream_ip() -> IpAddr {
    "185.49.141.38".parse().unwrap()
}

fn default_upstream_port() -> u16 {
    853
}

fn default_upstream_hostname() -> String {
    "getdnsapi.net".to_string()
}

fn default_timeout_ms() -> u64 {
    3000
}
