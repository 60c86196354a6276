//! Configuration loading from TOML files
//!
//! Config file is selected via the --config command line argument, falling
//! back to config/dev.toml. A missing or malformed file falls back to the
//! documented defaults so the service still comes up in development.

use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Site identifier used in logs and metric labels
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "smart-queue".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// WebSocket live-update listener port
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
    /// Per-subscriber unread update backlog before messages are dropped
    #[serde(default = "default_update_buffer")]
    pub update_buffer: usize,
}

fn default_http_port() -> u16 {
    8080
}

fn default_ws_port() -> u16 {
    8081
}

fn default_update_buffer() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            ws_port: default_ws_port(),
            update_buffer: default_update_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Pre-shared credential checked against the X-API-KEY header
    #[serde(default = "default_api_key")]
    pub api_key: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { api_key: default_api_key() }
    }
}

fn default_api_key() -> String {
    "SMARTQUEUE-ESP32-KEY".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CapacityConfig {
    /// Capacity for places created lazily on first reference
    #[serde(default = "default_capacity")]
    pub default: u32,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self { default: default_capacity() }
    }
}

fn default_capacity() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReservationsConfig {
    /// Fixed reservation TTL in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Interval of the proactive expiry sweep in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    120
}

fn default_sweep_interval_secs() -> u64 {
    10
}

impl Default for ReservationsConfig {
    fn default() -> Self {
        Self { ttl_secs: default_ttl_secs(), sweep_interval_secs: default_sweep_interval_secs() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub capacity: CapacityConfig,
    #[serde(default)]
    pub reservations: ReservationsConfig,
    /// Per-place capacity overrides, seeded into the registry at startup
    /// (so redirect targets exist before their first event)
    #[serde(default)]
    pub places: HashMap<String, u32>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    http_port: u16,
    ws_port: u16,
    update_buffer: usize,
    api_key: String,
    default_capacity: u32,
    reservation_ttl_secs: u64,
    sweep_interval_secs: u64,
    places: HashMap<String, u32>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            http_port: default_http_port(),
            ws_port: default_ws_port(),
            update_buffer: default_update_buffer(),
            api_key: default_api_key(),
            default_capacity: default_capacity(),
            reservation_ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            places: HashMap::new(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if toml_config.capacity.default == 0 {
            bail!("capacity.default must be positive in {}", path.display());
        }
        if let Some((place_id, _)) = toml_config.places.iter().find(|(_, cap)| **cap == 0) {
            bail!("places.{} capacity must be positive in {}", place_id, path.display());
        }

        Ok(Self {
            site_id: toml_config.site.id,
            http_port: toml_config.server.http_port,
            ws_port: toml_config.server.ws_port,
            update_buffer: toml_config.server.update_buffer,
            api_key: toml_config.auth.api_key,
            default_capacity: toml_config.capacity.default,
            reservation_ttl_secs: toml_config.reservations.ttl_secs,
            sweep_interval_secs: toml_config.reservations.sweep_interval_secs,
            places: toml_config.places,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration - tries the TOML file first, falls back to
    /// defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn ws_port(&self) -> u16 {
        self.ws_port
    }

    pub fn update_buffer(&self) -> usize {
        self.update_buffer
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn default_capacity(&self) -> u32 {
        self.default_capacity
    }

    pub fn reservation_ttl_secs(&self) -> u64 {
        self.reservation_ttl_secs
    }

    pub fn sweep_interval_secs(&self) -> u64 {
        self.sweep_interval_secs
    }

    pub fn places(&self) -> &HashMap<String, u32> {
        &self.places
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.http_port(), 8080);
        assert_eq!(config.ws_port(), 8081);
        assert_eq!(config.default_capacity(), 10);
        assert_eq!(config.reservation_ttl_secs(), 120);
        assert_eq!(config.sweep_interval_secs(), 10);
        assert!(config.places().is_empty());
    }

    #[test]
    fn test_empty_toml_uses_section_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.http_port, 8080);
        assert_eq!(config.capacity.default, 10);
        assert_eq!(config.reservations.ttl_secs, 120);
    }
}
