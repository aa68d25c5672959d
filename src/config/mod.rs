//! Configuration module
//!
//! Handles loading and validation of the client configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub client: ClientConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_yaml(&content)?;
        info!("Configuration loaded from {:?}", path);
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.client.validate()?;
        anyhow::ensure!(
            self.simulation.players > 0,
            "simulation.players must be positive"
        );
        anyhow::ensure!(
            self.simulation.frame_rate_hz > 0,
            "simulation.frame_rate_hz must be positive"
        );
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            telemetry: TelemetryConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

/// Settings for a single player client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Identity used as the outbound topic segment and as the echo filter key.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_true")]
    pub clean_session: bool,
    /// Log every inbound message before filtering
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

fn default_hostname() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 1884 }
fn default_topic_prefix() -> String { "gigascapes".to_string() }
fn default_throttle_ms() -> u64 { 100 }
fn default_true() -> bool { true }

fn default_client_id() -> String {
    format!("ws{}", uuid::Uuid::new_v4().simple())
}

impl ClientConfig {
    /// Config with defaults and the given identity
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    pub fn with_throttle_ms(mut self, throttle_ms: u64) -> Self {
        self.throttle_ms = throttle_ms;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn throttle_period(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.client_id.is_empty(), "client_id must not be empty");
        anyhow::ensure!(
            !contains_topic_metachar(&self.client_id),
            "client_id must not contain '/', '+' or '#': {}",
            self.client_id
        );
        anyhow::ensure!(!self.topic_prefix.is_empty(), "topic_prefix must not be empty");
        anyhow::ensure!(
            !self.topic_prefix.contains('+') && !self.topic_prefix.contains('#'),
            "topic_prefix must not contain wildcards: {}",
            self.topic_prefix
        );
        anyhow::ensure!(!self.hostname.is_empty(), "hostname must not be empty");
        anyhow::ensure!(self.throttle_ms > 0, "throttle_ms must be positive");
        Ok(())
    }

    /// The view of this config handed to the transport on connect.
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            hostname: self.hostname.clone(),
            port: self.port,
            client_id: self.client_id.clone(),
            clean_session: self.clean_session,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: default_port(),
            client_id: default_client_id(),
            topic_prefix: default_topic_prefix(),
            clean_session: true,
            verbose: false,
            throttle_ms: default_throttle_ms(),
        }
    }
}

fn contains_topic_metachar(s: &str) -> bool {
    s.contains('/') || s.contains('+') || s.contains('#')
}

/// Options passed to `Transport::connect`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub hostname: String,
    pub port: u16,
    pub client_id: String,
    pub clean_session: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    pub log_file: Option<String>,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default)]
    pub enable_metrics: bool,
}

fn default_log_level() -> String { "info".to_string() }
fn default_metrics_port() -> u16 { 9090 }

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            log_file: None,
            metrics_port: default_metrics_port(),
            enable_metrics: false,
        }
    }
}

/// Demo simulation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_players")]
    pub players: usize,
    #[serde(default = "default_frame_rate")]
    pub frame_rate_hz: u32,
    /// Stop after this many seconds; run until ctrl-c when unset
    pub duration_secs: Option<u64>,
}

fn default_players() -> usize { 3 }
fn default_frame_rate() -> u32 { 60 }

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            players: default_players(),
            frame_rate_hz: default_frame_rate(),
            duration_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_yaml() {
        let config = AppConfig::from_yaml("client:\n  client_id: alice\n").unwrap();

        assert_eq!(config.client.client_id, "alice");
        assert_eq!(config.client.hostname, "127.0.0.1");
        assert_eq!(config.client.port, 1884);
        assert_eq!(config.client.topic_prefix, "gigascapes");
        assert!(config.client.clean_session);
        assert!(!config.client.verbose);
        assert_eq!(config.client.throttle_period(), Duration::from_millis(100));
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.simulation.players, 3);
    }

    #[test]
    fn test_generated_client_id() {
        let a = ClientConfig::default();
        let b = ClientConfig::default();
        assert!(a.client_id.starts_with("ws"));
        assert_ne!(a.client_id, b.client_id);
        assert!(a.validate().is_ok());
    }

    #[test]
    fn test_rejects_invalid_client_id() {
        assert!(ClientConfig::new("").validate().is_err());
        assert!(ClientConfig::new("a/b").validate().is_err());
        assert!(ClientConfig::new("a+").validate().is_err());
        assert!(ClientConfig::new("#").validate().is_err());
    }

    #[test]
    fn test_rejects_zero_throttle() {
        let config = ClientConfig::new("alice").with_throttle_ms(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_wildcard_prefix() {
        let config = ClientConfig::new("alice").with_topic_prefix("game/+");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_connect_options_mirror_config() {
        let mut config = ClientConfig::new("alice");
        config.clean_session = false;
        config.port = 1883;

        let options = config.connect_options();
        assert_eq!(options.client_id, "alice");
        assert_eq!(options.port, 1883);
        assert!(!options.clean_session);
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
client:
  hostname: "broker.local"
  port: 9001
  client_id: "bob"
  topic_prefix: "arena"
  clean_session: false
  verbose: true
  throttle_ms: 50

telemetry:
  log_level: "debug"
  json_logs: true
  enable_metrics: false

simulation:
  players: 5
  frame_rate_hz: 30
  duration_secs: 10
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.client.hostname, "broker.local");
        assert_eq!(config.client.throttle_ms, 50);
        assert!(config.client.verbose);
        assert!(config.telemetry.json_logs);
        assert_eq!(config.simulation.duration_secs, Some(10));
    }
}
