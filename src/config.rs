//! Configuration system for the uplink supervisor
//!
//! One TOML file with a section per component. Secrets are never stored in
//! the file: `*_env` fields name environment variables that are read when the
//! corresponding component starts.

use crate::retry::RetryPolicy;
use crate::session::mqtt::broker_address;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main supervisor configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorConfig {
    pub device: DeviceSection,
    pub network: NetworkSection,
    pub session: SessionSection,
    #[serde(default)]
    pub reporter: ReporterSection,
    #[serde(default)]
    pub actuator: ActuatorSection,
    #[serde(default)]
    pub store: StoreSection,
}

/// Device section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device identifier (must match [a-zA-Z0-9._-]+), prefix of the MQTT client id
    pub id: String,
}

/// Network link section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    /// Network identifier (SSID on radio hardware)
    pub network_id: String,
    /// Environment variable containing the network secret
    pub secret_env: Option<String>,
    /// Consecutive link losses tolerated before the link is declared failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-attempt backoff in milliseconds; attempt n uses entry n-1
    #[serde(default = "default_link_backoff")]
    pub backoff_ms: Vec<u64>,
    /// Delay used once the pattern is exhausted
    #[serde(default = "default_link_sustained")]
    pub sustained_backoff_ms: u64,
    /// host:port probed to find a routable local address (defaults to the broker)
    pub probe_addr: Option<String>,
    /// Re-probe period used to detect loss of the route
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
}

fn default_max_retries() -> u32 {
    crate::link::DEFAULT_MAX_RETRIES
}

fn default_link_backoff() -> Vec<u64> {
    RetryPolicy::default().backoff_pattern
}

fn default_link_sustained() -> u64 {
    RetryPolicy::default().sustained_delay
}

fn default_probe_interval() -> u64 {
    5
}

impl NetworkSection {
    /// Link retry policy built from this section
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: Some(self.max_retries),
            backoff_pattern: self.backoff_ms.clone(),
            sustained_delay: self.sustained_backoff_ms,
        }
    }
}

/// Session (MQTT) section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    /// MQTT broker URL with protocol and port
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Topic carrying the periodic state report
    #[serde(default = "default_state_topic")]
    pub state_topic: String,
    /// Topic filters subscribed on every connect
    #[serde(default)]
    pub subscriptions: Vec<String>,
    /// Reopen policy while the link stays up
    #[serde(default = "default_session_reconnect")]
    pub reconnect: RetryPolicy,
}

fn default_keep_alive() -> u64 {
    60
}

fn default_state_topic() -> String {
    "homeassistant/battery/state".to_string()
}

fn default_session_reconnect() -> RetryPolicy {
    RetryPolicy {
        max_attempts: Some(10),
        backoff_pattern: vec![250, 500, 1000, 2000],
        sustained_delay: 5000,
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            broker_url: "mqtt://localhost:1883".to_string(),
            username_env: None,
            password_env: None,
            keep_alive_secs: default_keep_alive(),
            state_topic: default_state_topic(),
            subscriptions: Vec::new(),
            reconnect: default_session_reconnect(),
        }
    }
}

/// Reporting scheduler section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReporterSection {
    /// Tick period in milliseconds
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,
    #[serde(default = "default_payload_on")]
    pub payload_on: String,
    #[serde(default = "default_payload_off")]
    pub payload_off: String,
    /// Retain flag on state reports
    #[serde(default)]
    pub retain: bool,
}

fn default_period_ms() -> u64 {
    1000
}

fn default_payload_on() -> String {
    "LED is ON!".to_string()
}

fn default_payload_off() -> String {
    "LED is OFF!".to_string()
}

impl Default for ReporterSection {
    fn default() -> Self {
        Self {
            period_ms: default_period_ms(),
            payload_on: default_payload_on(),
            payload_off: default_payload_off(),
            retain: false,
        }
    }
}

/// Actuator output section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActuatorSection {
    /// Value file receiving `1`/`0`; when absent the level is only logged
    pub value_path: Option<PathBuf>,
}

/// Persistent store section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreSection {
    /// Directory holding the versioned store
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("uplink-store")
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid device ID format: {0}")]
    InvalidDeviceId(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SupervisorConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SupervisorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_device_id(&self.device.id)?;
        validate_broker_url(&self.session.broker_url)?;

        if self.network.network_id.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "network.network_id must not be empty".to_string(),
            ));
        }
        if self.network.max_retries == 0 {
            return Err(ConfigError::InvalidConfig(
                "network.max_retries must be greater than zero".to_string(),
            ));
        }
        if self.network.probe_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "network.probe_interval_secs must be greater than zero".to_string(),
            ));
        }
        self.network
            .retry_policy()
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(format!("network: {e}")))?;
        self.session
            .reconnect
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(format!("session.reconnect: {e}")))?;

        if self.session.state_topic.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "session.state_topic must not be empty".to_string(),
            ));
        }
        if self.reporter.period_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "reporter.period_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Host and port probed by the host network provider
    pub fn probe_target(&self) -> Result<String, ConfigError> {
        if let Some(addr) = &self.network.probe_addr {
            return Ok(addr.clone());
        }
        let (host, port) = broker_address(&self.session.broker_url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(self.session.broker_url.clone()))?;
        Ok(format!("{host}:{port}"))
    }

    /// Network secret from the configured environment variable
    pub fn network_secret(&self) -> Option<String> {
        self.network
            .secret_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
id = "test-device"

[network]
network_id = "test-net"

[session]
broker_url = "mqtt://localhost:1883"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Validate device ID format
fn validate_device_id(device_id: &str) -> Result<(), ConfigError> {
    let valid_chars = device_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if device_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidDeviceId(format!(
            "Device ID '{device_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

fn validate_broker_url(broker_url: &str) -> Result<(), ConfigError> {
    broker_address(broker_url)
        .map(|_| ())
        .map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))
}
