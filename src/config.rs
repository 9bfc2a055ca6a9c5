//! Harness configuration
//!
//! Loaded from a TOML file with per-field defaults, then overridden from the
//! command line. Every option has a default, so an empty file (or no file at all)
//! yields a usable configuration.

use crate::protocol::{TopicSet, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Main harness configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub topics: TopicSet,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    /// `mqtt://host:port`; takes precedence over `host`/`port` when set
    pub url: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Client identifier; a unique one is generated when unset
    pub client_id: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// How long the MQTT transport waits for CONNACK
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Publish loop and shutdown settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSection {
    #[serde(default = "default_publish_rounds")]
    pub publish_rounds: u32,
    #[serde(default = "default_publish_interval")]
    pub publish_interval_secs: u64,
    /// Upper bound on the drain phase; unbounded when unset
    pub max_drain_secs: Option<u64>,
    /// How long stop waits for the disconnect confirmation
    #[serde(default = "default_disconnect_timeout")]
    pub disconnect_timeout_secs: u64,
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_publish_rounds() -> u32 {
    10
}

fn default_publish_interval() -> u64 {
    2
}

fn default_disconnect_timeout() -> u64 {
    2
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            url: None,
            keep_alive_secs: default_keep_alive(),
            client_id: None,
            username_env: None,
            password_env: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            publish_rounds: default_publish_rounds(),
            publish_interval_secs: default_publish_interval(),
            max_drain_secs: None,
            disconnect_timeout_secs: default_disconnect_timeout(),
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            broker: BrokerSection::default(),
            run: RunSection::default(),
            topics: TopicSet::default(),
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
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error(transparent)]
    InvalidTopic(#[from] ValidationError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl HarnessConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: HarnessConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check option ranges, topics and the broker URL
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker_endpoint()?;

        if self.broker.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "keep_alive_secs must be at least 1".to_string(),
            ));
        }
        if self.broker.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "connect_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.run.disconnect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "disconnect_timeout_secs must be at least 1".to_string(),
            ));
        }
        if let Some(client_id) = &self.broker.client_id {
            if client_id.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "client_id must not be empty".to_string(),
                ));
            }
        }

        self.topics.validate()?;
        Ok(())
    }

    /// Resolve the broker host and port, preferring `broker.url` when present
    pub fn broker_endpoint(&self) -> Result<(String, u16), ConfigError> {
        match &self.broker.url {
            Some(url) => parse_broker_url(url),
            None => {
                if self.broker.host.trim().is_empty() {
                    return Err(ConfigError::InvalidConfig(
                        "broker host must not be empty".to_string(),
                    ));
                }
                if self.broker.port == 0 {
                    return Err(ConfigError::InvalidConfig(
                        "broker port must not be 0".to_string(),
                    ));
                }
                Ok((self.broker.host.clone(), self.broker.port))
            }
        }
    }

    /// Client identifier, generating a unique one when none is configured
    pub fn client_id(&self) -> String {
        self.broker
            .client_id
            .clone()
            .unwrap_or_else(|| format!("mqtt-harness-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Get MQTT username from environment variable
    pub fn mqtt_username(&self) -> Option<String> {
        get_env_var_optional(self.broker.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn mqtt_password(&self) -> Option<String> {
        get_env_var_optional(self.broker.password_env.as_ref())
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.run.publish_interval_secs)
    }

    pub fn max_drain(&self) -> Option<Duration> {
        self.run.max_drain_secs.map(Duration::from_secs)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.run.disconnect_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.broker.connect_timeout_secs)
    }
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

/// Parse `mqtt://host[:port]` into host and port. TLS schemes are refused.
pub fn parse_broker_url(broker_url: &str) -> Result<(String, u16), ConfigError> {
    let url =
        Url::parse(broker_url).map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

    match url.scheme() {
        "mqtt" | "tcp" => {}
        "mqtts" | "ssl" => {
            return Err(ConfigError::InvalidBrokerUrl(format!(
                "{broker_url} (TLS is not supported)"
            )))
        }
        _ => return Err(ConfigError::InvalidBrokerUrl(broker_url.to_string())),
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(1883);

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SensorKind;

    #[test]
    fn test_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.broker.host, "localhost");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.keep_alive_secs, 60);
        assert_eq!(config.run.publish_rounds, 10);
        assert_eq!(config.run.publish_interval_secs, 2);
        assert_eq!(config.run.max_drain_secs, None);
        assert_eq!(config.topics, TopicSet::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = HarnessConfig::from_toml_str("").unwrap();
        assert_eq!(config, HarnessConfig::default());
    }

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[broker]
host = "broker.lan"
port = 1884
keep_alive_secs = 30
client_id = "bench-1"
username_env = "MQTT_USERNAME"
password_env = "MQTT_PASSWORD"

[run]
publish_rounds = 3
publish_interval_secs = 5
max_drain_secs = 20

[topics]
temperature = "lab/temp"
humidity = "lab/hum"
motion = "lab/pir"
status = "lab/status"
"#;

        let config = HarnessConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.broker_endpoint().unwrap(), ("broker.lan".to_string(), 1884));
        assert_eq!(config.broker.keep_alive_secs, 30);
        assert_eq!(config.client_id(), "bench-1");
        assert_eq!(config.run.publish_rounds, 3);
        assert_eq!(config.publish_interval(), Duration::from_secs(5));
        assert_eq!(config.max_drain(), Some(Duration::from_secs(20)));
        assert_eq!(config.topics.get(SensorKind::Motion), "lab/pir");
    }

    #[test]
    fn test_url_overrides_host_and_port() {
        let config = HarnessConfig::from_toml_str(
            r#"
[broker]
host = "ignored"
url = "mqtt://10.0.0.5:2883"
"#,
        )
        .unwrap();
        assert_eq!(config.broker_endpoint().unwrap(), ("10.0.0.5".to_string(), 2883));
    }

    #[test]
    fn test_url_without_port_uses_1883() {
        assert_eq!(
            parse_broker_url("mqtt://broker").unwrap(),
            ("broker".to_string(), 1883)
        );
    }

    #[test]
    fn test_tls_url_rejected() {
        let result = parse_broker_url("mqtts://broker:8883");
        assert!(matches!(result, Err(ConfigError::InvalidBrokerUrl(_))));
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(parse_broker_url("invalid-url").is_err());
        assert!(parse_broker_url("http://broker").is_err());
    }

    #[test]
    fn test_zero_keep_alive_rejected() {
        let result = HarnessConfig::from_toml_str("[broker]\nkeep_alive_secs = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_port_rejected() {
        let result = HarnessConfig::from_toml_str("[broker]\nport = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_wildcard_topic_rejected() {
        let result = HarnessConfig::from_toml_str("[topics]\nstatus = \"devices/#\"\n");
        assert!(matches!(result, Err(ConfigError::InvalidTopic(_))));
    }

    #[test]
    fn test_generated_client_id_is_unique() {
        let config = HarnessConfig::default();
        let a = config.client_id();
        let b = config.client_id();
        assert!(a.starts_with("mqtt-harness-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_credentials_from_env() {
        let mut config = HarnessConfig::default();
        config.broker.username_env = Some("MQTT_HARNESS_TEST_USER_CFG".to_string());
        config.broker.password_env = Some("MQTT_HARNESS_TEST_MISSING_PASS_CFG".to_string());
        std::env::set_var("MQTT_HARNESS_TEST_USER_CFG", "alice");

        assert_eq!(config.mqtt_username(), Some("alice".to_string()));
        assert_eq!(config.mqtt_password(), None);
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = HarnessConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(HarnessConfig::from_toml_str(&text).unwrap(), config);
    }
}
