//! Pure connection state management for the MQTT client
//!
//! This module contains pure functions for connection state, option building
//! and CONNACK return-code handling.

use rumqttc::{ConnectReturnCode, MqttOptions};
use std::time::Duration;
use thiserror::Error;

/// Connection state as reported by transport callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// No session with the broker
    Disconnected,
    /// Connect requested, waiting for CONNACK
    Connecting,
    /// Broker accepted the session
    Connected,
    /// Broker refused the session or the network failed before CONNACK
    Failed { code: Option<u8>, reason: String },
}

impl ConnectionState {
    /// State after a CONNACK carrying `code`
    pub fn from_connack(code: u8) -> Self {
        if code == 0 {
            ConnectionState::Connected
        } else {
            ConnectionState::Failed {
                code: Some(code),
                reason: describe_return_code(code).to_string(),
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Human-readable meaning of an MQTT 3.1.1 CONNACK return code
pub fn describe_return_code(code: u8) -> &'static str {
    match code {
        0 => "connection accepted",
        1 => "unacceptable protocol version",
        2 => "identifier rejected",
        3 => "server unavailable",
        4 => "bad user name or password",
        5 => "not authorized",
        _ => "unknown return code",
    }
}

/// Numeric value of a rumqttc CONNACK return code
pub fn return_code_value(code: ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

/// Client-side settings that do not come from the connect call itself
#[derive(Debug, Clone)]
pub struct MqttClientOptions {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Bound on waiting for CONNACK inside `connect`
    pub connect_timeout: Duration,
    /// Capacity of the rumqttc request channel
    pub request_capacity: usize,
}

impl MqttClientOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            username: None,
            password: None,
            connect_timeout: Duration::from_secs(10),
            request_capacity: 10,
        }
    }

    pub fn with_credentials(mut self, username: String, password: Option<String>) -> Self {
        self.username = Some(username);
        self.password = password;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection refused by broker: {reason} (code {code})")]
    ConnectionRefused { code: u8, reason: String },
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Invalid client option: {0}")]
    InvalidOption(String),
}

/// Build rumqttc options for one connection
pub fn configure_mqtt_options(
    options: &MqttClientOptions,
    host: &str,
    port: u16,
    keep_alive_secs: u64,
) -> Result<MqttOptions, MqttError> {
    // rumqttc panics on these instead of returning an error
    if options.client_id.is_empty() || options.client_id.starts_with(' ') {
        return Err(MqttError::InvalidOption(format!(
            "client id '{}' is not valid",
            options.client_id
        )));
    }
    if keep_alive_secs == 0 {
        return Err(MqttError::InvalidOption(
            "keep alive must be at least 1 second".to_string(),
        ));
    }
    if host.is_empty() {
        return Err(MqttError::InvalidOption("broker host is empty".to_string()));
    }

    let mut mqtt_options = MqttOptions::new(options.client_id.clone(), host, port);
    mqtt_options.set_keep_alive(Duration::from_secs(keep_alive_secs));
    mqtt_options.set_clean_session(true);

    if let Some(username) = &options.username {
        let password = options.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username.clone(), password);
    }

    Ok(mqtt_options)
}
