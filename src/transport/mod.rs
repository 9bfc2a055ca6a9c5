//! Transport layer for broker communication
//!
//! This module provides the transport abstraction the harness drives, and the
//! MQTT implementation built on rumqttc.

use std::sync::Arc;

pub mod mqtt;

pub use mqtt::{describe_return_code, ConnectionState};

/// Observation hooks fired by a transport
///
/// Hooks are invoked from the transport's own execution context (for
/// [`mqtt::MqttClient`], its event loop task), never from the caller of
/// [`Transport::connect`]. Implementations must be cheap and must not block.
pub trait TransportObserver: Send + Sync {
    /// Broker answered the connect request; `0` means accepted
    fn on_connect(&self, result_code: u8);

    /// A message arrived on a subscribed topic
    fn on_message(&self, topic: &str, payload: &[u8]);

    /// The session ended; `0` means a requested disconnect
    fn on_disconnect(&self, result_code: u8);

    /// The broker answered a subscribe with a failure code
    fn on_subscribe_refused(&self, _topic: &str) {}
}

/// Transport trait for broker communication
///
/// This trait provides an abstraction over the MQTT client library to enable
/// dependency injection and testing.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Register the observer receiving connect, message and disconnect hooks
    fn set_observer(&mut self, observer: Arc<dyn TransportObserver>);

    /// Connect to the broker; fails on network or authentication errors
    async fn connect(
        &mut self,
        host: &str,
        port: u16,
        keep_alive_secs: u64,
    ) -> Result<(), Self::Error>;

    /// Disconnect from the broker. Calling it again is a no-op.
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Subscribe to a topic; fails when not connected
    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error>;

    /// Publish a payload to a topic; fails when not connected
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error>;
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
