//! MQTT transport built on rumqttc
//!
//! The module separates pure functions from I/O:
//!
//! - [`connection`] - connection state, option building and CONNACK codes
//! - [`message_handler`] - pure routing of rumqttc events
//! - [`client`] - the event loop task and the [`Transport`](crate::transport::Transport) impl
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_harness::transport::mqtt::{MqttClient, MqttClientOptions};
//! use mqtt_harness::transport::Transport;
//!
//! # tokio_test::block_on(async {
//! let mut client = MqttClient::new(MqttClientOptions::new("harness-doc"));
//! client.connect("localhost", 1883, 60).await?;
//! client.subscribe("casa/temperatura/soggiorno").await?;
//! client.publish("casa/temperatura/soggiorno", b"{}".to_vec()).await?;
//! client.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{
    configure_mqtt_options, describe_return_code, ConnectionState, MqttClientOptions, MqttError,
};
pub use message_handler::{EventRoute, MessageHandler};
