//! Integration tests for the MQTT client
//!
//! None of these need a running broker: they cover client creation, the
//! not-connected guards, option validation and a refused TCP connection.

use mqtt_harness::transport::mqtt::{ConnectionState, MqttClient, MqttClientOptions, MqttError};
use mqtt_harness::transport::{Transport, TransportObserver};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingObserver {
    connects: Mutex<Vec<u8>>,
}

impl TransportObserver for RecordingObserver {
    fn on_connect(&self, result_code: u8) {
        self.connects.lock().unwrap().push(result_code);
    }

    fn on_message(&self, _topic: &str, _payload: &[u8]) {}

    fn on_disconnect(&self, _result_code: u8) {}
}

#[tokio::test]
async fn test_mqtt_client_creation() {
    let client = MqttClient::new(MqttClientOptions::new("harness-test"));

    assert!(
        !client.is_connected(),
        "Client should not be connected until connect() is called"
    );
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_publish_without_connect_is_rejected() {
    let client = MqttClient::new(MqttClientOptions::new("harness-test"));

    let result = client.publish("casa/temperatura/soggiorno", b"{}".to_vec()).await;
    assert!(matches!(
        result,
        Err(MqttError::NotConnected {
            state: ConnectionState::Disconnected
        })
    ));
}

#[tokio::test]
async fn test_subscribe_without_connect_is_rejected() {
    let client = MqttClient::new(MqttClientOptions::new("harness-test"));

    let result = client.subscribe("casa/temperatura/soggiorno").await;
    assert!(matches!(result, Err(MqttError::NotConnected { .. })));
}

#[tokio::test]
async fn test_disconnect_without_connect_is_noop() {
    let mut client = MqttClient::new(MqttClientOptions::new("harness-test"));

    assert!(client.disconnect().await.is_ok());
    assert!(client.disconnect().await.is_ok());
}

#[tokio::test]
async fn test_connect_rejects_invalid_options() {
    let mut client = MqttClient::new(MqttClientOptions::new(""));

    let result = client.connect("localhost", 1883, 60).await;
    assert!(matches!(result, Err(MqttError::InvalidOption(_))));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    let mut client = MqttClient::new(MqttClientOptions::new("harness-test"));
    let result = client.connect("localhost", 1883, 0).await;
    assert!(matches!(result, Err(MqttError::InvalidOption(_))));
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let observer = Arc::new(RecordingObserver::default());
    let mut client = MqttClient::new(
        MqttClientOptions::new("harness-closed-port").with_connect_timeout(Duration::from_secs(2)),
    );
    client.set_observer(observer.clone());

    // Port 1 is essentially never listening
    let result = client.connect("127.0.0.1", 1, 5).await;

    assert!(result.is_err(), "connect to a closed port should fail");
    assert!(!client.is_connected());
    assert!(matches!(
        client.connection_state(),
        ConnectionState::Failed { code: None, .. }
    ));
    // Never reached CONNACK, so the observer heard nothing
    assert!(observer.connects.lock().unwrap().is_empty());

    assert!(client.disconnect().await.is_ok());
}
