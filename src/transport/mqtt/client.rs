//! Impure I/O operations for the MQTT client
//!
//! This module owns the rumqttc event loop task, fires the observer hooks from
//! it, and implements [`Transport`] on top of `AsyncClient`.

use super::connection::{
    configure_mqtt_options, describe_return_code, ConnectionState, MqttClientOptions, MqttError,
};
use super::message_handler::{ErrorRoute, EventRoute, MessageHandler};
use crate::mqtt_span;
use crate::transport::{Transport, TransportObserver};
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, QoS};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// How long `disconnect` waits for the event loop task to finish
const EVENT_LOOP_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Topics awaiting a SUBACK, oldest first. One topic per SUBSCRIBE, and the
/// broker answers them in order.
type PendingSubscriptions = Mutex<VecDeque<String>>;

/// MQTT transport client backed by rumqttc
pub struct MqttClient {
    options: MqttClientOptions,
    client: Option<AsyncClient>,
    observer: Option<Arc<dyn TransportObserver>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: Option<watch::Sender<bool>>,
    event_loop_handle: Option<JoinHandle<()>>,
    pending_subscriptions: Arc<PendingSubscriptions>,
    disconnect_sent: bool,
}

impl MqttClient {
    pub fn new(options: MqttClientOptions) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            options,
            client: None,
            observer: None,
            state_tx,
            state_rx,
            shutdown_tx: None,
            event_loop_handle: None,
            pending_subscriptions: Arc::new(Mutex::new(VecDeque::new())),
            disconnect_sent: false,
        }
    }

    /// Current connection state as seen by the event loop
    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Wait for connection confirmation (CONNACK) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let outcome = tokio::time::timeout(timeout, async {
            loop {
                match &*state_rx.borrow_and_update() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Failed {
                        code: Some(code),
                        reason,
                    } => {
                        return Err(MqttError::ConnectionRefused {
                            code: *code,
                            reason: reason.clone(),
                        })
                    }
                    ConnectionState::Failed { code: None, reason } => {
                        return Err(MqttError::ConnectionFailedStr(reason.clone()))
                    }
                    ConnectionState::Disconnected => {
                        return Err(MqttError::ConnectionFailedStr(
                            "Disconnected before CONNACK".to_string(),
                        ))
                    }
                    ConnectionState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailedStr(
                "CONNACK timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    /// Spawn the task polling the rumqttc event loop until shutdown or the first error
    fn spawn_event_loop(
        mut event_loop: EventLoop,
        state_tx: watch::Sender<ConnectionState>,
        mut shutdown_rx: watch::Receiver<bool>,
        observer: Option<Arc<dyn TransportObserver>>,
        pending: Arc<PendingSubscriptions>,
        client_id: String,
    ) -> JoinHandle<()> {
        let span = mqtt_span!(operation = "event_loop", client_id = %client_id);
        let task = async move {
            info!(client_id = %client_id, "Starting MQTT event loop");
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Shutdown signal received, stopping event loop");
                            break;
                        }
                    }
                    polled = event_loop.poll() => {
                        let keep_running = match polled {
                            Ok(event) => Self::process_event_route(
                                MessageHandler::route_event(&event),
                                &state_tx,
                                observer.as_deref(),
                                &pending,
                            ),
                            Err(e) => {
                                let connected = state_tx.borrow().is_connected();
                                Self::process_error_route(
                                    MessageHandler::route_error(&e, connected),
                                    &state_tx,
                                    observer.as_deref(),
                                );
                                false
                            }
                        };
                        if !keep_running {
                            break;
                        }
                    }
                }
            }
            info!(client_id = %client_id, "MQTT event loop stopped");
        };
        tokio::spawn(task.instrument(span))
    }

    /// Apply a routed event. Returns false when the event loop should stop.
    ///
    /// The observer hears about a CONNACK before `connect` can return, so the
    /// caller's view of the outcome is never behind the client's.
    fn process_event_route(
        route: EventRoute,
        state_tx: &watch::Sender<ConnectionState>,
        observer: Option<&dyn TransportObserver>,
        pending: &PendingSubscriptions,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged { code } => {
                let state = ConnectionState::from_connack(code);
                let accepted = state.is_connected();
                if let Some(observer) = observer {
                    observer.on_connect(code);
                }
                state_tx.send_replace(state);
                if accepted {
                    info!("MQTT client connected successfully");
                } else {
                    error!(
                        code,
                        reason = describe_return_code(code),
                        "MQTT broker refused connection"
                    );
                }
                accepted
            }
            EventRoute::MessageReceived { topic, payload } => {
                debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);
                if let Some(observer) = observer {
                    observer.on_message(&topic, &payload);
                }
                true
            }
            EventRoute::DisconnectSent | EventRoute::BrokerDisconnected => {
                if matches!(route, EventRoute::BrokerDisconnected) {
                    warn!("MQTT broker disconnected client");
                }
                state_tx.send_replace(ConnectionState::Disconnected);
                if let Some(observer) = observer {
                    observer.on_disconnect(0);
                }
                false
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                failures,
            } => {
                let topic = pending
                    .lock()
                    .ok()
                    .and_then(|mut pending| pending.pop_front());
                if failures == 0 {
                    debug!(target: "mqtt_transport", "Subscription confirmed: {}", packet_id);
                    return true;
                }
                match (topic, observer) {
                    (Some(topic), Some(observer)) => {
                        debug!(packet_id, topic = %topic, "Broker refused subscription");
                        observer.on_subscribe_refused(&topic);
                    }
                    (topic, _) => warn!(packet_id, ?topic, "Broker refused subscription"),
                }
                true
            }
            EventRoute::InfrastructureEvent(event) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Apply a routed event loop error; the loop always stops afterwards
    fn process_error_route(
        route: ErrorRoute,
        state_tx: &watch::Sender<ConnectionState>,
        observer: Option<&dyn TransportObserver>,
    ) {
        match route {
            ErrorRoute::Refused { code } => {
                error!(
                    code,
                    reason = describe_return_code(code),
                    "MQTT broker refused connection"
                );
                if let Some(observer) = observer {
                    observer.on_connect(code);
                }
                state_tx.send_replace(ConnectionState::from_connack(code));
            }
            ErrorRoute::ConnectFailed(reason) => {
                error!("MQTT connection failed: {}", reason);
                state_tx.send_replace(ConnectionState::Failed { code: None, reason });
            }
            ErrorRoute::ConnectionLost(reason) => {
                warn!("MQTT connection lost: {}", reason);
                state_tx.send_replace(ConnectionState::Disconnected);
                if let Some(observer) = observer {
                    observer.on_disconnect(1);
                }
            }
        }
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<&AsyncClient, MqttError> {
        let state = self.connection_state();
        match (&self.client, state.is_connected()) {
            (Some(client), true) => Ok(client),
            _ => Err(MqttError::NotConnected { state }),
        }
    }

    async fn stop_event_loop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }

        if let Some(handle) = self.event_loop_handle.take() {
            let abort = handle.abort_handle();
            match tokio::time::timeout(EVENT_LOOP_SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Event loop task ended with error: {}", e),
                Err(_) => {
                    warn!("Event loop task didn't shut down in time, aborting");
                    abort.abort();
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    fn set_observer(&mut self, observer: Arc<dyn TransportObserver>) {
        self.observer = Some(observer);
    }

    async fn connect(
        &mut self,
        host: &str,
        port: u16,
        keep_alive_secs: u64,
    ) -> Result<(), Self::Error> {
        if self.event_loop_handle.is_some() {
            return Err(MqttError::ConnectionFailedStr(
                "Event loop already started".to_string(),
            ));
        }

        let mqtt_options = configure_mqtt_options(&self.options, host, port, keep_alive_secs)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, self.options.request_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.state_tx.send_replace(ConnectionState::Connecting);
        self.client = Some(client);
        self.shutdown_tx = Some(shutdown_tx);
        self.disconnect_sent = false;
        self.event_loop_handle = Some(Self::spawn_event_loop(
            event_loop,
            self.state_tx.clone(),
            shutdown_rx,
            self.observer.clone(),
            Arc::clone(&self.pending_subscriptions),
            self.options.client_id.clone(),
        ));

        let confirmation = Self::wait_for_connection_confirmation(
            self.state_rx.clone(),
            self.options.connect_timeout,
        )
        .await;

        if let Err(e) = confirmation {
            self.stop_event_loop().await;
            if matches!(self.connection_state(), ConnectionState::Connecting) {
                self.state_tx.send_replace(ConnectionState::Failed {
                    code: None,
                    reason: e.to_string(),
                });
            }
            return Err(e);
        }

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        if self.disconnect_sent || self.client.is_none() {
            return Ok(());
        }
        self.disconnect_sent = true;

        let mut result = Ok(());
        if self.is_connected() {
            if let Some(client) = &self.client {
                result = client
                    .disconnect()
                    .await
                    .map_err(|e| MqttError::ConnectionFailed(Box::new(e)));
            }

            // Let the event loop flush DISCONNECT and fire on_disconnect
            if let Some(handle) = self.event_loop_handle.as_mut() {
                match tokio::time::timeout(EVENT_LOOP_SHUTDOWN_TIMEOUT, handle).await {
                    Ok(_) => self.event_loop_handle = None,
                    Err(_) => warn!("DISCONNECT was not confirmed in time"),
                }
            }
        }

        self.stop_event_loop().await;
        self.state_tx.send_replace(ConnectionState::Disconnected);
        info!("MQTT client disconnected");
        result
    }

    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error> {
        let client = self.check_connection_state()?;
        if let Ok(mut pending) = self.pending_subscriptions.lock() {
            pending.push_back(topic.to_string());
        }
        if let Err(e) = client.subscribe(topic, QoS::AtMostOnce).await {
            if let Ok(mut pending) = self.pending_subscriptions.lock() {
                pending.pop_back();
            }
            return Err(MqttError::SubscriptionFailed(Box::new(e)));
        }
        debug!(target: "mqtt_transport", "Subscribed to: {}", topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        let client = self.check_connection_state()?;
        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;
        Ok(())
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}
