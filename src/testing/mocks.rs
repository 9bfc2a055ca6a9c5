//! Mock implementations for testing
//!
//! Provides a mock Transport and a recording Reporter so the harness can be
//! exercised without a broker.

use crate::reporter::{HarnessEvent, Reporter};
use crate::transport::{Transport, TransportObserver};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::time::Instant;

/// Errors returned by [`MockTransport`]
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MockTransportError {
    #[error("Mock connection failure")]
    ConnectFailed,
    #[error("Mock transport is not connected")]
    NotConnected,
    #[error("Mock subscription refused for {0}")]
    SubscribeRefused(String),
    #[error("Mock publish failure on {0}")]
    PublishFailed(String),
}

/// One call made against the mock
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Connect { host: String, port: u16, keep_alive_secs: u64 },
    Subscribe { topic: String },
    Publish { topic: String, payload: Vec<u8> },
    Disconnect,
}

/// A call with the (tokio) time it was made
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub call: MockCall,
    pub at: Instant,
}

type SharedObserver = Arc<Mutex<Option<Arc<dyn TransportObserver>>>>;

/// Mock transport for testing
///
/// Clones share recorded calls, connection state and the observer, so a test
/// can keep one clone while the harness owns another. Observer hooks fire from
/// spawned tasks like a real client's event loop.
#[derive(Clone)]
pub struct MockTransport {
    connect_code: u8,
    fail_connect: bool,
    failing_subscriptions: HashSet<String>,
    refused_subscriptions: HashSet<String>,
    failing_publishes: HashSet<String>,
    echo: bool,
    fire_on_disconnect: bool,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    connected: Arc<AtomicBool>,
    observer: SharedObserver,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            connect_code: 0,
            fail_connect: false,
            failing_subscriptions: HashSet::new(),
            refused_subscriptions: HashSet::new(),
            failing_publishes: HashSet::new(),
            echo: false,
            fire_on_disconnect: true,
            calls: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(AtomicBool::new(false)),
            observer: Arc::new(Mutex::new(None)),
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer connects with this CONNACK code
    pub fn with_connect_code(mut self, code: u8) -> Self {
        self.connect_code = code;
        self
    }

    /// Make `connect` itself return an error
    pub fn with_connect_failure() -> Self {
        Self {
            fail_connect: true,
            ..Default::default()
        }
    }

    pub fn with_failing_subscription(mut self, topic: &str) -> Self {
        self.failing_subscriptions.insert(topic.to_string());
        self
    }

    /// Accept the subscribe call but have the broker refuse it afterwards
    pub fn with_refused_subscription(mut self, topic: &str) -> Self {
        self.refused_subscriptions.insert(topic.to_string());
        self
    }

    pub fn with_failing_publish(mut self, topic: &str) -> Self {
        self.failing_publishes.insert(topic.to_string());
        self
    }

    /// Deliver every accepted publish back on subscribed topics, like a broker
    pub fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Never confirm disconnects through the observer
    pub fn without_disconnect_callback(mut self) -> Self {
        self.fire_on_disconnect = false;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Connect { .. }))
    }

    pub fn disconnect_count(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Disconnect))
    }

    pub fn subscribe_count(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Subscribe { .. }))
    }

    pub fn publish_count(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Publish { .. }))
    }

    /// Topics with an accepted subscription, in order
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Every publish call as (topic, payload, time)
    pub fn published(&self) -> Vec<(String, Vec<u8>, Instant)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|recorded| match &recorded.call {
                MockCall::Publish { topic, payload } => {
                    Some((topic.clone(), payload.clone(), recorded.at))
                }
                _ => None,
            })
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Deliver a message to the observer as if the broker sent it
    pub fn inject_message(&self, topic: &str, payload: &[u8]) {
        if let Some(observer) = self.current_observer() {
            observer.on_message(topic, payload);
        }
    }

    /// Simulate the network dropping an established session
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(observer) = self.current_observer() {
            observer.on_disconnect(1);
        }
    }

    fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|recorded| predicate(&recorded.call))
            .count()
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(RecordedCall {
            call,
            at: Instant::now(),
        });
    }

    fn current_observer(&self) -> Option<Arc<dyn TransportObserver>> {
        self.observer.lock().unwrap().clone()
    }

    /// Run a hook on a separate task
    fn fire(&self, hook: impl FnOnce(&dyn TransportObserver) + Send + 'static) {
        if let Some(observer) = self.current_observer() {
            tokio::spawn(async move { hook(observer.as_ref()) });
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    fn set_observer(&mut self, observer: Arc<dyn TransportObserver>) {
        *self.observer.lock().unwrap() = Some(observer);
    }

    async fn connect(
        &mut self,
        host: &str,
        port: u16,
        keep_alive_secs: u64,
    ) -> Result<(), Self::Error> {
        self.record(MockCall::Connect {
            host: host.to_string(),
            port,
            keep_alive_secs,
        });
        if self.fail_connect {
            return Err(MockTransportError::ConnectFailed);
        }

        let code = self.connect_code;
        self.connected.store(code == 0, Ordering::SeqCst);
        self.fire(move |observer| observer.on_connect(code));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.record(MockCall::Disconnect);
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if was_connected && self.fire_on_disconnect {
            self.fire(|observer| observer.on_disconnect(0));
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error> {
        self.record(MockCall::Subscribe {
            topic: topic.to_string(),
        });
        if !self.is_connected() {
            return Err(MockTransportError::NotConnected);
        }
        if self.failing_subscriptions.contains(topic) {
            return Err(MockTransportError::SubscribeRefused(topic.to_string()));
        }
        if self.refused_subscriptions.contains(topic) {
            let topic = topic.to_string();
            self.fire(move |observer| observer.on_subscribe_refused(&topic));
            return Ok(());
        }
        self.subscriptions.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        self.record(MockCall::Publish {
            topic: topic.to_string(),
            payload: payload.clone(),
        });
        if !self.is_connected() {
            return Err(MockTransportError::NotConnected);
        }
        if self.failing_publishes.contains(topic) {
            return Err(MockTransportError::PublishFailed(topic.to_string()));
        }

        let subscribed = self.subscriptions.lock().unwrap().iter().any(|t| t == topic);
        if self.echo && subscribed {
            let topic = topic.to_string();
            self.fire(move |observer| observer.on_message(&topic, &payload));
        }
        Ok(())
    }
}

/// Reporter that keeps every event for later assertions
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<HarnessEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HarnessEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events matching `predicate`
    pub fn filter(&self, predicate: impl Fn(&HarnessEvent) -> bool) -> Vec<HarnessEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| predicate(event))
            .cloned()
            .collect()
    }

    pub fn errors(&self) -> Vec<HarnessEvent> {
        self.filter(|event| matches!(event, HarnessEvent::Error { .. }))
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, event: &HarnessEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
