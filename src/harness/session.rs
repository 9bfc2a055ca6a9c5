//! Shared run state between the harness flow and transport callbacks

use super::state::HarnessState;
use crate::error::{HarnessError, HarnessResult};
use crate::protocol::TopicSet;
use crate::transport::{ConnectionState, TransportObserver};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Transport hook forwarded to the message pump
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected(u8),
    Message { topic: String, payload: Vec<u8> },
    Disconnected(u8),
    SubscribeRefused { topic: String },
}

/// How the wait for the broker's answer ended
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    Connected,
    Refused { code: u8, reason: String },
    Failed(String),
    Lost,
    Cancelled,
}

/// State of one harness run
///
/// The phase, connection state, stop request and transport loss live in
/// `watch` channels so either side can wait on changes. Counters are plain
/// atomics.
pub struct Session {
    topics: TopicSet,
    phase: watch::Sender<HarnessState>,
    connection: watch::Sender<ConnectionState>,
    cancel: watch::Sender<bool>,
    /// Disconnect code of a broker session that ended without a stop request
    lost: watch::Sender<Option<u8>>,
    rounds_completed: AtomicU32,
    messages_received: AtomicU64,
    decode_errors: AtomicU64,
    subscriptions_refused: AtomicU64,
}

impl Session {
    pub fn new(topics: TopicSet) -> Self {
        Self {
            topics,
            phase: watch::channel(HarnessState::Idle).0,
            connection: watch::channel(ConnectionState::Disconnected).0,
            cancel: watch::channel(false).0,
            lost: watch::channel(None).0,
            rounds_completed: AtomicU32::new(0),
            messages_received: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            subscriptions_refused: AtomicU64::new(0),
        }
    }

    pub fn topics(&self) -> &TopicSet {
        &self.topics
    }

    pub fn state(&self) -> HarnessState {
        *self.phase.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<HarnessState> {
        self.phase.subscribe()
    }

    /// Move to `next`, or fail with an invariant violation if the move is illegal
    pub fn transition(&self, next: HarnessState) -> HarnessResult<()> {
        let mut from = HarnessState::Idle;
        let mut legal = false;
        self.phase.send_if_modified(|current| {
            from = *current;
            legal = current.can_transition_to(next);
            if legal && *current != next {
                *current = next;
                return true;
            }
            false
        });

        if legal {
            debug!(from = %from, to = %next, "Harness phase change");
            Ok(())
        } else {
            Err(HarnessError::invariant(format!(
                "illegal phase transition {from} -> {next}"
            )))
        }
    }

    /// Record a fatal outcome; terminal phases are left alone
    pub fn mark_failed(&self) {
        self.phase.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = HarnessState::Failed;
            true
        });
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.borrow().clone()
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        self.connection.send_replace(state);
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn request_cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once cancellation has been requested
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Record the loss of an established session; the first code wins
    pub fn mark_connection_lost(&self, result_code: u8) {
        self.lost.send_if_modified(|lost| {
            if lost.is_some() {
                return false;
            }
            *lost = Some(result_code);
            true
        });
    }

    pub fn connection_lost(&self) -> Option<u8> {
        *self.lost.borrow()
    }

    /// Resolves with the disconnect code once the session has been lost
    pub async fn lost(&self) -> u8 {
        let mut rx = self.lost.subscribe();
        let code = match rx.wait_for(Option::is_some).await {
            Ok(code) => *code,
            Err(_) => None,
        };
        code.unwrap_or(1)
    }

    fn is_interrupted(&self) -> bool {
        self.is_cancelled() || self.connection_lost().is_some()
    }

    /// Resolves on a stop request or on transport loss, whichever comes first
    pub async fn interrupted(&self) {
        tokio::select! {
            _ = self.cancelled() => {}
            _ = self.lost() => {}
        }
    }

    /// Sleep for `duration` unless stopped or disconnected first
    ///
    /// Returns `false` when a stop was requested or the transport was lost
    /// before, during or right after the sleep.
    pub async fn sleep_unless_interrupted(&self, duration: Duration) -> bool {
        if self.is_interrupted() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.interrupted() => {}
        }
        !self.is_interrupted()
    }

    /// Wait until the observer reports the broker's answer to our connect
    pub async fn wait_for_connect_outcome(&self) -> ConnectOutcome {
        let mut connection = self.connection.subscribe();
        let mut cancel = self.cancel.subscribe();
        loop {
            let state = connection.borrow_and_update().clone();
            match state {
                ConnectionState::Connected => return ConnectOutcome::Connected,
                ConnectionState::Failed {
                    code: Some(code),
                    reason,
                } => return ConnectOutcome::Refused { code, reason },
                ConnectionState::Failed { code: None, reason } => {
                    return ConnectOutcome::Failed(reason)
                }
                ConnectionState::Disconnected => return ConnectOutcome::Lost,
                ConnectionState::Connecting => {}
            }
            if *cancel.borrow_and_update() {
                return ConnectOutcome::Cancelled;
            }

            tokio::select! {
                changed = connection.changed() => {
                    if changed.is_err() {
                        return ConnectOutcome::Lost;
                    }
                }
                _ = cancel.changed() => {}
            }
        }
    }

    /// Wait up to `timeout` for the connection to leave `Connected`
    pub async fn wait_for_disconnect(&self, timeout: Duration) -> bool {
        let mut connection = self.connection.subscribe();
        tokio::time::timeout(timeout, connection.wait_for(|state| !state.is_connected()))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    pub fn record_round(&self) -> u32 {
        self.rounds_completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn rounds_completed(&self) -> u32 {
        self.rounds_completed.load(Ordering::SeqCst)
    }

    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::SeqCst);
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::SeqCst)
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::SeqCst)
    }

    pub fn record_subscribe_refused(&self) {
        self.subscriptions_refused.fetch_add(1, Ordering::SeqCst);
    }

    /// Subscriptions the broker refused after the subscribe call returned
    pub fn subscriptions_refused(&self) -> u64 {
        self.subscriptions_refused.load(Ordering::SeqCst)
    }
}

/// Transport observer feeding a [`Session`]
///
/// Connection state is written straight into the session; every hook is also
/// forwarded to the message pump so reporting happens off the transport's
/// context.
pub struct SessionObserver {
    session: Arc<Session>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl SessionObserver {
    pub fn new(session: Arc<Session>, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { session, events }
    }

    fn forward(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("Message pump is gone, dropping transport event");
        }
    }
}

impl TransportObserver for SessionObserver {
    fn on_connect(&self, result_code: u8) {
        self.session
            .set_connection_state(ConnectionState::from_connack(result_code));
        self.forward(TransportEvent::Connected(result_code));
    }

    fn on_message(&self, topic: &str, payload: &[u8]) {
        self.forward(TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
    }

    fn on_disconnect(&self, result_code: u8) {
        let was_connected = self.session.connection_state().is_connected();
        self.session
            .set_connection_state(ConnectionState::Disconnected);
        // No reconnect: a session dropped before stop is gone for good
        if result_code != 0 && was_connected && !self.session.is_cancelled() {
            info!(result_code, "Broker session lost");
            self.session.mark_connection_lost(result_code);
        }
        self.forward(TransportEvent::Disconnected(result_code));
    }

    fn on_subscribe_refused(&self, topic: &str) {
        self.forward(TransportEvent::SubscribeRefused {
            topic: topic.to_string(),
        });
    }
}
