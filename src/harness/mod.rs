//! The harness drives one exercise run against a broker
//!
//! ```text
//! Idle -> Connecting -> Subscribing -> Publishing -> Draining -> Stopped
//!            \______________\______________\____________\-----> Failed
//! ```
//!
//! The caller's flow (`start`, the publish loop, `stop`) runs on the caller's
//! task. Transport callbacks land in a [`SessionObserver`] on the transport's
//! own context, which updates the shared [`Session`] and forwards messages to a
//! pump task that reports them.

pub mod session;
pub mod state;

pub use session::{ConnectOutcome, Session, SessionObserver, TransportEvent};
pub use state::HarnessState;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::harness_span;
use crate::protocol::{encode_payload, SensorKind};
use crate::reporter::{HarnessEvent, Reporter};
use crate::sampler::{Reading, SensorSampler};
use crate::transport::mqtt::{MessageHandler, MqttError};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Counters for a finished (or interrupted) run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub rounds_completed: u32,
    pub publishes_ok: u64,
    pub publishes_failed: u64,
    pub subscriptions_failed: u64,
    /// Every message delivered by the transport, including undecodable ones
    pub messages_received: u64,
    pub decode_errors: u64,
}

/// Requests a graceful stop from another task
///
/// Only sets the cancellation flag; the running [`Harness::run`] notices it at
/// its next check and performs the actual stop.
#[derive(Clone)]
pub struct StopHandle {
    session: Arc<Session>,
}

impl StopHandle {
    pub fn request_stop(&self) {
        self.session.request_cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.session.is_cancelled()
    }
}

/// MQTT exerciser owning one transport for its whole lifetime
pub struct Harness<T: Transport> {
    config: HarnessConfig,
    host: String,
    port: u16,
    transport: T,
    session: Arc<Session>,
    reporter: Arc<dyn Reporter>,
    sampler: SensorSampler,
    pump: Option<JoinHandle<()>>,
    disconnect_issued: bool,
    publishes_ok: u64,
    publishes_failed: u64,
    subscriptions_failed: u64,
}

impl<T: Transport> Harness<T> {
    /// Create a harness; the configuration is validated first
    pub fn new(
        config: HarnessConfig,
        transport: T,
        reporter: Arc<dyn Reporter>,
    ) -> HarnessResult<Self> {
        config.validate()?;
        let (host, port) = config.broker_endpoint()?;
        let session = Arc::new(Session::new(config.topics.clone()));

        Ok(Self {
            config,
            host,
            port,
            transport,
            session,
            reporter,
            sampler: SensorSampler::new(),
            pump: None,
            disconnect_issued: false,
            publishes_ok: 0,
            publishes_failed: 0,
            subscriptions_failed: 0,
        })
    }

    pub fn state(&self) -> HarnessState {
        self.session.state()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            session: Arc::clone(&self.session),
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            rounds_completed: self.session.rounds_completed(),
            publishes_ok: self.publishes_ok,
            publishes_failed: self.publishes_failed,
            subscriptions_failed: self.subscriptions_failed
                + self.session.subscriptions_refused(),
            messages_received: self.session.messages_received(),
            decode_errors: self.session.decode_errors(),
        }
    }

    /// Full run: start, publish every round, drain, stop
    ///
    /// Fatal errors are reported once and returned after the transport has been
    /// shut down. Losing the broker session after connecting is fatal too.
    pub async fn run(&mut self) -> HarnessResult<RunSummary> {
        self.reporter.report(&HarnessEvent::Starting);

        let outcome = self.drive().await;
        if outcome.is_ok() && self.session.is_cancelled() {
            self.reporter.report(&HarnessEvent::Interrupted);
        }

        self.stop().await?;
        let summary = self.summary();
        self.reporter.report(&HarnessEvent::Finished(summary));
        info!(?summary, "Harness run finished");

        outcome.map(|_| summary)
    }

    async fn drive(&mut self) -> HarnessResult<()> {
        self.start().await?;
        if self.state() != HarnessState::Publishing {
            return Ok(());
        }
        self.publish_all_rounds().await?;
        if self.session.is_cancelled() {
            return Ok(());
        }
        self.drain().await
    }

    /// Connect, wait for the broker's answer and subscribe to every topic
    ///
    /// Ends in `Publishing` on success. A refused or failed connection ends in
    /// `Failed` without any subscribe or publish. A stop requested while waiting
    /// for the broker returns early in `Connecting`.
    pub async fn start(&mut self) -> HarnessResult<()> {
        self.transition(HarnessState::Connecting)?;
        self.attach_observer();

        let span = harness_span!(phase = "connect", host = %self.host, port = self.port);
        self.reporter.report(&HarnessEvent::Connecting {
            host: self.host.clone(),
            port: self.port,
        });

        self.session
            .set_connection_state(crate::transport::ConnectionState::Connecting);
        let connected = self
            .transport
            .connect(&self.host, self.port, self.config.broker.keep_alive_secs)
            .instrument(span)
            .await;

        if let Err(e) = connected {
            let error = match self.session.connection_state() {
                crate::transport::ConnectionState::Failed {
                    code: Some(code),
                    reason,
                } => HarnessError::connect_refused(code, &reason),
                _ => HarnessError::connect(e.to_string()),
            };
            return Err(self.fail(error));
        }

        match self.session.wait_for_connect_outcome().await {
            ConnectOutcome::Connected => {}
            ConnectOutcome::Refused { code, reason } => {
                return Err(self.fail(HarnessError::connect_refused(code, &reason)))
            }
            ConnectOutcome::Failed(reason) => return Err(self.fail(HarnessError::connect(reason))),
            ConnectOutcome::Lost => {
                return Err(self.fail(HarnessError::connect(
                    "connection closed before the broker answered",
                )))
            }
            ConnectOutcome::Cancelled => {
                info!("Stop requested while waiting for the broker");
                return Ok(());
            }
        }

        info!(host = %self.host, port = self.port, "Connected to broker");
        self.reporter.report(&HarnessEvent::Connected {
            host: self.host.clone(),
            port: self.port,
        });

        self.transition(HarnessState::Subscribing)?;
        self.subscribe_all().await;
        self.transition(HarnessState::Publishing)
    }

    /// One subscribe per topic in fixed order; failures do not stop the batch
    async fn subscribe_all(&mut self) {
        let session = Arc::clone(&self.session);
        for (kind, topic) in session.topics().iter() {
            match self.transport.subscribe(topic).await {
                Ok(()) => {
                    debug!(sensor = %kind, topic, "Subscribed");
                    self.reporter.report(&HarnessEvent::Subscribed {
                        topic: topic.to_string(),
                    });
                }
                Err(e) => {
                    self.subscriptions_failed += 1;
                    let error = HarnessError::subscribe(topic, e);
                    debug!(topic, error = %error, "Subscribe failed");
                    self.reporter.report(&HarnessEvent::error(&error));
                }
            }
        }
    }

    /// Publish `publish_rounds` rounds with the configured interval between them
    pub async fn publish_all_rounds(&mut self) -> HarnessResult<()> {
        if self.state() != HarnessState::Publishing {
            return Err(self.fail(HarnessError::invariant(format!(
                "publish loop entered in phase {}",
                self.state()
            ))));
        }

        let total = self.config.run.publish_rounds;
        let interval = self.config.publish_interval();
        self.reporter
            .report(&HarnessEvent::PublishingStarted { rounds: total });

        for round in 1..=total {
            if self.session.is_cancelled() {
                info!(round, "Stop requested, leaving publish loop");
                break;
            }

            self.publish_round()
                .instrument(harness_span!(phase = "publish_round", round, total))
                .await;
            self.session.record_round();
            self.reporter
                .report(&HarnessEvent::RoundProgress { round, total });
            self.ensure_session_alive()?;

            if round < total && !self.session.sleep_unless_interrupted(interval).await {
                self.ensure_session_alive()?;
                info!(round, "Stop requested during interval, leaving publish loop");
                break;
            }
        }

        Ok(())
    }

    async fn publish_round(&mut self) {
        let reading = self.sampler.sample();
        let session = Arc::clone(&self.session);

        for (kind, topic) in session.topics().iter() {
            let result = self.publish_reading(kind, topic, &reading).await;
            match &result {
                Ok(()) => self.publishes_ok += 1,
                Err(e) => {
                    self.publishes_failed += 1;
                    debug!(topic, error = %e, "Publish failed");
                }
            }
            self.reporter
                .report(&HarnessEvent::publish_result(topic, &result));
        }
    }

    /// Publish one sensor payload, refusing to send while not connected
    async fn publish_reading(
        &self,
        kind: SensorKind,
        topic: &str,
        reading: &Reading,
    ) -> HarnessResult<()> {
        let payload = encode_payload(kind, reading).map_err(|e| HarnessError::publish(topic, e))?;

        let state = self.session.connection_state();
        if !state.is_connected() {
            return Err(HarnessError::publish(topic, MqttError::NotConnected { state }));
        }

        self.transport
            .publish(topic, payload)
            .await
            .map_err(|e| HarnessError::publish(topic, e))
    }

    /// Keep receiving until a stop is requested or the drain bound elapses
    ///
    /// A broker session lost while draining fails the run.
    pub async fn drain(&mut self) -> HarnessResult<()> {
        self.transition(HarnessState::Draining)?;
        self.reporter.report(&HarnessEvent::Draining {
            max_drain_secs: self.config.run.max_drain_secs,
        });

        let session = Arc::clone(&self.session);
        let interrupted = async move { session.interrupted().await };
        match self.config.max_drain() {
            Some(limit) => {
                if tokio::time::timeout(limit, interrupted).await.is_err() {
                    info!(?limit, "Drain period elapsed");
                }
            }
            None => interrupted.await,
        }
        self.ensure_session_alive()
    }

    /// Graceful shutdown, callable from any phase and more than once
    ///
    /// Disconnects the transport at most once over the harness lifetime and
    /// waits a bounded time for the disconnect to be confirmed. A failed run
    /// stays `Failed`.
    pub async fn stop(&mut self) -> HarnessResult<()> {
        self.session.request_cancel();
        let was_connected = self.session.connection_state().is_connected();

        if !self.disconnect_issued {
            self.disconnect_issued = true;
            if let Err(e) = self.transport.disconnect().await {
                warn!(error = %e, "Transport disconnect failed");
            }
            if was_connected
                && !self
                    .session
                    .wait_for_disconnect(self.config.disconnect_timeout())
                    .await
            {
                warn!("Disconnect was not confirmed in time");
            }
        }

        let disconnect_expected = was_connected || self.session.connection_lost().is_some();
        self.finish_pump(disconnect_expected).await;

        if self.state() != HarnessState::Failed {
            self.transition(HarnessState::Stopped)?;
        }
        Ok(())
    }

    fn transition(&self, next: HarnessState) -> HarnessResult<()> {
        self.session.transition(next).map_err(|e| self.fail(e))
    }

    /// Fail the run once the broker session has dropped
    fn ensure_session_alive(&self) -> HarnessResult<()> {
        match self.session.connection_lost() {
            Some(code) => Err(self.fail(HarnessError::connection_lost(code))),
            None => Ok(()),
        }
    }

    /// Report a fatal error once and move to `Failed`
    fn fail(&self, error: HarnessError) -> HarnessError {
        debug!(kind = %error.kind(), error = %error, "Harness failed");
        self.reporter.report(&HarnessEvent::error(&error));
        self.session.mark_failed();
        error
    }

    fn attach_observer(&mut self) {
        if self.pump.is_some() {
            return;
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let observer = SessionObserver::new(Arc::clone(&self.session), events_tx);
        self.transport.set_observer(Arc::new(observer));
        self.pump = Some(spawn_message_pump(
            events_rx,
            Arc::clone(&self.session),
            Arc::clone(&self.reporter),
        ));
    }

    /// Let the pump flush up to the disconnect event, then make sure it is gone
    async fn finish_pump(&mut self, disconnect_expected: bool) {
        let Some(handle) = self.pump.take() else {
            return;
        };
        if disconnect_expected {
            let abort = handle.abort_handle();
            if tokio::time::timeout(self.config.disconnect_timeout(), handle)
                .await
                .is_err()
            {
                debug!("Message pump still running after disconnect, aborting");
                abort.abort();
            }
        } else {
            handle.abort();
        }
    }
}

/// Report transport events off the transport's context
///
/// Ends after the first disconnect: without reconnects nothing else can arrive.
fn spawn_message_pump(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    session: Arc<Session>,
    reporter: Arc<dyn Reporter>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected(code) => {
                    debug!(code, "Broker answered connect");
                }
                TransportEvent::Message { topic, payload } => {
                    session.record_message();
                    match MessageHandler::decode_payload(&payload) {
                        Ok(text) => reporter.report(&HarnessEvent::MessageReceived {
                            topic,
                            payload: text.to_string(),
                            received_at: chrono::Local::now(),
                        }),
                        Err(reason) => {
                            session.record_decode_error();
                            let error = HarnessError::message_decode(topic, reason);
                            debug!(error = %error, "Dropping undecodable message");
                            reporter.report(&HarnessEvent::error(&error));
                        }
                    }
                }
                TransportEvent::SubscribeRefused { topic } => {
                    session.record_subscribe_refused();
                    let error = HarnessError::subscribe(topic, "broker refused the subscription");
                    debug!(error = %error, "Subscription refused");
                    reporter.report(&HarnessEvent::error(&error));
                }
                TransportEvent::Disconnected(code) => {
                    debug!(code, "Transport disconnected");
                    reporter.report(&HarnessEvent::Disconnected);
                    break;
                }
            }
        }
    })
}
