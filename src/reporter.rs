//! Console reporting of harness progress
//!
//! The harness pushes [`HarnessEvent`]s into a [`Reporter`]; reporters only
//! observe and never feed anything back into the run.

use crate::error::{ErrorKind, HarnessError};
use crate::harness::RunSummary;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Mutex;

/// Output formatting options
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Emoji markers, one human-readable line per event (default)
    #[default]
    Pretty,
    /// Single plain line per event, minimal formatting
    Compact,
    /// One JSON object per line for programmatic processing
    Json,
}

/// Result of one publish call
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PublishOutcome {
    Ok,
    Failed { cause: String },
}

/// Everything the harness tells its reporter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HarnessEvent {
    Starting,
    Connecting {
        host: String,
        port: u16,
    },
    Connected {
        host: String,
        port: u16,
    },
    Subscribed {
        topic: String,
    },
    PublishingStarted {
        rounds: u32,
    },
    PublishResult {
        topic: String,
        outcome: PublishOutcome,
    },
    RoundProgress {
        round: u32,
        total: u32,
    },
    MessageReceived {
        topic: String,
        payload: String,
        received_at: DateTime<Local>,
    },
    Draining {
        max_drain_secs: Option<u64>,
    },
    Interrupted,
    Disconnected,
    Error {
        kind: ErrorKind,
        topic: Option<String>,
        cause: String,
    },
    Finished(RunSummary),
}

impl HarnessEvent {
    /// Error event carrying the kind, topic and sanitized cause
    pub fn error(error: &HarnessError) -> Self {
        HarnessEvent::Error {
            kind: error.kind(),
            topic: error.topic().map(str::to_string),
            cause: error.cause(),
        }
    }

    /// Publish outcome event; failures carry the sanitized cause
    pub fn publish_result(topic: &str, result: &Result<(), HarnessError>) -> Self {
        let outcome = match result {
            Ok(()) => PublishOutcome::Ok,
            Err(e) => PublishOutcome::Failed { cause: e.cause() },
        };
        HarnessEvent::PublishResult {
            topic: topic.to_string(),
            outcome,
        }
    }
}

/// Receiver of harness events
pub trait Reporter: Send + Sync {
    fn report(&self, event: &HarnessEvent);
}

/// Writes events to a console-like sink
pub struct ConsoleReporter {
    out: Mutex<Box<dyn Write + Send>>,
    format: OutputFormat,
}

impl ConsoleReporter {
    pub fn new(out: Box<dyn Write + Send>, format: OutputFormat) -> Self {
        Self {
            out: Mutex::new(out),
            format,
        }
    }

    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(Box::new(std::io::stdout()), format)
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Render an event as output text (pure function)
    ///
    /// Returns `None` for events that produce no line in this format.
    pub fn render(&self, event: &HarnessEvent) -> Option<String> {
        match self.format {
            OutputFormat::Pretty => render_pretty(event),
            OutputFormat::Compact => render_compact(event),
            OutputFormat::Json => {
                Some(serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()))
            }
        }
    }
}

impl Reporter for ConsoleReporter {
    fn report(&self, event: &HarnessEvent) {
        let Some(line) = self.render(event) else {
            return;
        };
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        // A closed stdout must not take the run down with it
        if writeln!(out, "{line}").and_then(|_| out.flush()).is_err() {
            tracing::debug!("Console reporter sink is gone");
        }
    }
}

fn error_line(kind: impl std::fmt::Display, topic: Option<&str>, cause: &str) -> String {
    match topic {
        Some(topic) => format!("{kind} error on {topic}: {cause}"),
        None => format!("{kind} error: {cause}"),
    }
}

fn render_pretty(event: &HarnessEvent) -> Option<String> {
    let line = match event {
        HarnessEvent::Starting => "🚀 Starting MQTT connection test...".to_string(),
        HarnessEvent::Connecting { host, port } => {
            format!("🔗 Connecting to {host}:{port}...")
        }
        HarnessEvent::Connected { host, port } => {
            format!("✅ Connected to MQTT broker!\n📡 Broker: {host}:{port}")
        }
        HarnessEvent::Subscribed { topic } => format!("🔔 Subscribed to topic: {topic}"),
        HarnessEvent::PublishingStarted { .. } => "\n📤 Publishing test messages...".to_string(),
        HarnessEvent::PublishResult { outcome, topic } => match outcome {
            PublishOutcome::Ok => return None,
            PublishOutcome::Failed { cause } => {
                format!("❌ {}", error_line(ErrorKind::Publish, Some(topic), cause))
            }
        },
        HarnessEvent::RoundProgress { round, total } => {
            format!("📊 Message {round}/{total} published")
        }
        HarnessEvent::MessageReceived {
            topic,
            payload,
            received_at,
        } => format!("📨 [{}] {topic}: {payload}", received_at.format("%H:%M:%S")),
        HarnessEvent::Draining { max_drain_secs } => match max_drain_secs {
            Some(secs) => format!("\n✅ Test completed! Receiving messages for up to {secs}s..."),
            None => "\n✅ Test completed! Press CTRL+C to exit...".to_string(),
        },
        HarnessEvent::Interrupted => "\n🛑 Interrupted by user".to_string(),
        HarnessEvent::Disconnected => "🔌 Disconnected from MQTT broker".to_string(),
        HarnessEvent::Error { kind, topic, cause } => {
            format!("❌ {}", error_line(kind, topic.as_deref(), cause))
        }
        HarnessEvent::Finished(summary) => format!(
            "👋 Test finished: {} rounds, {} published, {} failed, {} received",
            summary.rounds_completed,
            summary.publishes_ok,
            summary.publishes_failed,
            summary.messages_received
        ),
    };
    Some(line)
}

fn render_compact(event: &HarnessEvent) -> Option<String> {
    let line = match event {
        HarnessEvent::Starting => "[STARTING]".to_string(),
        HarnessEvent::Connecting { host, port } => format!("[CONNECTING] {host}:{port}"),
        HarnessEvent::Connected { host, port } => format!("[CONNECTED] {host}:{port}"),
        HarnessEvent::Subscribed { topic } => format!("[SUBSCRIBED] {topic}"),
        HarnessEvent::PublishingStarted { rounds } => format!("[PUBLISHING] {rounds} rounds"),
        HarnessEvent::PublishResult { outcome, topic } => match outcome {
            PublishOutcome::Ok => return None,
            PublishOutcome::Failed { cause } => {
                format!("[ERROR] {}", error_line(ErrorKind::Publish, Some(topic), cause))
            }
        },
        HarnessEvent::RoundProgress { round, total } => format!("[ROUND] {round}/{total}"),
        HarnessEvent::MessageReceived {
            topic,
            payload,
            received_at,
        } => format!(
            "{} [MESSAGE] {topic} {}",
            received_at.format("%H:%M:%S"),
            payload.replace('\n', " ").trim()
        ),
        HarnessEvent::Draining { max_drain_secs } => match max_drain_secs {
            Some(secs) => format!("[DRAINING] up to {secs}s"),
            None => "[DRAINING] until interrupted".to_string(),
        },
        HarnessEvent::Interrupted => "[INTERRUPTED]".to_string(),
        HarnessEvent::Disconnected => "[DISCONNECTED]".to_string(),
        HarnessEvent::Error { kind, topic, cause } => {
            format!("[ERROR] {}", error_line(kind, topic.as_deref(), cause))
        }
        HarnessEvent::Finished(summary) => format!(
            "[FINISHED] rounds={} ok={} failed={} subscribe_failed={} received={} decode_errors={}",
            summary.rounds_completed,
            summary.publishes_ok,
            summary.publishes_failed,
            summary.subscriptions_failed,
            summary.messages_received,
            summary.decode_errors
        ),
    };
    Some(line)
}
