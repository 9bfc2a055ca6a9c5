//! Error taxonomy for the harness
//!
//! Only connect failures, configuration errors and internal invariant violations
//! are fatal. Subscribe, publish and decode errors are reported where they happen
//! and the run continues.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for harness operations
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Connect error: {message}")]
    Connect {
        message: String,
        /// MQTT CONNACK return code when the broker refused the session
        code: Option<u8>,
    },

    #[error("Subscribe error on {topic}: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: BoxError,
    },

    #[error("Publish error on {topic}: {source}")]
    Publish {
        topic: String,
        #[source]
        source: BoxError,
    },

    #[error("Message decode error on {topic}: {message}")]
    MessageDecode { topic: String, message: String },

    #[error("Invariant violation: {message}")]
    InvariantViolation { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Error category used in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connect,
    Subscribe,
    Publish,
    MessageDecode,
    InvariantViolation,
    Config,
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Connect => "connect",
            ErrorKind::Subscribe => "subscribe",
            ErrorKind::Publish => "publish",
            ErrorKind::MessageDecode => "decode",
            ErrorKind::InvariantViolation => "invariant",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl HarnessError {
    /// Create connect error
    pub fn connect<S: Into<String>>(message: S) -> Self {
        Self::Connect {
            message: message.into(),
            code: None,
        }
    }

    /// Create connect error for a CONNACK refusal
    pub fn connect_refused(code: u8, reason: &str) -> Self {
        Self::Connect {
            message: format!("broker refused connection with code {code} ({reason})"),
            code: Some(code),
        }
    }

    /// Create connect error for an established session that dropped
    pub fn connection_lost(code: u8) -> Self {
        Self::Connect {
            message: format!("connection to broker lost (disconnect code {code})"),
            code: None,
        }
    }

    /// Create subscribe error
    pub fn subscribe<S, E>(topic: S, source: E) -> Self
    where
        S: Into<String>,
        E: Into<BoxError>,
    {
        Self::Subscribe {
            topic: topic.into(),
            source: source.into(),
        }
    }

    /// Create publish error
    pub fn publish<S, E>(topic: S, source: E) -> Self
    where
        S: Into<String>,
        E: Into<BoxError>,
    {
        Self::Publish {
            topic: topic.into(),
            source: source.into(),
        }
    }

    /// Create message decode error
    pub fn message_decode<S: Into<String>, M: Into<String>>(topic: S, message: M) -> Self {
        Self::MessageDecode {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create invariant violation error
    pub fn invariant<S: Into<String>>(message: S) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HarnessError::Connect { .. } => ErrorKind::Connect,
            HarnessError::Subscribe { .. } => ErrorKind::Subscribe,
            HarnessError::Publish { .. } => ErrorKind::Publish,
            HarnessError::MessageDecode { .. } => ErrorKind::MessageDecode,
            HarnessError::InvariantViolation { .. } => ErrorKind::InvariantViolation,
            HarnessError::Config(_) => ErrorKind::Config,
        }
    }

    /// Topic the error relates to, if any
    pub fn topic(&self) -> Option<&str> {
        match self {
            HarnessError::Subscribe { topic, .. }
            | HarnessError::Publish { topic, .. }
            | HarnessError::MessageDecode { topic, .. } => Some(topic),
            _ => None,
        }
    }

    /// Underlying cause, sanitized for display
    pub fn cause(&self) -> String {
        let raw = match self {
            HarnessError::Connect { message, .. } => message.clone(),
            HarnessError::Subscribe { source, .. } | HarnessError::Publish { source, .. } => {
                error_chain(source.as_ref())
            }
            HarnessError::MessageDecode { message, .. } => message.clone(),
            HarnessError::InvariantViolation { message } => message.clone(),
            HarnessError::Config(e) => e.to_string(),
        };
        sanitize_error_message(&raw)
    }

    /// Whether the error ends the run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarnessError::Connect { .. }
                | HarnessError::InvariantViolation { .. }
                | HarnessError::Config(_)
        )
    }
}

/// Flatten an error and its sources into one line
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Redact credential-looking fragments and cap the length of error text
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    sanitized = regex::Regex::new(r"(?i)(password|passwd|token|key|secret)[=:]\s*\S+")
        .expect("static regex")
        .replace_all(&sanitized, "${1}=***")
        .to_string();

    sanitized = regex::Regex::new(r"(?i)(mqtts?://)[^:@/\s]+:[^@/\s]+@")
        .expect("static regex")
        .replace_all(&sanitized, "${1}***@")
        .to_string();

    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let mut cut = 500 - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;
