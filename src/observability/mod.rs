//! Observability for the harness
//!
//! Structured logging to stderr with span macros for harness phases and MQTT
//! operations.

pub mod logging;

pub use logging::{init_default_logging, init_logging, level_for_verbosity, LogFormat};

// Span macros for structured logging
pub use logging::{harness_span, mqtt_span};
