//! MQTT connectivity harness
//!
//! Exercises an MQTT broker: connects, subscribes to a fixed set of sensor
//! topics, publishes rounds of synthetic sensor readings, keeps receiving until
//! stopped and then shuts down gracefully.
//!
//! # Overview
//!
//! - [`transport`] - the `Transport` seam and its rumqttc implementation
//! - [`protocol`] - topic set and JSON wire payloads
//! - [`sampler`] - synthetic sensor readings
//! - [`harness`] - the run state machine
//! - [`reporter`] - console output of harness events
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_harness::harness::{Harness, HarnessState};
//! use mqtt_harness::testing::{MockTransport, RecordingReporter};
//! use mqtt_harness::HarnessConfig;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let mut config = HarnessConfig::default();
//! config.run.publish_rounds = 1;
//! config.run.max_drain_secs = Some(1);
//!
//! let transport = MockTransport::new();
//! let reporter = Arc::new(RecordingReporter::new());
//! let mut harness = Harness::new(config, transport.clone(), reporter).unwrap();
//!
//! let summary = harness.run().await.unwrap();
//! assert_eq!(summary.publishes_ok, 4);
//! assert_eq!(harness.state(), HarnessState::Stopped);
//! # });
//! ```

pub mod config;
pub mod error;
pub mod harness;
pub mod observability;
pub mod protocol;
pub mod reporter;
pub mod sampler;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, HarnessConfig};
pub use error::{ErrorKind, HarnessError, HarnessResult};
pub use harness::{Harness, HarnessState, RunSummary, StopHandle};
pub use protocol::*;
pub use reporter::{ConsoleReporter, HarnessEvent, OutputFormat, Reporter};
pub use sampler::{Reading, SensorSampler};
pub use transport::mqtt::MqttClient;
