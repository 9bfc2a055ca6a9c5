//! Testing utilities and mock implementations
//!
//! Lets the harness run end to end without an MQTT broker.

pub mod mocks;

pub use mocks::*;
