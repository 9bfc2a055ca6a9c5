//! Topics and wire payloads exchanged with the broker
//!
//! The harness speaks a tiny fixed protocol: four sensor topics, each carrying a
//! small JSON document.

pub mod payloads;
pub mod topics;

pub use payloads::*;
pub use topics::*;
