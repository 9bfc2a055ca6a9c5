//! Synthetic sensor readings
//!
//! Each call to [`SensorSampler::sample`] is independent: no state is carried
//! between readings and nothing is persisted.

use chrono::{DateTime, Local, SecondsFormat, TimeZone};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const TEMPERATURE_MIN: f64 = 18.0;
pub const TEMPERATURE_MAX: f64 = 28.0;
pub const HUMIDITY_MIN: u8 = 40;
pub const HUMIDITY_MAX: u8 = 80;

/// One synthetic set of sensor values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Degrees Celsius in [18.0, 28.0], one decimal place
    pub temperature: f64,
    /// Relative humidity percent in [40, 80]
    pub humidity: u8,
    pub motion_detected: bool,
    /// ISO-8601 wall-clock time the reading was taken
    pub timestamp: String,
}

/// Generates readings from the thread-local RNG and the system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorSampler;

impl SensorSampler {
    pub fn new() -> Self {
        Self
    }

    pub fn sample(&self) -> Reading {
        Self::sample_with(&mut rand::thread_rng(), Local::now())
    }

    /// Build a reading from an explicit random source and timestamp
    pub fn sample_with<R, Tz>(rng: &mut R, now: DateTime<Tz>) -> Reading
    where
        R: Rng + ?Sized,
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let raw_temperature = rng.gen_range(TEMPERATURE_MIN..=TEMPERATURE_MAX);

        Reading {
            temperature: round_to_tenth(raw_temperature),
            humidity: rng.gen_range(HUMIDITY_MIN..=HUMIDITY_MAX),
            motion_detected: rng.gen_bool(0.5),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Micros, false),
        }
    }
}

/// Round half away from zero to one decimal place
pub fn round_to_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
