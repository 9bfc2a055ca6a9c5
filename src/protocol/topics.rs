//! Sensor topic set and topic validation
//!
//! The harness publishes to and subscribes on exactly four topics, one per
//! [`SensorKind`]. The mapping is fixed when the [`TopicSet`] is built and is
//! read-only afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Logical sensor names, in the order they are subscribed and published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Temperature,
    Humidity,
    Motion,
    Status,
}

impl SensorKind {
    /// Deterministic iteration order for subscribe and publish batches
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::Motion,
        SensorKind::Status,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::Motion => "motion",
            SensorKind::Status => "status",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub const DEFAULT_TEMPERATURE_TOPIC: &str = "casa/temperatura/soggiorno";
pub const DEFAULT_HUMIDITY_TOPIC: &str = "casa/umidita/soggiorno";
pub const DEFAULT_MOTION_TOPIC: &str = "casa/sensori/movimento";
pub const DEFAULT_STATUS_TOPIC: &str = "dispositivi/stato/online";

fn default_temperature_topic() -> String {
    DEFAULT_TEMPERATURE_TOPIC.to_string()
}

fn default_humidity_topic() -> String {
    DEFAULT_HUMIDITY_TOPIC.to_string()
}

fn default_motion_topic() -> String {
    DEFAULT_MOTION_TOPIC.to_string()
}

fn default_status_topic() -> String {
    DEFAULT_STATUS_TOPIC.to_string()
}

/// Mapping from sensor name to topic string
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicSet {
    #[serde(default = "default_temperature_topic")]
    temperature: String,
    #[serde(default = "default_humidity_topic")]
    humidity: String,
    #[serde(default = "default_motion_topic")]
    motion: String,
    #[serde(default = "default_status_topic")]
    status: String,
}

impl Default for TopicSet {
    fn default() -> Self {
        Self {
            temperature: default_temperature_topic(),
            humidity: default_humidity_topic(),
            motion: default_motion_topic(),
            status: default_status_topic(),
        }
    }
}

impl TopicSet {
    /// Build a validated topic set
    pub fn new(
        temperature: impl Into<String>,
        humidity: impl Into<String>,
        motion: impl Into<String>,
        status: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let topics = Self {
            temperature: temperature.into(),
            humidity: humidity.into(),
            motion: motion.into(),
            status: status.into(),
        };
        topics.validate()?;
        Ok(topics)
    }

    /// Topic mapped to the given sensor
    pub fn get(&self, kind: SensorKind) -> &str {
        match kind {
            SensorKind::Temperature => &self.temperature,
            SensorKind::Humidity => &self.humidity,
            SensorKind::Motion => &self.motion,
            SensorKind::Status => &self.status,
        }
    }

    /// Entries in [`SensorKind::ALL`] order
    pub fn iter(&self) -> impl Iterator<Item = (SensorKind, &str)> + '_ {
        SensorKind::ALL
            .into_iter()
            .map(move |kind| (kind, self.get(kind)))
    }

    pub fn len(&self) -> usize {
        SensorKind::ALL.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Check every topic, e.g. after deserializing from a config file
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (kind, topic) in self.iter() {
            validate_publish_topic(topic).map_err(|reason| ValidationError::InvalidTopic {
                sensor: kind,
                topic: topic.to_string(),
                reason,
            })?;
        }
        Ok(())
    }
}

/// Validate a topic name usable for both publishing and subscribing.
/// Wildcards are not allowed since the same string is used to publish.
pub fn validate_publish_topic(topic: &str) -> Result<(), String> {
    if topic.is_empty() {
        return Err("topic is empty".to_string());
    }
    if topic.len() > u16::MAX as usize {
        return Err(format!("topic is {} bytes, limit is 65535", topic.len()));
    }
    if let Some(ch) = topic.chars().find(|c| matches!(c, '+' | '#' | '\0')) {
        return Err(format!("topic contains forbidden character {ch:?}"));
    }
    Ok(())
}

/// Topic validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Invalid {sensor} topic '{topic}': {reason}")]
    InvalidTopic {
        sensor: SensorKind,
        topic: String,
        reason: String,
    },
}
