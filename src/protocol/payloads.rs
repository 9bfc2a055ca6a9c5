//! JSON wire payloads published for each sensor
//!
//! Key names are part of the wire format and are kept literally:
//!
//! - temperature: `{"valore": 23.4, "unita": "°C"}`
//! - humidity: `{"valore": 61, "unita": "%"}`
//! - motion: `{"movimento_rilevato": true}`
//! - status: `{"online": true, "timestamp": "2024-05-01T10:15:30.123456+02:00"}`

use super::topics::SensorKind;
use crate::sampler::Reading;
use serde::{Deserialize, Serialize};

pub const TEMPERATURE_UNIT: &str = "°C";
pub const HUMIDITY_UNIT: &str = "%";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperaturePayload {
    #[serde(rename = "valore")]
    pub value: f64,
    #[serde(rename = "unita")]
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumidityPayload {
    #[serde(rename = "valore")]
    pub value: u8,
    #[serde(rename = "unita")]
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionPayload {
    #[serde(rename = "movimento_rilevato")]
    pub motion_detected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub online: bool,
    pub timestamp: String,
}

/// Encode the payload for one sensor from a reading
pub fn encode_payload(kind: SensorKind, reading: &Reading) -> Result<Vec<u8>, serde_json::Error> {
    match kind {
        SensorKind::Temperature => serde_json::to_vec(&TemperaturePayload {
            value: reading.temperature,
            unit: TEMPERATURE_UNIT.to_string(),
        }),
        SensorKind::Humidity => serde_json::to_vec(&HumidityPayload {
            value: reading.humidity,
            unit: HUMIDITY_UNIT.to_string(),
        }),
        SensorKind::Motion => serde_json::to_vec(&MotionPayload {
            motion_detected: reading.motion_detected,
        }),
        SensorKind::Status => serde_json::to_vec(&StatusPayload {
            online: true,
            timestamp: reading.timestamp.clone(),
        }),
    }
}
