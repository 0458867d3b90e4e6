//! Measurement payloads returned by `/measurement` and `/live`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One sensor sample inside a live reading window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub sensor_id: u32,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thickness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amplitude: Option<f64>,
    /// Signal quality 0–100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
}

/// A window of live samples, addressed by `startIndex`/`numPoints`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveReading {
    pub device_id: String,
    pub start_index: u32,
    pub readings: Vec<SensorReading>,
    /// Samples available on the device beyond this window.
    pub total_samples: u32,
    pub sample_rate: u32,
}

/// A single completed thickness measurement from `GET /measurement`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub measurement_id: String,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
