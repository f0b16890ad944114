//! Position samples and their JSON wire body.

use serde::{Deserialize, Serialize};

use crate::{RelayError, Result};

/// Meters per second to kilometers per hour.
const MPS_TO_KMH: f64 = 3.6;

/// Raw reading from the platform positioning service.
///
/// Speed and heading arrive exactly as the platform reports them and may be
/// NaN when the device cannot estimate them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawFix {
    pub lat: f64,
    pub lng: f64,
    pub speed_mps: f64,
    pub heading_degrees: f64,
    pub timestamp_millis: i64,
}

impl RawFix {
    /// Create a fix without speed or heading estimates.
    pub fn new(lat: f64, lng: f64, timestamp_millis: i64) -> Self {
        Self { lat, lng, speed_mps: f64::NAN, heading_degrees: f64::NAN, timestamp_millis }
    }

    pub fn with_speed_mps(mut self, speed_mps: f64) -> Self {
        self.speed_mps = speed_mps;
        self
    }

    pub fn with_heading(mut self, heading_degrees: f64) -> Self {
        self.heading_degrees = heading_degrees;
        self
    }
}

/// One timestamped location reading, local or remote.
///
/// Serializes to the wire body `{"lat":..,"lng":..,"speed":..,"heading":..,"ts":..}`
/// with absent optional fields omitted. Deserializing treats a missing key and
/// an explicit `null` the same way (`None`); zero stays `Some(0.0)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct PositionSample {
    pub lat: f64,
    pub lng: f64,
    #[serde(rename = "speed", default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
    #[serde(rename = "heading", default, skip_serializing_if = "Option::is_none")]
    pub heading_degrees: Option<f64>,
    #[serde(rename = "ts", default, skip_serializing_if = "Option::is_none")]
    pub timestamp_millis: Option<i64>,
}

impl PositionSample {
    /// Build a sample from a raw platform fix.
    ///
    /// Non-finite speed or heading become absent. Speed is converted from m/s
    /// to km/h and rounded to two decimals. A fix whose coordinates are not
    /// finite, or out of range, is rejected.
    pub fn from_fix(fix: RawFix) -> Result<Self> {
        let speed_kmh = finite(fix.speed_mps).map(|mps| round_centi(mps * MPS_TO_KMH));
        let sample = Self {
            lat: fix.lat,
            lng: fix.lng,
            speed_kmh,
            heading_degrees: finite(fix.heading_degrees),
            timestamp_millis: Some(fix.timestamp_millis),
        };
        sample.validate()?;
        Ok(sample)
    }

    /// Decode and validate a JSON wire body received from the peer.
    pub fn from_wire(body: &str) -> Result<Self> {
        let sample: PositionSample = serde_json::from_str(body)?;
        sample.validate()?;
        Ok(sample)
    }

    /// Encode as the JSON wire body.
    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Range check shared by both directions. NaN fails every range, so a
    /// sample that passes serializes without `null`s.
    pub fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(RelayError::parse("position body", format!("lat {} out of range", self.lat)));
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(RelayError::parse("position body", format!("lng {} out of range", self.lng)));
        }
        if self.speed_kmh.is_some_and(|s| !(0.0..f64::INFINITY).contains(&s)) {
            return Err(RelayError::parse("position body", "speed must be finite and non-negative"));
        }
        if self.heading_degrees.is_some_and(|h| !h.is_finite()) {
            return Err(RelayError::parse("position body", "heading must be finite"));
        }
        Ok(())
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

fn round_centi(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
