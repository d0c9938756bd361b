//! Sensor payloads carried by operations.

use serde::{Deserialize, Serialize};

use crate::types::TimestampMs;

/// Battery level below which a reading lands in the low-battery rollup.
pub const LOW_BATTERY_THRESHOLD: f64 = 0.2;

/// WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl GeoPoint {
    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    /// Checks the point is a finite, in-range coordinate.
    pub fn validate(&self) -> Result<(), String> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(format!("latitude out of range: {}", self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(format!("longitude out of range: {}", self.longitude));
        }
        Ok(())
    }
}

/// Everything needed to register a new sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSpec {
    /// Human-readable unique name.
    pub name: String,
    /// Installed position.
    pub location: GeoPoint,
    /// Sensor type label, used by the type-count rollup.
    pub sensor_type: String,
    /// Hardware address.
    pub mac_address: String,
    /// Manufacturer.
    pub manufacturer: String,
    /// Model.
    pub model: String,
    /// Serial number.
    pub serial_number: String,
    /// Firmware version.
    pub firmware_version: String,
    /// Free-text description.
    pub description: String,
}

/// One numeric sample reported by a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Time the sample was taken.
    pub observed_at_ms: TimestampMs,
    /// Temperature in degrees Celsius.
    pub temperature: Option<f64>,
    /// Relative humidity.
    pub humidity: Option<f64>,
    /// Velocity.
    pub velocity: Option<f64>,
    /// Battery level in `[0, 1]`.
    pub battery_level: f64,
}

impl Reading {
    /// True when the battery level is under [`LOW_BATTERY_THRESHOLD`].
    pub fn is_low_battery(&self) -> bool {
        self.battery_level < LOW_BATTERY_THRESHOLD
    }

    /// Name of the first NaN or infinite value, if any.
    pub fn non_finite_field(&self) -> Option<&'static str> {
        [
            ("temperature", self.temperature),
            ("humidity", self.humidity),
            ("velocity", self.velocity),
            ("battery_level", Some(self.battery_level)),
        ]
        .into_iter()
        .find_map(|(name, value)| value.filter(|v| !v.is_finite()).map(|_| name))
    }
}
