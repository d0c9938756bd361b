//! Shared primitive IDs, store roles, and fan-out targets.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Sensor identifier shared by every store as the join key.
pub type SensorId = u64;
/// Milliseconds since the Unix epoch.
pub type TimestampMs = u64;
/// Monotonic ledger journal sequence number.
pub type MutationSeq = u64;

/// Idempotency key of one logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Wraps a caller-supplied key.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random 128-bit key rendered as lowercase hex.
    pub fn generate() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    /// Borrowed key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<&OperationId> for OperationId {
    fn from(value: &OperationId) -> Self {
        value.clone()
    }
}

impl From<String> for OperationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// External store role. One adapter instance exists per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Sensor identity rows.
    Relational,
    /// Sensor metadata and geolocation documents.
    Document,
    /// Raw numeric readings.
    TimeSeries,
    /// Pre-aggregated analytical rollups.
    WideColumn,
    /// Most recent reading per sensor.
    Cache,
    /// Full-text sensor index.
    SearchIndex,
}

impl StoreKind {
    /// Every store role, in registry order.
    pub const ALL: [StoreKind; 6] = [
        StoreKind::Relational,
        StoreKind::Document,
        StoreKind::TimeSeries,
        StoreKind::WideColumn,
        StoreKind::Cache,
        StoreKind::SearchIndex,
    ];

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Relational => "relational",
            Self::Document => "document",
            Self::TimeSeries => "time_series",
            Self::WideColumn => "wide_column",
            Self::Cache => "cache",
            Self::SearchIndex => "search_index",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete store write (or read) one sub-task performs.
///
/// Several targets may share a store kind; the wide-column store holds three
/// independent rollup tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Identity row in the relational store.
    SensorRow,
    /// Read of the identity row; a reading for an unknown sensor stops here.
    SensorLookup,
    /// Metadata document with geolocation.
    SensorDocument,
    /// Read of the metadata document needed by dependent rollups.
    MetadataLookup,
    /// Search index entry (name, type, description).
    SearchEntry,
    /// Cached most recent reading.
    LatestReading,
    /// Time-series row of the reading.
    ReadingSeries,
    /// Temperature rollup row.
    TemperatureRollup,
    /// Sensor count by type rollup row.
    TypeCountRollup,
    /// Low battery rollup row.
    LowBatteryRollup,
}

impl Target {
    /// Store role this target is written to.
    pub fn store(self) -> StoreKind {
        match self {
            Self::SensorRow | Self::SensorLookup => StoreKind::Relational,
            Self::SensorDocument | Self::MetadataLookup => StoreKind::Document,
            Self::SearchEntry => StoreKind::SearchIndex,
            Self::LatestReading => StoreKind::Cache,
            Self::ReadingSeries => StoreKind::TimeSeries,
            Self::TemperatureRollup | Self::TypeCountRollup | Self::LowBatteryRollup => {
                StoreKind::WideColumn
            }
        }
    }

    /// True for targets that never mutate their store.
    pub fn is_read(self) -> bool {
        matches!(self, Self::SensorLookup | Self::MetadataLookup)
    }

    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SensorRow => "sensor_row",
            Self::SensorLookup => "sensor_lookup",
            Self::SensorDocument => "sensor_document",
            Self::MetadataLookup => "metadata_lookup",
            Self::SearchEntry => "search_entry",
            Self::LatestReading => "latest_reading",
            Self::ReadingSeries => "reading_series",
            Self::TemperatureRollup => "temperature_rollup",
            Self::TypeCountRollup => "type_count_rollup",
            Self::LowBatteryRollup => "low_battery_rollup",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a dispatch applies a sub-task or undoes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Original write.
    Forward,
    /// Inverse write.
    Compensate,
}

pub(crate) fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
