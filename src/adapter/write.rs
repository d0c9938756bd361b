use serde_json::{json, Value};

use crate::{
    adapter::DispatchRequest,
    error::StoreError,
    operation::Payload,
    types::Target,
};

pub const SENSORS: &str = "sensors";
pub const SENSOR_DOCUMENTS: &str = "sensor_documents";
pub const SENSOR_SEARCH: &str = "sensor_search";
pub const LATEST_READING: &str = "latest_reading";
/// Time-series hypertable of readings.
pub const SENSOR_DATA: &str = "sensor_data";
pub const TEMPERATURE_DATA: &str = "temperature_data";
pub const SENSOR_COUNT_BY_TYPE: &str = "sensor_count_by_type";
pub const LOW_BATTERY_SENSORS: &str = "low_battery_sensors";

/// Store-neutral write keyed by natural key. Concrete adapters translate it
/// into their native call (SQL upsert, document replace, cache SET, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Insert that must not collide with an existing row.
    Insert {
        table: &'static str,
        key: String,
        row: Value,
    },
    /// Insert or replace.
    Upsert {
        table: &'static str,
        key: String,
        row: Value,
    },
    /// Remove by key.
    Delete {
        table: &'static str,
        key: String,
        /// Fail with not-found when the row is absent.
        must_exist: bool,
    },
    /// Read by key; fails with not-found when absent.
    Lookup {
        table: &'static str,
        key: String,
    },
}

impl Write {
    pub fn table(&self) -> &'static str {
        match self {
            Self::Insert { table, .. }
            | Self::Upsert { table, .. }
            | Self::Delete { table, .. }
            | Self::Lookup { table, .. } => table,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Insert { key, .. }
            | Self::Upsert { key, .. }
            | Self::Delete { key, .. }
            | Self::Lookup { key, .. } => key,
        }
    }
}

/// Wraps the row a write replaced, so the inverse can restore it.
pub fn pre_image(previous: Option<Value>) -> Value {
    json!({ "previous": previous })
}

pub fn plan_forward(request: &DispatchRequest) -> Result<Write, StoreError> {
    let op = &request.operation;
    let sensor_key = op.sensor_id.to_string();

    let write = match (&op.payload, request.target) {
        (Payload::CreateSensor(spec), Target::SensorRow) => Write::Insert {
            table: SENSORS,
            key: sensor_key,
            row: json!({
                "sensor_id": op.sensor_id,
                "name": spec.name,
                "joined_at_ms": op.submitted_at_ms,
            }),
        },
        (Payload::CreateSensor(spec), Target::SensorDocument) => {
            spec.location.validate().map_err(StoreError::rejected)?;
            Write::Upsert {
                table: SENSOR_DOCUMENTS,
                key: sensor_key,
                row: json!({
                    "sensor_id": op.sensor_id,
                    "location": {
                        "type": "Point",
                        "coordinates": [spec.location.longitude, spec.location.latitude],
                    },
                    "sensor_type": spec.sensor_type,
                    "mac_address": spec.mac_address,
                    "manufacturer": spec.manufacturer,
                    "model": spec.model,
                    "serial_number": spec.serial_number,
                    "firmware_version": spec.firmware_version,
                    "description": spec.description,
                }),
            }
        }
        (Payload::CreateSensor(spec), Target::SearchEntry) => Write::Upsert {
            table: SENSOR_SEARCH,
            key: sensor_key,
            row: json!({
                "name": spec.name,
                "sensor_type": spec.sensor_type,
                "description": spec.description,
            }),
        },
        (Payload::RecordReading(_), Target::SensorLookup) => Write::Lookup {
            table: SENSORS,
            key: sensor_key,
        },
        (Payload::RecordReading(_), Target::MetadataLookup) => Write::Lookup {
            table: SENSOR_DOCUMENTS,
            key: sensor_key,
        },
        (Payload::RecordReading(reading), Target::LatestReading) => Write::Upsert {
            table: LATEST_READING,
            key: sensor_key,
            row: serde_json::to_value(reading)
                .map_err(|e| StoreError::rejected(format!("reading encode failed: {e}")))?,
        },
        (Payload::RecordReading(reading), Target::ReadingSeries) => Write::Upsert {
            table: SENSOR_DATA,
            key: format!("{}:{}", op.sensor_id, reading.observed_at_ms),
            row: json!({
                "sensor_id": op.sensor_id,
                "observed_at_ms": reading.observed_at_ms,
                "velocity": reading.velocity,
                "temperature": reading.temperature,
                "humidity": reading.humidity,
                "battery_level": reading.battery_level,
            }),
        },
        (Payload::RecordReading(reading), Target::TemperatureRollup) => {
            let temperature = reading
                .temperature
                .ok_or_else(|| StoreError::rejected("reading has no temperature"))?;
            Write::Upsert {
                table: TEMPERATURE_DATA,
                key: format!("{}:{}", op.sensor_id, reading.observed_at_ms),
                row: json!({
                    "sensor_id": op.sensor_id,
                    "temperature": temperature,
                    "observed_at_ms": reading.observed_at_ms,
                }),
            }
        }
        (Payload::RecordReading(reading), Target::TypeCountRollup) => {
            let sensor_type = request
                .prerequisite(Target::MetadataLookup)
                .and_then(|doc| doc.get("sensor_type"))
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    StoreError::not_found(format!("sensor type of sensor {}", op.sensor_id))
                })?;
            Write::Upsert {
                table: SENSOR_COUNT_BY_TYPE,
                key: format!("{sensor_type}:{}", op.sensor_id),
                row: json!({
                    "sensor_id": op.sensor_id,
                    "sensor_type": sensor_type,
                    "observed_at_ms": reading.observed_at_ms,
                }),
            }
        }
        (Payload::RecordReading(reading), Target::LowBatteryRollup) => Write::Upsert {
            table: LOW_BATTERY_SENSORS,
            key: format!("{}:{}", op.sensor_id, reading.observed_at_ms),
            row: json!({
                "sensor_id": op.sensor_id,
                "battery_level": reading.battery_level,
                "observed_at_ms": reading.observed_at_ms,
            }),
        },
        (Payload::DeleteSensor, Target::SensorRow) => Write::Delete {
            table: SENSORS,
            key: sensor_key,
            must_exist: true,
        },
        (Payload::DeleteSensor, Target::SensorDocument) => Write::Delete {
            table: SENSOR_DOCUMENTS,
            key: sensor_key,
            must_exist: false,
        },
        (Payload::DeleteSensor, Target::SearchEntry) => Write::Delete {
            table: SENSOR_SEARCH,
            key: sensor_key,
            must_exist: false,
        },
        (Payload::DeleteSensor, Target::LatestReading) => Write::Delete {
            table: LATEST_READING,
            key: sensor_key,
            must_exist: false,
        },
        (_, target) => {
            return Err(StoreError::rejected(format!(
                "{target} does not apply to {:?}",
                op.kind()
            )));
        }
    };
    Ok(write)
}

/// Inverse of a succeeded forward write, built from its pre-image.
///
/// Returns `None` for reads and for writes that recorded no output.
pub fn plan_inverse(request: &DispatchRequest) -> Result<Option<Write>, StoreError> {
    if request.target.is_read() {
        return Ok(None);
    }
    let Some(output) = request.forward_output.as_ref().filter(|o| !o.is_null()) else {
        return Ok(None);
    };
    let previous = output.get("previous").cloned().ok_or_else(|| {
        StoreError::CompensationFailure {
            message: format!("{} output has no pre-image", request.target),
        }
    })?;

    let forward = plan_forward(request).map_err(|e| StoreError::CompensationFailure {
        message: format!("cannot rebuild {} key: {e}", request.target),
    })?;
    let (table, key) = (forward.table(), forward.key().to_string());

    Ok(Some(if previous.is_null() {
        Write::Delete {
            table,
            key,
            must_exist: false,
        }
    } else {
        Write::Upsert {
            table,
            key,
            row: previous,
        }
    }))
}
