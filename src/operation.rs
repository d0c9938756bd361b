//! Logical multi-store operations and their caller-visible results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    compensate::ReconciliationEntry,
    sensor::{Reading, SensorSpec},
    types::{now_ms, OperationId, SensorId, Target, TimestampMs},
};

/// Operation tag, persisted with every ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Register a sensor.
    CreateSensor,
    /// Record one reading.
    RecordReading,
    /// Remove a sensor.
    DeleteSensor,
}

/// Variant-specific operation payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// New sensor description.
    CreateSensor(SensorSpec),
    /// Reading to fan out.
    RecordReading(Reading),
    /// No payload beyond the sensor id.
    DeleteSensor,
}

/// One logical write request. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Idempotency key.
    pub operation_id: OperationId,
    /// Sensor the operation targets.
    pub sensor_id: SensorId,
    /// Variant payload.
    pub payload: Payload,
    /// Submission time.
    pub submitted_at_ms: TimestampMs,
}

impl Operation {
    /// Builds an operation with a generated idempotency key.
    pub fn new(sensor_id: SensorId, payload: Payload) -> Self {
        Self {
            operation_id: OperationId::generate(),
            sensor_id,
            payload,
            submitted_at_ms: now_ms(),
        }
    }

    /// CreateSensor with a generated key.
    pub fn create_sensor(sensor_id: SensorId, spec: SensorSpec) -> Self {
        Self::new(sensor_id, Payload::CreateSensor(spec))
    }

    /// RecordReading with a generated key.
    pub fn record_reading(sensor_id: SensorId, reading: Reading) -> Self {
        Self::new(sensor_id, Payload::RecordReading(reading))
    }

    /// DeleteSensor with a generated key.
    pub fn delete_sensor(sensor_id: SensorId) -> Self {
        Self::new(sensor_id, Payload::DeleteSensor)
    }

    /// Replaces the generated key with a caller-supplied one.
    pub fn with_operation_id(mut self, operation_id: impl Into<OperationId>) -> Self {
        self.operation_id = operation_id.into();
        self
    }

    /// Operation tag.
    pub fn kind(&self) -> OperationKind {
        match self.payload {
            Payload::CreateSensor(_) => OperationKind::CreateSensor,
            Payload::RecordReading(_) => OperationKind::RecordReading,
            Payload::DeleteSensor => OperationKind::DeleteSensor,
        }
    }

    /// Reading payload, if any.
    pub fn reading(&self) -> Option<&Reading> {
        match &self.payload {
            Payload::RecordReading(reading) => Some(reading),
            _ => None,
        }
    }

    /// Rejects payloads that cannot be journaled losslessly. NaN and infinite
    /// floats have no JSON form.
    ///
    /// Out-of-range coordinates pass; the document store rejects those.
    pub fn validate(&self) -> Result<(), String> {
        match &self.payload {
            Payload::CreateSensor(spec) if !spec.location.is_finite() => Err(format!(
                "location is not finite: ({}, {})",
                spec.location.latitude, spec.location.longitude
            )),
            Payload::RecordReading(reading) => match reading.non_finite_field() {
                Some(field) => Err(format!("reading {field} is not finite")),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// True when `other` is a redelivery of this request (timestamps ignored).
    pub fn same_request(&self, other: &Operation) -> bool {
        self.operation_id == other.operation_id
            && self.sensor_id == other.sensor_id
            && self.payload == other.payload
    }
}

/// Data returned when every store applied the operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    /// Committed operation.
    pub operation_id: OperationId,
    /// Sensor it touched.
    pub sensor_id: SensorId,
    /// Operation tag.
    pub kind: OperationKind,
    /// Targets applied, in ledger order.
    pub applied: Vec<Target>,
    /// Sensor view composed for readings: identity row, metadata document
    /// and the recorded reading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor: Option<Value>,
}

/// Data returned when every applied store was undone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    /// Rolled back operation.
    pub operation_id: OperationId,
    /// Sensor it touched.
    pub sensor_id: SensorId,
    /// First permanent failure that triggered the rollback.
    pub reason: String,
    /// Targets whose writes were undone.
    pub compensated: Vec<Target>,
}

/// Caller-visible result of [`crate::runtime::handle::CoordinatorHandle::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationResult {
    /// All stores applied the operation.
    Committed(CommitSummary),
    /// The operation failed and every applied store was undone.
    RolledBack(RollbackReport),
    /// The operation failed and at least one store could not be undone.
    Abandoned(ReconciliationEntry),
    /// Accepted for background processing.
    Accepted(OperationId),
}

impl OperationResult {
    /// Operation this result belongs to.
    pub fn operation_id(&self) -> &OperationId {
        match self {
            Self::Committed(summary) => &summary.operation_id,
            Self::RolledBack(report) => &report.operation_id,
            Self::Abandoned(entry) => &entry.operation_id,
            Self::Accepted(id) => id,
        }
    }
}
