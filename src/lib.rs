//! Multi-store write coordination for sensor data fan-out.
//!
//! One logical sensor write (create, record a reading, delete) is split into
//! per-store sub-tasks, journaled in a ledger, dispatched concurrently along a
//! dependency graph, retried with per-store backoff, and rolled back with
//! compensating writes when any store rejects it for good.
//!
//! # Examples
//!
//! Ledger bookkeeping with [`core::ledger::Ledger`]:
//! ```
//! use sensorfan::{
//!     core::{ledger::Ledger, subtask::{SubTaskStatus, SubTaskUpdate}},
//!     error::Outcome,
//!     operation::Operation,
//!     types::Target,
//! };
//!
//! let mut ledger = Ledger::new();
//! let op = Operation::delete_sensor(7).with_operation_id("del-7");
//! let id = op.operation_id.clone();
//! ledger.open(op).expect("open");
//! ledger.record(&id, Target::SensorRow, SubTaskUpdate::Dispatched).expect("dispatch");
//! let row = ledger
//!     .record(&id, Target::SensorRow, SubTaskUpdate::Settled(Outcome::Succeeded(serde_json::Value::Null)))
//!     .expect("settle");
//! assert_eq!(row.status, SubTaskStatus::Succeeded);
//! assert_eq!(row.attempt_count, 1);
//! ```
//!
//! Runtime usage with in-memory stores and a SQLite journal:
//! ```no_run
//! use sensorfan::{
//!     adapter::StoreRegistry,
//!     config::CoordinatorConfig,
//!     operation::{Operation, OperationResult},
//!     persist::sqlite::SqliteLedgerSink,
//!     runtime::handle::spawn_coordinator,
//!     sensor::Reading,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let sink = SqliteLedgerSink::open("ledger.db").expect("open sqlite");
//! let ledger = sink.load_ledger().expect("replay");
//! let handle = spawn_coordinator(
//!     ledger,
//!     StoreRegistry::in_memory(),
//!     Some(Box::new(sink)),
//!     CoordinatorConfig::default(),
//! );
//! let reading = Reading {
//!     observed_at_ms: 1,
//!     temperature: Some(21.5),
//!     humidity: None,
//!     velocity: None,
//!     battery_level: 0.9,
//! };
//! let result = handle
//!     .submit(Operation::record_reading(42, reading))
//!     .await
//!     .expect("submit");
//! assert!(matches!(result, OperationResult::Committed(_) | OperationResult::RolledBack(_)));
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```

/// Store adapter trait, registry and stub stores.
pub mod adapter;
/// Compensation planning and the reconciliation report.
pub mod compensate;
/// Runtime configuration.
pub mod config;
/// Coordinator state machine.
pub mod coordinator;
/// Ledger, sub-tasks and operation templates.
pub mod core;
/// Store error taxonomy and dispatch outcomes.
pub mod error;
/// Journaled ledger mutations.
pub mod journal;
/// Logical operations and their results.
pub mod operation;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Backoff policies and retry queue.
pub mod retry;
/// Single-writer runtime handle, worker pools and events.
pub mod runtime;
/// Sensor payloads.
pub mod sensor;
/// Shared primitive types and enums.
pub mod types;
