//! Ledger, sub-task model and operation templates.

/// Authoritative per-operation ledger.
pub mod ledger;
/// Declarative sub-task templates per operation kind.
pub mod plan;
/// Sub-task status model.
pub mod subtask;
