//! Backoff policies and the cooperative retry timer queue.

/// Per-store exponential backoff policies.
pub mod policy;
/// Deadline queue of sub-tasks awaiting another attempt.
pub mod scheduler;
