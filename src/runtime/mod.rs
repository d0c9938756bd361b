//! Single-writer async runtime, store worker pools and event stream.

/// Event stream types emitted by the runtime.
pub mod events;
/// Handle and event loop implementation.
pub mod handle;
/// Bounded per-store worker pools.
pub mod pool;
