//! # coopos Configuration
//!
//! Compile-time constants governing scheduler capacity. All limits are
//! fixed at compile time — no dynamic allocation.

/// Maximum number of tasks the scheduler can admit. This bounds the task
/// arena and the chain. Must not exceed 256, since task handles index the
/// arena with a single byte.
pub const MAX_TASKS: usize = 8;

/// Capacity of the priority event queue. Events posted while the queue
/// holds this many undelivered entries are rejected with
/// [`crate::Error::QueueFull`].
pub const QUEUE_CAPACITY: usize = 8;
