//! # Synchronization Primitives
//!
//! Interrupt-safe critical section for the scheduler's shared state. The
//! implementation is supplied by the integrator through the
//! `critical-section` crate: on single-core Cortex-M targets enable
//! cortex-m's `critical-section-single-core` feature; host tests use the
//! `std` feature of `critical-section` itself.

/// Execute a closure within a critical section (interrupts masked).
///
/// Used around the event-queue operations, the chain sort, and memory-pool
/// bookkeeping — the pieces of scheduler state that producers may touch
/// from ISR context. Keep the enclosed work short to bound interrupt
/// latency.
#[inline]
pub fn critical<R>(f: impl FnOnce() -> R) -> R {
    critical_section::with(|_cs| f())
}
