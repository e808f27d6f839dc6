//! # Task Record
//!
//! Per-task configuration and runtime state. Records live in the
//! scheduler's arena and are addressed only through their [`TaskId`]
//! handle — they are never copied and never removed, so the arena index
//! doubles as the admission order the chain sort uses to break priority
//! ties.

use crate::clock::Epoch;
use crate::event::TaskCallback;
use crate::fsm::StateMachine;
use crate::ringbuffer::RingBuffer;

/// Iteration sentinel: fire indefinitely, never decrement.
pub const PERIODIC: i32 = -1;

/// Iteration count for a task that should fire exactly once.
pub const SINGLESHOT: i32 = 1;

/// Stable handle to an admitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(pub(crate) u8);

impl TaskId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// What a firing executes: a plain callback, or one transition of a bound
/// state machine.
pub(crate) enum Runner<P> {
    Callback(TaskCallback<P>),
    Machine(StateMachine<P>),
}

/// Which ring-buffer condition triggers the linked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// Fire while the buffer has a front element; the element is popped
    /// for the firing and delivered as the event payload.
    AutoPop,
    /// Fire while the buffer is full.
    Full,
    /// Fire while the buffer is empty.
    Empty,
    /// Fire while the buffer holds at most this many elements. A zero
    /// threshold disables the linkage instead.
    Count(u16),
}

/// A ring buffer bound to a task together with its trigger mode.
pub(crate) struct BufferLink<'s> {
    pub(crate) buffer: RingBuffer<'s>,
    pub(crate) mode: LinkMode,
}

/// One task record in the scheduler arena.
pub(crate) struct Task<'s, P> {
    pub(crate) runner: Runner<P>,
    pub(crate) user_data: Option<P>,
    /// Pending async payload; last writer wins until a sweep consumes it.
    pub(crate) async_event: Option<P>,
    /// Epochs between time-based firings; zero fires every sweep.
    pub(crate) interval: Epoch,
    /// Remaining time-based firings, or [`PERIODIC`].
    pub(crate) iterations: i32,
    pub(crate) priority: u8,
    /// Epoch at which the current interval window opened.
    pub(crate) clock_start: Epoch,
    /// Total firings since admission.
    pub(crate) cycles: u32,
    pub(crate) enabled: bool,
    /// Set after the first firing; the inverse is the event's first-call
    /// flag.
    pub(crate) init_done: bool,
    pub(crate) link: Option<BufferLink<'s>>,
}

impl<P> Task<'_, P> {
    /// Whether the iteration budget still allows time-based firings.
    #[inline]
    pub(crate) fn has_pending_iterations(&self) -> bool {
        self.iterations > 0 || self.iterations == PERIODIC
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
