//! # Event Delivery
//!
//! Every firing hands the task callback (or its state machine) one
//! [`EventInfo`] record describing why it ran and what came with it. The
//! record is built on the stack for each firing and lent to the callback —
//! there is no shared scratch area to race on.

use crate::ringbuffer::RingBuffer;

/// Why a callback was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The task's interval window closed while it was enabled with
    /// iterations remaining.
    TimeElapsed,
    /// An asynchronous event posted with `send_async` (also used for the
    /// scheduler release notification).
    Async,
    /// The task was extracted from the priority event queue.
    QueueExtraction,
    /// The linked ring buffer became full.
    BufferFull,
    /// The linked ring buffer holds at most the configured element count.
    BufferCount,
    /// The linked ring buffer had a front element; it was popped for this
    /// firing.
    BufferAutoPop,
    /// The linked ring buffer is empty.
    BufferEmpty,
    /// No trigger was pending; this is the idle hook running.
    Priority,
}

/// Trigger-specific payload carried by a firing.
///
/// `'e` is the duration of the firing; `'s` is the lifetime of the storage
/// behind a linked ring buffer.
pub enum EventData<'e, 's, P> {
    /// Nothing delivered (time-elapsed, idle, release).
    None,
    /// A payload posted through the event queue or `send_async`.
    Payload(P),
    /// The front element of the linked buffer, for an auto-pop firing. The
    /// tail advances after the callback returns.
    Element(&'e [u8]),
    /// The linked buffer itself, for full/count/empty firings, so the
    /// handler can drain or refill it in place.
    Buffer(&'e mut RingBuffer<'s>),
}

impl<P: Copy> EventData<'_, '_, P> {
    /// The posted payload, if this firing carried one.
    pub fn payload(&self) -> Option<P> {
        match self {
            EventData::Payload(p) => Some(*p),
            _ => None,
        }
    }

    /// The auto-popped element bytes, if this firing carried them.
    pub fn element(&self) -> Option<&[u8]> {
        match self {
            EventData::Element(e) => Some(e),
            _ => None,
        }
    }
}

/// The record delivered to every callback invocation.
pub struct EventInfo<'e, 's, P> {
    /// Why the callback ran.
    pub trigger: Trigger,
    /// True only on the task's very first firing after admission (or after
    /// its callback was replaced). For the idle and release hooks, true on
    /// their first invocation.
    pub first_call: bool,
    /// The opaque per-task datum configured at admission or via `set_data`.
    pub task_data: Option<P>,
    /// Trigger-specific payload.
    pub event_data: EventData<'e, 's, P>,
}

/// Signature shared by task callbacks and the idle/release hooks.
pub type TaskCallback<P> = fn(&mut EventInfo<'_, '_, P>);

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_accessor_filters_variants() {
        let data: EventData<'_, '_, u32> = EventData::Payload(7);
        assert_eq!(data.payload(), Some(7));
        assert_eq!(data.element(), None);

        let none: EventData<'_, '_, u32> = EventData::None;
        assert_eq!(none.payload(), None);

        let bytes = [1u8, 2];
        let element: EventData<'_, '_, u32> = EventData::Element(&bytes);
        assert_eq!(element.element(), Some(&bytes[..]));
        assert_eq!(element.payload(), None);
    }
}
