//! # Scheduler Core
//!
//! The cooperative engine that ties the components together: a task arena,
//! the priority-sorted chain, the event queue, and the tick source.
//!
//! ## Sweep algorithm
//!
//! [`Scheduler::run`] repeats sweeps until a release is requested. Each
//! sweep:
//! 1. Re-sorts the chain if admissions or priority changes dirtied it
//!    (in-place bubble pass inside a critical section — the only place
//!    chain order mutates after admission).
//! 2. Visits every task in descending-priority order and performs one
//!    *step* for it.
//!
//! A step first drains at most one entry from the event queue — the
//! extracted task fires with [`Trigger::QueueExtraction`] no matter where
//! the sweep currently stands — and then arbitrates the chain task's own
//! trigger in fixed precedence: time elapsed, ring-buffer condition
//! (full → count → auto-pop → empty), async event, idle. First match wins;
//! a step never produces more than one firing for the chain task.
//!
//! ## Firing protocol
//!
//! The scheduler stamps an [`EventInfo`] record, marks the task as the one
//! executing, and invokes its callback or advances its state machine by
//! one transition. Afterwards it completes an auto-pop by discarding the
//! buffer front, latches the first-call flag, and counts the cycle.
//! Callbacks cannot reach back into the scheduler — re-entrant mutation of
//! the chain or a linked buffer is ruled out by construction.
//!
//! ## Interrupt-side entry points
//!
//! [`sys_tick`](Scheduler::sys_tick) and [`release`](Scheduler::release)
//! are single atomic operations on shared-reference receivers. Posting
//! (`enqueue`, `send_async`) mutates producer slots that the sweep reads,
//! so integrators route those through the same critical-section discipline
//! the queue uses internally.

use core::sync::atomic::{AtomicBool, Ordering};

use log::{debug, trace, warn};

use crate::clock::{deadline_reached, Clock, IMMEDIATE};
use crate::config::MAX_TASKS;
use crate::event::{EventData, EventInfo, TaskCallback, Trigger};
use crate::fsm::StateMachine;
use crate::queue::EventQueue;
use crate::ringbuffer::RingBuffer;
use crate::sync;
use crate::task::{BufferLink, LinkMode, Runner, Task, TaskId, PERIODIC, SINGLESHOT};
use crate::Error;

/// What a pending firing should place in the event record. Buffer-derived
/// payloads are resolved against the task's link at dispatch time.
#[derive(Clone, Copy)]
enum FireKind<P> {
    Bare,
    Payload(P),
    FrontElement,
    WholeBuffer,
}

/// The scheduler: task arena, chain, queue, tick source, and hooks.
///
/// `P` is the payload type carried by async and queued events and by the
/// per-task user datum. All capacities are compile-time constants from
/// `config.rs`; the structure is `const`-constructible so it can live in a
/// `static`.
pub struct Scheduler<'s, P> {
    tasks: [Option<Task<'s, P>>; MAX_TASKS],
    /// Permutation of arena indices in dispatch order.
    chain: [u8; MAX_TASKS],
    task_count: u8,
    clock: Clock,
    queue: EventQueue<P>,
    idle_callback: Option<TaskCallback<P>>,
    release_callback: Option<TaskCallback<P>>,
    current: Option<TaskId>,
    /// True while the chain is sorted.
    init: bool,
    release_requested: AtomicBool,
    first_call_idle: bool,
    first_call_released: bool,
}

impl<'s, P: Copy> Scheduler<'s, P> {
    const NO_TASK: Option<Task<'s, P>> = None;

    /// An empty scheduler with no time base. Call [`init`](Self::init)
    /// before admitting timed tasks.
    pub const fn new() -> Self {
        Self {
            tasks: [Self::NO_TASK; MAX_TASKS],
            chain: [0; MAX_TASKS],
            task_count: 0,
            clock: Clock::new(),
            queue: EventQueue::new(),
            idle_callback: None,
            release_callback: None,
            current: None,
            init: false,
            release_requested: AtomicBool::new(false),
            first_call_idle: false,
            first_call_released: false,
        }
    }

    /// Reset the scheduler and set the tick period in seconds — the
    /// duration of one epoch, i.e. of one timer-ISR period. Clears all
    /// tasks, queued events, and hooks.
    pub fn init(&mut self, tick_seconds: f32) {
        *self = Self::new();
        self.clock.set_period(tick_seconds);
        self.clock.reset();
    }

    // -----------------------------------------------------------------------
    // Tick source
    // -----------------------------------------------------------------------

    /// Feed one tick. Call exactly once per period from the timer ISR.
    #[inline]
    pub fn sys_tick(&self) {
        self.clock.advance();
    }

    /// The scheduler's tick source, for soft timers and epoch queries.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    // -----------------------------------------------------------------------
    // Hooks
    // -----------------------------------------------------------------------

    /// Install or clear the idle hook, invoked with [`Trigger::Priority`]
    /// whenever a task step finds nothing to do.
    pub fn set_idle_callback(&mut self, callback: Option<TaskCallback<P>>) {
        self.idle_callback = callback;
    }

    /// Install or clear the release hook, invoked once with
    /// [`Trigger::Async`] when [`run`](Self::run) winds down.
    pub fn set_release_callback(&mut self, callback: Option<TaskCallback<P>>) {
        self.release_callback = callback;
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    /// Admit a task that runs `callback` every `interval_seconds`,
    /// `iterations` times (or [`PERIODIC`]).
    ///
    /// A non-[`IMMEDIATE`] interval must be at least twice the tick
    /// period. The new task enters the chain ahead of earlier admissions;
    /// the next sweep re-sorts by priority.
    pub fn add_task(
        &mut self,
        callback: TaskCallback<P>,
        priority: u8,
        interval_seconds: f32,
        iterations: i32,
        enabled: bool,
        data: Option<P>,
    ) -> Result<TaskId, Error> {
        self.admit(
            Runner::Callback(callback),
            priority,
            interval_seconds,
            iterations,
            enabled,
            data,
        )
    }

    /// Admit a task meant to run only when events are posted to it:
    /// immediate interval, single-shot, initially disabled.
    pub fn add_event_task(
        &mut self,
        callback: TaskCallback<P>,
        priority: u8,
        data: Option<P>,
    ) -> Result<TaskId, Error> {
        self.admit(
            Runner::Callback(callback),
            priority,
            IMMEDIATE,
            SINGLESHOT,
            false,
            data,
        )
    }

    /// Admit a task driven by a state machine: each firing advances the
    /// machine by one transition. The task is periodic by construction.
    pub fn add_fsm_task(
        &mut self,
        machine: StateMachine<P>,
        priority: u8,
        interval_seconds: f32,
        enabled: bool,
        data: Option<P>,
    ) -> Result<TaskId, Error> {
        self.admit(
            Runner::Machine(machine),
            priority,
            interval_seconds,
            PERIODIC,
            enabled,
            data,
        )
    }

    fn admit(
        &mut self,
        runner: Runner<P>,
        priority: u8,
        interval_seconds: f32,
        iterations: i32,
        enabled: bool,
        data: Option<P>,
    ) -> Result<TaskId, Error> {
        if interval_seconds != IMMEDIATE
            && (self.clock.period() <= 0.0 || interval_seconds / 2.0 < self.clock.period())
        {
            return Err(Error::IntervalTooShort);
        }
        let slot = self.task_count as usize;
        if slot >= MAX_TASKS {
            return Err(Error::TooManyTasks);
        }
        self.tasks[slot] = Some(Task {
            runner,
            user_data: data,
            async_event: None,
            interval: self.clock.epochs_from_seconds(interval_seconds),
            iterations,
            priority,
            clock_start: self.clock.now(),
            cycles: 0,
            enabled,
            init_done: false,
            link: None,
        });
        self.task_count += 1;
        // Prepend to the chain; the sort settles the final position.
        self.chain.copy_within(0..slot, 1);
        self.chain[0] = slot as u8;
        self.init = false;
        debug!("task {} admitted (priority {})", slot, priority);
        Ok(TaskId(slot as u8))
    }

    // -----------------------------------------------------------------------
    // Task operations
    // -----------------------------------------------------------------------

    fn task_mut(&mut self, id: TaskId) -> Option<&mut Task<'s, P>> {
        self.tasks.get_mut(id.index()).and_then(Option::as_mut)
    }

    fn task_ref(&self, id: TaskId) -> Option<&Task<'s, P>> {
        self.tasks.get(id.index()).and_then(Option::as_ref)
    }

    /// Change the execution interval. Takes effect on the current window.
    pub fn set_interval(&mut self, id: TaskId, interval_seconds: f32) {
        let interval = self.clock.epochs_from_seconds(interval_seconds);
        if let Some(task) = self.task_mut(id) {
            task.interval = interval;
        }
    }

    /// Refill the iteration budget. Tasks do not remember the admission
    /// value once it is spent; set it again for another round.
    pub fn set_iterations(&mut self, id: TaskId, iterations: i32) {
        if let Some(task) = self.task_mut(id) {
            task.iterations = iterations;
        }
    }

    /// Change the task priority. Dirties the chain; the next sweep
    /// re-sorts.
    pub fn set_priority(&mut self, id: TaskId, priority: u8) {
        if let Some(task) = self.task_mut(id) {
            task.priority = priority;
            self.init = false;
        }
    }

    /// Enable or disable time-based firings. Enabling a disabled task
    /// opens a fresh interval window at the current epoch. Disabled tasks
    /// still respond to queue, buffer, and async triggers.
    pub fn set_enabled(&mut self, id: TaskId, enabled: bool) {
        let now = self.clock.now();
        if let Some(task) = self.task_mut(id) {
            if enabled && task.enabled {
                return;
            }
            task.enabled = enabled;
            task.clock_start = now;
        }
    }

    /// Replace the task callback. The task will report `first_call` again
    /// on its next firing. A bound state machine is dropped.
    pub fn set_callback(&mut self, id: TaskId, callback: TaskCallback<P>) {
        if let Some(task) = self.task_mut(id) {
            task.runner = Runner::Callback(callback);
            task.init_done = false;
        }
    }

    /// Replace the opaque per-task datum delivered with every firing.
    pub fn set_data(&mut self, id: TaskId, data: Option<P>) {
        if let Some(task) = self.task_mut(id) {
            task.user_data = data;
        }
    }

    /// Restart the task's interval window at the current epoch.
    pub fn clear_elapsed(&mut self, id: TaskId) {
        let now = self.clock.now();
        if let Some(task) = self.task_mut(id) {
            task.clock_start = now;
        }
    }

    /// Post an asynchronous event. The task fires with [`Trigger::Async`]
    /// on a following sweep even while disabled. Posting again before
    /// delivery replaces the pending payload.
    pub fn send_async(&mut self, id: TaskId, payload: P) {
        if let Some(task) = self.task_mut(id) {
            task.async_event = Some(payload);
        }
    }

    /// Post an event through the priority queue. Interrupt-safe. Delivery
    /// order is highest task priority first, FIFO within equal priority.
    pub fn enqueue(&mut self, id: TaskId, payload: P) -> Result<(), Error> {
        let result = self.queue.enqueue(id, payload);
        if result.is_err() {
            warn!("event queue full, dropping event for task {}", id.0);
        }
        result
    }

    /// Whether time-based firings are currently enabled for the task.
    pub fn is_enabled(&self, id: TaskId) -> bool {
        self.task_ref(id).map_or(false, |t| t.enabled)
    }

    /// Number of firings the task has received since admission.
    pub fn cycles(&self, id: TaskId) -> u32 {
        self.task_ref(id).map_or(0, |t| t.cycles)
    }

    /// The task currently executing, while a firing is in progress.
    pub fn current_task(&self) -> Option<TaskId> {
        self.current
    }

    /// Number of admitted tasks.
    pub fn task_count(&self) -> usize {
        self.task_count as usize
    }

    // -----------------------------------------------------------------------
    // Ring-buffer linkage
    // -----------------------------------------------------------------------

    /// Link a ring buffer to the task so its occupancy drives firings per
    /// `mode`. Returns the previously linked buffer, if any. A
    /// [`LinkMode::Count`] threshold of zero only unlinks.
    pub fn link_buffer(
        &mut self,
        id: TaskId,
        buffer: RingBuffer<'s>,
        mode: LinkMode,
    ) -> Option<RingBuffer<'s>> {
        let Some(task) = self.task_mut(id) else {
            return Some(buffer);
        };
        let previous = task.link.take().map(|l| l.buffer);
        if !matches!(mode, LinkMode::Count(0)) {
            task.link = Some(BufferLink { buffer, mode });
        }
        previous
    }

    /// Detach and return the task's linked buffer.
    pub fn unlink_buffer(&mut self, id: TaskId) -> Option<RingBuffer<'s>> {
        self.task_mut(id)?.link.take().map(|l| l.buffer)
    }

    /// The task's linked buffer, e.g. for producers to push into.
    pub fn buffer_mut(&mut self, id: TaskId) -> Option<&mut RingBuffer<'s>> {
        self.task_mut(id)?.link.as_mut().map(|l| &mut l.buffer)
    }

    /// The task's linked buffer, read-only.
    pub fn buffer(&self, id: TaskId) -> Option<&RingBuffer<'s>> {
        self.task_ref(id)?.link.as_ref().map(|l| &l.buffer)
    }

    /// The task's bound state machine, for inspection or restart.
    pub fn state_machine_mut(&mut self, id: TaskId) -> Option<&mut StateMachine<P>> {
        match &mut self.task_mut(id)?.runner {
            Runner::Machine(machine) => Some(machine),
            Runner::Callback(_) => None,
        }
    }

    // -----------------------------------------------------------------------
    // The sweep
    // -----------------------------------------------------------------------

    /// Request that [`run`](Self::run) wind down. Safe from ISR context;
    /// the current sweep finishes first.
    pub fn release(&self) {
        self.release_requested.store(true, Ordering::Relaxed);
    }

    /// Sweep the chain until a release is requested, then notify the
    /// release hook and return. This is the main loop of the application.
    pub fn run(&mut self) {
        loop {
            if self.release_requested.load(Ordering::Relaxed) {
                self.fire_release();
                return;
            }
            self.sweep();
        }
    }

    /// One full pass over the chain: sort if dirty, then one step per
    /// task. Exposed so integrators can interleave the scheduler with an
    /// outer loop instead of parking in [`run`](Self::run).
    pub fn sweep(&mut self) {
        if !self.init {
            self.sort_chain();
        }
        for position in 0..self.task_count as usize {
            let id = TaskId(self.chain[position]);
            self.step(id);
        }
    }

    /// Stable bubble pass: descending priority, admission order among
    /// equals (arena slots are handed out in admission order and never
    /// reused, so the index is the tie-break key).
    fn sort_chain(&mut self) {
        let n = self.task_count as usize;
        let Self { chain, tasks, .. } = self;
        sync::critical(|| {
            let mut swapped = true;
            while swapped {
                swapped = false;
                for i in 1..n {
                    let a = chain[i - 1];
                    let b = chain[i];
                    let pa = tasks[a as usize].as_ref().map_or(0, |t| t.priority);
                    let pb = tasks[b as usize].as_ref().map_or(0, |t| t.priority);
                    if pa < pb || (pa == pb && a > b) {
                        chain.swap(i - 1, i);
                        swapped = true;
                    }
                }
            }
        });
        self.init = true;
    }

    fn extract_queued(&mut self) -> Option<(TaskId, P)> {
        let Self { queue, tasks, .. } = self;
        queue.extract(|id| tasks[id.index()].as_ref().map_or(0, |t| t.priority))
    }

    /// One task step: drain at most one queued event, then arbitrate this
    /// task's own trigger.
    fn step(&mut self, id: TaskId) {
        // Queued events jump the chain: one extraction per step, fired for
        // whichever task it names.
        if let Some((queued, payload)) = self.extract_queued() {
            self.dispatch(queued, Trigger::QueueExtraction, FireKind::Payload(payload));
        }

        let now = self.clock.now();
        let Some(task) = self.tasks.get_mut(id.index()).and_then(Option::as_mut) else {
            return;
        };

        // Time elapsed.
        if task.enabled
            && task.has_pending_iterations()
            && deadline_reached(now, task.clock_start, task.interval)
        {
            task.clock_start = now;
            if task.iterations != PERIODIC {
                task.iterations -= 1;
                if task.iterations == 0 {
                    task.enabled = false;
                }
            }
            self.dispatch(id, Trigger::TimeElapsed, FireKind::Bare);
            return;
        }

        // Ring-buffer condition.
        if let Some((trigger, kind)) = Self::buffer_trigger(task) {
            self.dispatch(id, trigger, kind);
            return;
        }

        // Async event.
        if let Some(payload) = task.async_event.take() {
            self.dispatch(id, Trigger::Async, FireKind::Payload(payload));
            return;
        }

        // Nothing pending: idle hook.
        if let Some(idle) = self.idle_callback {
            let mut ev = EventInfo {
                trigger: Trigger::Priority,
                first_call: !self.first_call_idle,
                task_data: None,
                event_data: EventData::None,
            };
            idle(&mut ev);
            self.first_call_idle = true;
        }
    }

    /// Evaluate the linked buffer in fixed precedence: full → count →
    /// auto-pop → empty. Count fires while the buffer holds *at most* the
    /// threshold number of elements.
    fn buffer_trigger(task: &Task<'s, P>) -> Option<(Trigger, FireKind<P>)> {
        let link = task.link.as_ref()?;
        match link.mode {
            LinkMode::Full if link.buffer.is_full() => {
                Some((Trigger::BufferFull, FireKind::WholeBuffer))
            }
            LinkMode::Count(threshold) if threshold >= link.buffer.len() => {
                Some((Trigger::BufferCount, FireKind::WholeBuffer))
            }
            LinkMode::AutoPop if !link.buffer.is_empty() => {
                Some((Trigger::BufferAutoPop, FireKind::FrontElement))
            }
            LinkMode::Empty if link.buffer.is_empty() => {
                Some((Trigger::BufferEmpty, FireKind::WholeBuffer))
            }
            _ => None,
        }
    }

    /// Fire `id` once: stamp the event record, invoke the callback or
    /// advance the state machine, then finish the bookkeeping.
    fn dispatch(&mut self, id: TaskId, trigger: Trigger, kind: FireKind<P>) {
        self.current = Some(id);
        let Some(task) = self.tasks.get_mut(id.index()).and_then(Option::as_mut) else {
            self.current = None;
            return;
        };
        trace!("task {} fired ({:?})", id.0, trigger);
        let first_call = !task.init_done;
        let task_data = task.user_data;
        {
            let Task { runner, link, .. } = &mut *task;
            let event_data = match kind {
                FireKind::Bare => EventData::None,
                FireKind::Payload(payload) => EventData::Payload(payload),
                FireKind::FrontElement => match link.as_ref().and_then(|l| l.buffer.peek_front()) {
                    Some(element) => EventData::Element(element),
                    None => EventData::None,
                },
                FireKind::WholeBuffer => match link.as_mut() {
                    Some(l) => EventData::Buffer(&mut l.buffer),
                    None => EventData::None,
                },
            };
            let mut ev = EventInfo {
                trigger,
                first_call,
                task_data,
                event_data,
            };
            match runner {
                Runner::Callback(callback) => callback(&mut ev),
                Runner::Machine(machine) => machine.run(&mut ev),
            }
        }
        // An auto-pop consumes its element only after the callback is done
        // with the borrowed bytes.
        if trigger == Trigger::BufferAutoPop {
            if let Some(l) = task.link.as_mut() {
                l.buffer.discard_front();
            }
        }
        task.init_done = true;
        task.cycles = task.cycles.wrapping_add(1);
        self.current = None;
    }

    /// Final notification before [`run`](Self::run) returns: the release
    /// hook sees [`Trigger::Async`], and the chain is left dirty so a
    /// later `run` starts with a fresh sort.
    fn fire_release(&mut self) {
        self.init = false;
        self.release_requested.store(false, Ordering::Relaxed);
        if let Some(callback) = self.release_callback {
            let mut ev = EventInfo {
                trigger: Trigger::Async,
                first_call: !self.first_call_released,
                task_data: None,
                event_data: EventData::None,
            };
            callback(&mut ev);
        }
        self.first_call_idle = true;
        debug!("scheduler released");
    }
}

impl<P: Copy> Default for Scheduler<'_, P> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::{StateFn, Status};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering::Relaxed};
    use std::sync::Mutex;
    use std::vec::Vec;

    const TICK: f32 = 0.001; // 1 ms

    fn noop(_: &mut EventInfo<'_, '_, u32>) {}

    fn scheduler() -> Scheduler<'static, u32> {
        let mut s = Scheduler::new();
        s.init(TICK);
        s
    }

    #[test]
    fn periodic_task_fires_on_its_deadline() {
        static FIRINGS: AtomicU32 = AtomicU32::new(0);
        fn cb(ev: &mut EventInfo<'_, '_, u32>) {
            assert_eq!(ev.trigger, Trigger::TimeElapsed);
            FIRINGS.fetch_add(1, Relaxed);
        }

        let mut s = scheduler();
        let id = s.add_task(cb, 1, 0.010, PERIODIC, true, None).unwrap();

        for t in 1..=25u32 {
            s.sys_tick();
            s.sweep();
            // Fires exactly when each 10-tick window closes.
            assert_eq!(FIRINGS.load(Relaxed), t / 10, "at epoch {}", t);
        }
        assert_eq!(FIRINGS.load(Relaxed), 2);
        assert_eq!(s.cycles(id), 2);
    }

    #[test]
    fn iteration_budget_exhausts_and_disables() {
        static FIRINGS: AtomicU32 = AtomicU32::new(0);
        fn cb(_: &mut EventInfo<'_, '_, u32>) {
            FIRINGS.fetch_add(1, Relaxed);
        }

        let mut s = scheduler();
        let id = s.add_task(cb, 1, 0.010, 3, true, None).unwrap();

        for _ in 0..40 {
            s.sys_tick();
            s.sweep();
        }
        assert_eq!(FIRINGS.load(Relaxed), 3);
        assert!(!s.is_enabled(id));

        // A fresh budget re-arms the task.
        s.set_iterations(id, 1);
        s.set_enabled(id, true);
        for _ in 0..10 {
            s.sys_tick();
            s.sweep();
        }
        assert_eq!(FIRINGS.load(Relaxed), 4);
        assert!(!s.is_enabled(id));
    }

    #[test]
    fn chain_sorts_by_descending_priority() {
        static ORDER: Mutex<Vec<u32>> = Mutex::new(Vec::new());
        fn cb(ev: &mut EventInfo<'_, '_, u32>) {
            ORDER.lock().unwrap().push(ev.task_data.unwrap());
        }

        let mut s = scheduler();
        s.add_task(cb, 10, IMMEDIATE, PERIODIC, true, Some(0)).unwrap(); // A
        s.add_task(cb, 50, IMMEDIATE, PERIODIC, true, Some(1)).unwrap(); // B
        s.add_task(cb, 30, IMMEDIATE, PERIODIC, true, Some(2)).unwrap(); // C
        s.sweep();

        assert_eq!(*ORDER.lock().unwrap(), [1, 2, 0]); // B, C, A
    }

    #[test]
    fn equal_priorities_keep_admission_order() {
        static ORDER: Mutex<Vec<u32>> = Mutex::new(Vec::new());
        fn cb(ev: &mut EventInfo<'_, '_, u32>) {
            ORDER.lock().unwrap().push(ev.task_data.unwrap());
        }

        let mut s = scheduler();
        s.add_task(cb, 5, IMMEDIATE, PERIODIC, true, Some(0)).unwrap();
        s.add_task(cb, 9, IMMEDIATE, PERIODIC, true, Some(1)).unwrap();
        s.add_task(cb, 5, IMMEDIATE, PERIODIC, true, Some(2)).unwrap();
        s.add_task(cb, 9, IMMEDIATE, PERIODIC, true, Some(3)).unwrap();
        s.sweep();

        assert_eq!(*ORDER.lock().unwrap(), [1, 3, 0, 2]);
    }

    #[test]
    fn priority_change_resorts_the_chain() {
        static ORDER: Mutex<Vec<u32>> = Mutex::new(Vec::new());
        fn cb(ev: &mut EventInfo<'_, '_, u32>) {
            ORDER.lock().unwrap().push(ev.task_data.unwrap());
        }

        let mut s = scheduler();
        let low = s.add_task(cb, 1, IMMEDIATE, PERIODIC, true, Some(0)).unwrap();
        s.add_task(cb, 5, IMMEDIATE, PERIODIC, true, Some(1)).unwrap();
        s.sweep();
        assert_eq!(*ORDER.lock().unwrap(), [1, 0]);

        s.set_priority(low, 9);
        s.sweep();
        assert_eq!(*ORDER.lock().unwrap(), [1, 0, 0, 1]);
    }

    #[test]
    fn queued_events_reach_disabled_tasks() {
        static PAYLOAD: AtomicU32 = AtomicU32::new(0);
        fn cb(ev: &mut EventInfo<'_, '_, u32>) {
            assert_eq!(ev.trigger, Trigger::QueueExtraction);
            PAYLOAD.store(ev.event_data.payload().unwrap(), Relaxed);
        }

        let mut s = scheduler();
        let id = s.add_event_task(cb, 4, None).unwrap();
        assert!(!s.is_enabled(id));

        s.enqueue(id, 77).unwrap();
        s.sweep();
        assert_eq!(PAYLOAD.load(Relaxed), 77);
        assert_eq!(s.cycles(id), 1);
    }

    #[test]
    fn queue_extraction_is_fifo_within_priority() {
        static ORDER: Mutex<Vec<u32>> = Mutex::new(Vec::new());
        fn cb(ev: &mut EventInfo<'_, '_, u32>) {
            let tag = ev.task_data.unwrap();
            let payload = ev.event_data.payload().unwrap();
            ORDER.lock().unwrap().push(tag * 100 + payload);
        }

        let mut s = scheduler();
        let t1 = s.add_event_task(cb, 5, Some(1)).unwrap();
        let t2 = s.add_event_task(cb, 5, Some(2)).unwrap();
        s.enqueue(t1, 1).unwrap(); // "x"
        s.enqueue(t2, 2).unwrap(); // "y"
        s.enqueue(t1, 3).unwrap(); // "z"

        // Two chain tasks per sweep → two extractions per sweep.
        s.sweep();
        s.sweep();
        assert_eq!(*ORDER.lock().unwrap(), [101, 202, 103]);
    }

    #[test]
    fn autopop_delivers_front_then_advances() {
        static SEEN: Mutex<Vec<u8>> = Mutex::new(Vec::new());
        fn cb(ev: &mut EventInfo<'_, '_, u32>) {
            assert_eq!(ev.trigger, Trigger::BufferAutoPop);
            SEEN.lock().unwrap().push(ev.event_data.element().unwrap()[0]);
        }

        static mut BLOCK: [u8; 4] = [0; 4];
        let storage = unsafe { &mut *core::ptr::addr_of_mut!(BLOCK) };
        let rb = RingBuffer::new(storage, 1, 4);

        let mut s = scheduler();
        let id = s.add_event_task(cb, 1, None).unwrap();
        s.link_buffer(id, rb, LinkMode::AutoPop);
        for byte in [1u8, 2, 3] {
            assert!(s.buffer_mut(id).unwrap().push(&[byte]));
        }

        s.sweep();
        assert_eq!(*SEEN.lock().unwrap(), [1]);
        assert_eq!(s.buffer(id).unwrap().len(), 2);
        assert_eq!(s.buffer(id).unwrap().peek_front(), Some(&[2u8][..]));

        s.sweep();
        s.sweep();
        s.sweep(); // empty now: no further firings
        assert_eq!(*SEEN.lock().unwrap(), [1, 2, 3]);
        assert_eq!(s.cycles(id), 3);
    }

    #[test]
    fn full_buffer_fires_and_handler_drains_it() {
        static DRAINED: AtomicU32 = AtomicU32::new(0);
        fn cb(ev: &mut EventInfo<'_, '_, u32>) {
            assert_eq!(ev.trigger, Trigger::BufferFull);
            if let EventData::Buffer(rb) = &mut ev.event_data {
                let mut out = [0u8; 1];
                while rb.pop_front(&mut out) {
                    DRAINED.fetch_add(1, Relaxed);
                }
            } else {
                panic!("expected the buffer handle");
            }
        }

        static mut BLOCK: [u8; 2] = [0; 2];
        let storage = unsafe { &mut *core::ptr::addr_of_mut!(BLOCK) };
        let rb = RingBuffer::new(storage, 1, 2);

        let mut s = scheduler();
        let id = s.add_event_task(cb, 1, None).unwrap();
        s.link_buffer(id, rb, LinkMode::Full);
        s.buffer_mut(id).unwrap().push(&[1]);
        s.sweep(); // not full yet
        assert_eq!(DRAINED.load(Relaxed), 0);

        s.buffer_mut(id).unwrap().push(&[2]);
        s.sweep();
        assert_eq!(DRAINED.load(Relaxed), 2);
        assert!(s.buffer(id).unwrap().is_empty());
    }

    #[test]
    fn count_mode_fires_at_or_below_threshold() {
        static FIRINGS: AtomicU32 = AtomicU32::new(0);
        fn cb(ev: &mut EventInfo<'_, '_, u32>) {
            assert_eq!(ev.trigger, Trigger::BufferCount);
            FIRINGS.fetch_add(1, Relaxed);
        }

        static mut BLOCK: [u8; 4] = [0; 4];
        let storage = unsafe { &mut *core::ptr::addr_of_mut!(BLOCK) };
        let rb = RingBuffer::new(storage, 1, 4);

        let mut s = scheduler();
        let id = s.add_event_task(cb, 1, None).unwrap();
        s.link_buffer(id, rb, LinkMode::Count(2));

        for byte in [1u8, 2, 3] {
            s.buffer_mut(id).unwrap().push(&[byte]);
        }
        s.sweep(); // three elements > threshold: silent
        assert_eq!(FIRINGS.load(Relaxed), 0);

        let mut out = [0u8; 1];
        s.buffer_mut(id).unwrap().pop_front(&mut out);
        s.sweep(); // two elements: fires
        assert_eq!(FIRINGS.load(Relaxed), 1);
    }

    #[test]
    fn empty_mode_fires_while_buffer_is_empty() {
        static FIRINGS: AtomicU32 = AtomicU32::new(0);
        fn cb(ev: &mut EventInfo<'_, '_, u32>) {
            assert_eq!(ev.trigger, Trigger::BufferEmpty);
            FIRINGS.fetch_add(1, Relaxed);
        }

        static mut BLOCK: [u8; 4] = [0; 4];
        let storage = unsafe { &mut *core::ptr::addr_of_mut!(BLOCK) };
        let rb = RingBuffer::new(storage, 1, 4);

        let mut s = scheduler();
        let id = s.add_event_task(cb, 1, None).unwrap();
        s.link_buffer(id, rb, LinkMode::Empty);
        s.sweep();
        assert_eq!(FIRINGS.load(Relaxed), 1);

        s.buffer_mut(id).unwrap().push(&[9]);
        s.sweep();
        assert_eq!(FIRINGS.load(Relaxed), 1);
    }

    #[test]
    fn async_event_fires_once_with_payload() {
        static PAYLOAD: AtomicU32 = AtomicU32::new(0);
        fn cb(ev: &mut EventInfo<'_, '_, u32>) {
            assert_eq!(ev.trigger, Trigger::Async);
            PAYLOAD.store(ev.event_data.payload().unwrap(), Relaxed);
        }

        let mut s = scheduler();
        let id = s.add_event_task(cb, 1, None).unwrap();
        s.send_async(id, 5);
        // Last writer wins before delivery.
        s.send_async(id, 6);
        s.sweep();
        assert_eq!(PAYLOAD.load(Relaxed), 6);
        assert_eq!(s.cycles(id), 1);
        s.sweep();
        assert_eq!(s.cycles(id), 1);
    }

    #[test]
    fn elapsed_time_outranks_async() {
        static TRIGGERS: Mutex<Vec<Trigger>> = Mutex::new(Vec::new());
        fn cb(ev: &mut EventInfo<'_, '_, u32>) {
            TRIGGERS.lock().unwrap().push(ev.trigger);
        }

        let mut s = scheduler();
        let id = s.add_task(cb, 1, 0.002, PERIODIC, true, None).unwrap();
        s.send_async(id, 1);
        s.sys_tick();
        s.sys_tick();
        s.sweep(); // deadline met and async pending: time wins
        s.sweep(); // async delivered on the next step
        assert_eq!(
            *TRIGGERS.lock().unwrap(),
            [Trigger::TimeElapsed, Trigger::Async]
        );
    }

    #[test]
    fn first_call_marks_only_the_first_firing() {
        static CALLS: Mutex<Vec<bool>> = Mutex::new(Vec::new());
        fn cb(ev: &mut EventInfo<'_, '_, u32>) {
            CALLS.lock().unwrap().push(ev.first_call);
        }

        let mut s = scheduler();
        let id = s.add_task(cb, 1, IMMEDIATE, PERIODIC, true, None).unwrap();
        s.sweep();
        s.sweep();
        assert_eq!(*CALLS.lock().unwrap(), [true, false]);

        // Replacing the callback resets the flag.
        s.set_callback(id, cb);
        s.sweep();
        assert_eq!(*CALLS.lock().unwrap(), [true, false, true]);
    }

    #[test]
    fn enabling_reopens_the_interval_window() {
        static FIRINGS: AtomicU32 = AtomicU32::new(0);
        fn cb(_: &mut EventInfo<'_, '_, u32>) {
            FIRINGS.fetch_add(1, Relaxed);
        }

        let mut s = scheduler();
        let id = s.add_task(cb, 1, 0.010, PERIODIC, false, None).unwrap();
        for _ in 0..7 {
            s.sys_tick();
            s.sweep();
        }
        assert_eq!(FIRINGS.load(Relaxed), 0);

        s.set_enabled(id, true); // window reopens at epoch 7
        for _ in 0..9 {
            s.sys_tick();
            s.sweep();
        }
        assert_eq!(FIRINGS.load(Relaxed), 0);
        s.sys_tick();
        s.sweep(); // epoch 17: ten epochs after enabling
        assert_eq!(FIRINGS.load(Relaxed), 1);
    }

    #[test]
    fn admission_validates_the_interval() {
        let mut s = scheduler();
        assert_eq!(
            s.add_task(noop, 1, 0.0015, PERIODIC, true, None),
            Err(Error::IntervalTooShort)
        );
        assert!(s.add_task(noop, 1, 0.002, PERIODIC, true, None).is_ok());
        assert!(s.add_task(noop, 1, IMMEDIATE, PERIODIC, true, None).is_ok());

        // No time base configured: timed admission is rejected.
        let mut bare: Scheduler<'_, u32> = Scheduler::new();
        assert_eq!(
            bare.add_task(noop, 1, 0.010, PERIODIC, true, None),
            Err(Error::IntervalTooShort)
        );
    }

    #[test]
    fn arena_exhaustion_is_reported() {
        let mut s = scheduler();
        for _ in 0..MAX_TASKS {
            s.add_event_task(noop, 1, None).unwrap();
        }
        assert_eq!(s.add_event_task(noop, 1, None), Err(Error::TooManyTasks));
    }

    #[test]
    fn release_stops_run_and_notifies() {
        static RELEASED: AtomicBool = AtomicBool::new(false);
        fn hook(ev: &mut EventInfo<'_, '_, u32>) {
            assert_eq!(ev.trigger, Trigger::Async);
            assert!(ev.first_call);
            RELEASED.store(true, Relaxed);
        }

        let mut s = scheduler();
        s.set_release_callback(Some(hook));
        s.add_task(noop, 1, IMMEDIATE, PERIODIC, true, None).unwrap();
        s.release();
        s.run(); // returns immediately after the notification
        assert!(RELEASED.load(Relaxed));
    }

    #[test]
    fn idle_hook_runs_when_nothing_is_pending() {
        static IDLE_CALLS: Mutex<Vec<bool>> = Mutex::new(Vec::new());
        fn idle(ev: &mut EventInfo<'_, '_, u32>) {
            assert_eq!(ev.trigger, Trigger::Priority);
            IDLE_CALLS.lock().unwrap().push(ev.first_call);
        }

        let mut s = scheduler();
        s.set_idle_callback(Some(idle));
        let id = s.add_task(noop, 1, 0.010, PERIODIC, true, None).unwrap();
        s.sweep(); // deadline far away: idle runs, first call
        s.sweep();
        assert_eq!(*IDLE_CALLS.lock().unwrap(), [true, false]);
        assert_eq!(s.cycles(id), 0);
    }

    #[test]
    fn fsm_task_advances_one_transition_per_firing() {
        static PHASES: Mutex<Vec<u32>> = Mutex::new(Vec::new());

        fn ping(sm: &mut StateMachine<u32>, _: &mut EventInfo<'_, '_, u32>) -> Status {
            PHASES.lock().unwrap().push(0);
            sm.set_next_state(Some(pong as StateFn<u32>));
            Status::Success
        }
        fn pong(sm: &mut StateMachine<u32>, _: &mut EventInfo<'_, '_, u32>) -> Status {
            PHASES.lock().unwrap().push(1);
            sm.set_next_state(Some(ping as StateFn<u32>));
            Status::Success
        }

        let mut s = scheduler();
        let id = s
            .add_fsm_task(StateMachine::new(ping), 1, IMMEDIATE, true, None)
            .unwrap();
        s.sweep();
        s.sweep();
        s.sweep();
        assert_eq!(*PHASES.lock().unwrap(), [0, 1, 0]);
        assert!(s.state_machine_mut(id).is_some());
        assert_eq!(s.cycles(id), 3);
    }

    #[test]
    fn unlink_returns_the_buffer() {
        static mut BLOCK: [u8; 4] = [0; 4];
        let storage = unsafe { &mut *core::ptr::addr_of_mut!(BLOCK) };
        let rb = RingBuffer::new(storage, 1, 4);

        let mut s = scheduler();
        let id = s.add_event_task(noop, 1, None).unwrap();
        assert!(s.link_buffer(id, rb, LinkMode::AutoPop).is_none());
        let mut back = s.unlink_buffer(id).unwrap();
        assert!(back.push(&[1]));
        assert!(s.buffer(id).is_none());
    }
}
