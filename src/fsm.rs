//! # Finite State Machine Executor
//!
//! A [`StateMachine`] runs one *transition* per invocation: the pending
//! state executes once, its return status is recorded, and one of three
//! sub-handlers (success / failure / unexpected) is dispatched on the
//! result. States steer the flow by overwriting the machine's next state
//! before returning; they never block and never loop inside the machine.
//!
//! Bound to a task (see `Scheduler::add_fsm_task`), the machine advances by
//! one transition per firing, which turns a periodic task into a
//! non-blocking sequential program:
//!
//! ```text
//!             ┌──────────────┐
//!   run() ──► │  before_any  │ (optional prologue)
//!             └──────┬───────┘
//!                    ▼
//!             ┌──────────────┐   Success    ┌──────────────┐
//!             │  next_state  │ ───────────► │  on_success  │
//!             │   executes   │   Failure    ├──────────────┤
//!             │    once      │ ───────────► │  on_failure  │
//!             │              │   Code(_)    ├──────────────┤
//!             └──────────────┘ ───────────► │ on_unexpected│
//!                                           └──────────────┘
//! ```

use crate::event::EventInfo;

/// Outcome of one state execution.
///
/// `Success` and `Failure` route to their dedicated sub-handlers; any
/// application-defined `Code` routes to the unexpected handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
    Code(i16),
}

/// A state: executes once per transition and reports its outcome. The
/// event record of the firing that drove the transition is lent alongside
/// the machine.
pub type StateFn<P> = fn(&mut StateMachine<P>, &mut EventInfo<'_, '_, P>) -> Status;

/// A sub-handler: a prologue or outcome hook with no status of its own.
pub type HookFn<P> = fn(&mut StateMachine<P>, &mut EventInfo<'_, '_, P>);

/// A finite state machine advanced one transition at a time.
pub struct StateMachine<P> {
    next_state: Option<StateFn<P>>,
    previous_state: Option<StateFn<P>>,
    last_return: Option<Status>,
    just_changed: bool,
    before_any: Option<HookFn<P>>,
    on_success: Option<HookFn<P>>,
    on_failure: Option<HookFn<P>>,
    on_unexpected: Option<HookFn<P>>,
}

impl<P: Copy> StateMachine<P> {
    /// A machine whose first transition will execute `initial`.
    pub const fn new(initial: StateFn<P>) -> Self {
        Self {
            next_state: Some(initial),
            previous_state: None,
            last_return: None,
            just_changed: false,
            before_any: None,
            on_success: None,
            on_failure: None,
            on_unexpected: None,
        }
    }

    /// Run one transition.
    ///
    /// Order: the prologue (if any), then the pending state, then the
    /// sub-handler selected by the state's return status. A machine whose
    /// next state has been cleared records [`Status::Failure`] and routes
    /// to the failure handler.
    pub fn run(&mut self, ev: &mut EventInfo<'_, '_, P>) {
        if let Some(prologue) = self.before_any {
            prologue(self, ev);
        }
        if let Some(state) = self.next_state {
            self.just_changed = self.previous_state != self.next_state;
            let status = state(self, ev);
            self.last_return = Some(status);
            self.previous_state = Some(state);
        } else {
            self.last_return = Some(Status::Failure);
        }
        match self.last_return {
            Some(Status::Success) => {
                if let Some(hook) = self.on_success {
                    hook(self, ev);
                }
            }
            Some(Status::Code(_)) => {
                if let Some(hook) = self.on_unexpected {
                    hook(self, ev);
                }
            }
            _ => {
                if let Some(hook) = self.on_failure {
                    hook(self, ev);
                }
            }
        }
    }

    /// Select the state the next transition will execute. `None` halts the
    /// flow: further transitions record [`Status::Failure`].
    pub fn set_next_state(&mut self, state: Option<StateFn<P>>) {
        self.next_state = state;
    }

    /// The state the next transition will execute.
    pub fn next_state(&self) -> Option<StateFn<P>> {
        self.next_state
    }

    /// The state the previous transition executed.
    pub fn previous_state(&self) -> Option<StateFn<P>> {
        self.previous_state
    }

    /// Return status of the most recent transition.
    pub fn last_return(&self) -> Option<Status> {
        self.last_return
    }

    /// True while the executing state differs from the one before it —
    /// i.e. the current transition entered a new state.
    pub fn just_changed(&self) -> bool {
        self.just_changed
    }

    /// Rewind the machine to a fresh flow starting at `initial`, clearing
    /// the recorded history.
    pub fn restart(&mut self, initial: StateFn<P>) {
        self.next_state = Some(initial);
        self.previous_state = None;
        self.last_return = None;
        self.just_changed = false;
    }

    /// Install or clear the prologue run before every transition.
    pub fn set_before_any(&mut self, hook: Option<HookFn<P>>) {
        self.before_any = hook;
    }

    /// Install or clear the handler for [`Status::Success`] outcomes.
    pub fn set_on_success(&mut self, hook: Option<HookFn<P>>) {
        self.on_success = hook;
    }

    /// Install or clear the handler for [`Status::Failure`] outcomes.
    pub fn set_on_failure(&mut self, hook: Option<HookFn<P>>) {
        self.on_failure = hook;
    }

    /// Install or clear the handler for [`Status::Code`] outcomes.
    pub fn set_on_unexpected(&mut self, hook: Option<HookFn<P>>) {
        self.on_unexpected = hook;
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
