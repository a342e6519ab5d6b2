//! Debounced actions on virtual time.
//!
//! Every [`Debouncer::trigger`] cancels the armed timer, rejects the signal it
//! returned last time, and arms a fresh timer and signal `window_ms` later.
//! A burst of triggers therefore yields exactly one completion, at
//! `last trigger + window`. [`Debouncer::current_signal`] always returns the
//! live signal, so callers never wait on one captured mid-burst.
//! Dropping a debouncer rejects its armed signal with [`CANCELLED`].

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::clock::VirtualClock;
use crate::error::{HarnessError, Result};
use crate::operation::{pending_labeled, PendingOperation, Resolver};
use crate::timer_queue::TimerHandle;

/// Rejection reason given to signals replaced by a later trigger.
pub const SUPERSEDED: &str = "superseded by a later trigger";

/// Rejection reason given to a signal dropped by [`Debouncer::cancel`].
pub const CANCELLED: &str = "debounce cancelled";

const TIMER_LABEL: &str = "debounce";

struct Armed<R> {
    timer: TimerHandle,
    signal: PendingOperation<R>,
    resolver: Resolver<R>,
}

struct DebounceState<R> {
    armed: Option<Armed<R>>,
    triggers: u64,
    fired: u64,
    last_fired_at: Option<u64>,
}

/// Collapses bursts of triggers into a single delayed call of `action`.
///
/// `A` is the trigger argument (the last one wins), `R` the action's result.
pub struct Debouncer<A, R> {
    clock: VirtualClock,
    window_ms: u64,
    action: Rc<RefCell<dyn FnMut(A) -> R>>,
    state: Rc<RefCell<DebounceState<R>>>,
}

impl<A: 'static, R: 'static> Debouncer<A, R> {
    /// Create a debouncer driven by `clock`.
    ///
    /// # Errors
    /// [`HarnessError::InvalidArgument`] for a zero window.
    pub fn new<F>(clock: &VirtualClock, window_ms: u64, action: F) -> Result<Self>
    where
        F: FnMut(A) -> R + 'static,
    {
        if window_ms == 0 {
            return Err(HarnessError::InvalidArgument(
                "debounce window must be at least 1ms".into(),
            ));
        }
        Ok(Self {
            clock: clock.clone(),
            window_ms,
            action: Rc::new(RefCell::new(action)),
            state: Rc::new(RefCell::new(DebounceState {
                armed: None,
                triggers: 0,
                fired: 0,
                last_fired_at: None,
            })),
        })
    }

    /// Trigger the action with `arg`, restarting the window.
    ///
    /// Returns the newly armed completion signal.
    pub fn trigger(&self, arg: A) -> PendingOperation<R> {
        let previous = {
            let mut state = self.state.borrow_mut();
            state.triggers += 1;
            state.armed.take()
        };
        if let Some(previous) = previous {
            self.clock.cancel(previous.timer);
            previous.resolver.reject(SUPERSEDED);
        }

        let due = self.clock.now().saturating_add(self.window_ms);
        let (signal, resolver) = pending_labeled(Some(TIMER_LABEL.to_string()));
        let state: Weak<RefCell<DebounceState<R>>> = Rc::downgrade(&self.state);
        let action = Rc::downgrade(&self.action);
        let timer = self.clock.schedule_labeled(self.window_ms, TIMER_LABEL, move || {
            let (Some(state), Some(action)) = (state.upgrade(), action.upgrade()) else {
                return;
            };
            let Some(armed) = state.borrow_mut().armed.take() else {
                return;
            };
            let value = (&mut *action.borrow_mut())(arg);
            {
                let mut state = state.borrow_mut();
                state.fired += 1;
                state.last_fired_at = Some(due);
            }
            tracing::debug!(due, "Debounced action fired");
            armed.resolver.resolve(value);
        });

        tracing::debug!(due, window = self.window_ms, "Debounce armed");
        self.state.borrow_mut().armed = Some(Armed {
            timer,
            signal: signal.clone(),
            resolver,
        });
        signal
    }
}

impl<A, R> Debouncer<A, R> {
    /// The signal armed by the latest trigger, if it has not fired yet.
    pub fn current_signal(&self) -> Option<PendingOperation<R>> {
        self.state
            .borrow()
            .armed
            .as_ref()
            .map(|armed| armed.signal.clone())
    }

    /// Whether a trigger is waiting for its window to elapse.
    pub fn is_armed(&self) -> bool {
        self.state.borrow().armed.is_some()
    }

    /// Drop the armed trigger without running the action.
    ///
    /// Returns `false` if nothing was armed.
    pub fn cancel(&self) -> bool {
        let armed = self.state.borrow_mut().armed.take();
        match armed {
            Some(armed) => {
                self.clock.cancel(armed.timer);
                armed.resolver.reject(CANCELLED);
                true
            }
            None => false,
        }
    }

    /// Debounce window in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Number of calls to [`Debouncer::trigger`].
    pub fn trigger_count(&self) -> u64 {
        self.state.borrow().triggers
    }

    /// Number of times the action actually ran.
    pub fn fired_count(&self) -> u64 {
        self.state.borrow().fired
    }

    /// Virtual time of the most recent completion.
    pub fn last_fired_at(&self) -> Option<u64> {
        self.state.borrow().last_fired_at
    }
}

impl<A, R> Drop for Debouncer<A, R> {
    fn drop(&mut self) {
        if self.cancel() {
            tracing::debug!("Armed debounce dropped");
        }
    }
}

impl<A, R> fmt::Debug for Debouncer<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Debouncer")
            .field("window_ms", &self.window_ms)
            .field("armed", &state.armed.is_some())
            .field("triggers", &state.triggers)
            .field("fired", &state.fired)
            .finish()
    }
}
