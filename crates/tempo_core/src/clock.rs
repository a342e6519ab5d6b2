//! Controllable virtual clock.
//!
//! Virtual time only moves when a test calls [`VirtualClock::advance`] (or one
//! of its variants). Callbacks fire synchronously inside that call, in
//! `(due, seq)` order, and may schedule further callbacks that fire in the
//! same call if they fall inside the window.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use tempo_core::clock::VirtualClock;
//!
//! let clock = VirtualClock::new();
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! let sink = Rc::clone(&log);
//! clock.schedule(150, move || sink.borrow_mut().push("b"));
//! let sink = Rc::clone(&log);
//! clock.schedule(100, move || sink.borrow_mut().push("a"));
//!
//! clock.advance(200).unwrap();
//! assert_eq!(*log.borrow(), vec!["a", "b"]);
//! assert_eq!(clock.now(), 200);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use crate::error::{HarnessError, Result};
use crate::operation::{pending_labeled, PendingOperation};
use crate::timer_queue::{Action, TimerHandle, TimerQueue};
use crate::trace::FiringTrace;

/// Default cap on firings for [`VirtualClock::run_all`] style helpers.
pub const DEFAULT_RUN_LIMIT: usize = 10_000;

#[derive(Default)]
struct ClockState {
    now: u64,
    queue: TimerQueue,
    fired: u64,
    trace: FiringTrace,
}

/// Shared handle to a virtual clock.
///
/// Clones refer to the same clock, which lets callbacks capture it and
/// schedule follow-up work.
#[derive(Clone, Default)]
pub struct VirtualClock {
    inner: Rc<RefCell<ClockState>>,
}

impl VirtualClock {
    /// Create a clock at virtual time 0 with nothing scheduled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time in milliseconds.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.inner.borrow().now
    }

    /// Schedule `action` to fire `delay_ms` after the current virtual time.
    pub fn schedule<F>(&self, delay_ms: u64, action: F) -> TimerHandle
    where
        F: FnOnce() + 'static,
    {
        self.schedule_boxed(delay_ms, None, Box::new(action))
    }

    /// Like [`VirtualClock::schedule`], recording `label` in the firing trace.
    pub fn schedule_labeled<F>(&self, delay_ms: u64, label: impl Into<String>, action: F) -> TimerHandle
    where
        F: FnOnce() + 'static,
    {
        self.schedule_boxed(delay_ms, Some(label.into()), Box::new(action))
    }

    pub(crate) fn schedule_boxed(
        &self,
        delay_ms: u64,
        label: Option<String>,
        action: Action,
    ) -> TimerHandle {
        let mut state = self.inner.borrow_mut();
        let due = state.now.saturating_add(delay_ms);
        let handle = state.queue.push(due, label, action);
        tracing::trace!(due, seq = handle.sequence(), "Scheduled virtual callback");
        handle
    }

    /// Cancel a callback that has not fired. Returns `false` if it already
    /// fired or was already cancelled.
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        let removed = self.inner.borrow_mut().queue.cancel(handle);
        tracing::debug!(seq = handle.sequence(), removed, "Cancel virtual callback");
        removed
    }

    /// Advance virtual time by `by_ms`, firing every callback that becomes due.
    ///
    /// Returns the number of callbacks fired.
    ///
    /// # Errors
    /// [`HarnessError::InvalidArgument`] if `by_ms` is negative. Time does not
    /// move in that case.
    pub fn advance(&self, by_ms: i64) -> Result<usize> {
        let Ok(by) = u64::try_from(by_ms) else {
            return Err(HarnessError::InvalidArgument(format!(
                "cannot advance virtual time by a negative amount ({by_ms}ms)"
            )));
        };
        let target = self.now().saturating_add(by);
        Ok(self.fire_until(target))
    }

    /// Advance virtual time to the absolute instant `target_ms`.
    ///
    /// # Errors
    /// [`HarnessError::InvalidArgument`] if `target_ms` is in the past.
    pub fn advance_to(&self, target_ms: u64) -> Result<usize> {
        let now = self.now();
        if target_ms < now {
            return Err(HarnessError::InvalidArgument(format!(
                "cannot move virtual time backwards from {now}ms to {target_ms}ms"
            )));
        }
        Ok(self.fire_until(target_ms))
    }

    /// Jump to the earliest pending due time and fire everything due then.
    ///
    /// Returns the new virtual time, or `None` if nothing is scheduled.
    pub fn advance_to_next(&self) -> Option<u64> {
        let due = self.next_due()?;
        self.fire_until(due);
        Some(due)
    }

    /// Fire callbacks until the queue is empty.
    ///
    /// # Errors
    /// [`HarnessError::InvalidState`] once more than `limit` callbacks have
    /// fired, which usually means a callback keeps rescheduling itself.
    pub fn run_all(&self, limit: usize) -> Result<usize> {
        let mut fired = 0;
        while let Some(due) = self.next_due() {
            if fired >= limit {
                return Err(self.limit_exceeded(limit));
            }
            fired += self.fire_until(due);
        }
        Ok(fired)
    }

    /// Step through due times until `condition` holds.
    ///
    /// # Errors
    /// [`HarnessError::Stalled`] if the queue drains first, or
    /// [`HarnessError::InvalidState`] after `limit` firings.
    pub fn run_until<P>(&self, mut condition: P, limit: usize) -> Result<()>
    where
        P: FnMut() -> bool,
    {
        let mut fired = 0;
        loop {
            if condition() {
                return Ok(());
            }
            if fired >= limit {
                return Err(self.limit_exceeded(limit));
            }
            let Some(due) = self.next_due() else {
                return Err(HarnessError::Stalled { now: self.now() });
            };
            fired += self.fire_until(due);
        }
    }

    /// Drive `future` to completion on virtual time.
    ///
    /// The future is polled; while it is pending the clock jumps to the next
    /// due time. Nothing sleeps.
    ///
    /// # Errors
    /// [`HarnessError::Stalled`] if the future is still pending when nothing is
    /// left to fire, [`HarnessError::InvalidState`] after `limit` firings.
    pub fn block_on<F: Future>(&self, future: F, limit: usize) -> Result<F::Output> {
        let mut future = std::pin::pin!(future);
        let waker = Waker::from(Arc::new(NoopWake));
        let mut cx = Context::from_waker(&waker);
        let mut fired = 0;
        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return Ok(output);
            }
            if fired >= limit {
                return Err(self.limit_exceeded(limit));
            }
            let Some(due) = self.next_due() else {
                return Err(HarnessError::Stalled { now: self.now() });
            };
            fired += self.fire_until(due);
        }
    }

    /// An operation that resolves with `value` after `delay_ms`.
    pub fn resolve_after<T: 'static>(&self, delay_ms: u64, value: T) -> PendingOperation<T> {
        self.settle_after(delay_ms, None, Ok(value))
    }

    /// An operation that rejects with `reason` after `delay_ms`.
    pub fn reject_after<T: 'static>(
        &self,
        delay_ms: u64,
        reason: impl Into<String>,
    ) -> PendingOperation<T> {
        self.settle_after(delay_ms, None, Err(reason.into()))
    }

    /// Labelled form of [`VirtualClock::resolve_after`] / [`VirtualClock::reject_after`].
    pub fn settle_after<T: 'static>(
        &self,
        delay_ms: u64,
        label: Option<String>,
        outcome: std::result::Result<T, String>,
    ) -> PendingOperation<T> {
        let (operation, resolver) = pending_labeled(label.clone());
        let action: Action = Box::new(move || {
            match outcome {
                Ok(value) => resolver.resolve(value),
                Err(reason) => resolver.reject(reason),
            };
        });
        self.schedule_boxed(delay_ms, label, action);
        operation
    }

    /// Number of callbacks waiting to fire.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    /// Due time of the earliest pending callback.
    #[must_use]
    pub fn next_due(&self) -> Option<u64> {
        self.inner.borrow().queue.next_due()
    }

    /// Whether `handle` is still waiting to fire.
    #[must_use]
    pub fn is_scheduled(&self, handle: TimerHandle) -> bool {
        self.inner.borrow().queue.contains(handle)
    }

    /// Total callbacks fired since creation.
    #[must_use]
    pub fn fired_count(&self) -> u64 {
        self.inner.borrow().fired
    }

    /// Copy of the firing trace.
    #[must_use]
    pub fn trace(&self) -> FiringTrace {
        self.inner.borrow().trace.clone()
    }

    /// Drop every pending callback without running it.
    ///
    /// Used at teardown so that nothing scheduled in one test survives into
    /// another, and so that callbacks capturing this clock release it.
    pub fn clear(&self) -> usize {
        let dropped = self.inner.borrow_mut().queue.drain();
        // Callbacks are dropped outside the borrow; their captures may touch the clock.
        let count = dropped.len();
        drop(dropped);
        if count > 0 {
            tracing::debug!(dropped = count, "Cleared pending virtual callbacks");
        }
        count
    }

    fn fire_until(&self, target: u64) -> usize {
        let mut fired = 0;
        loop {
            let callback = {
                let mut state = self.inner.borrow_mut();
                let Some(callback) = state.queue.pop_due(target) else {
                    state.now = state.now.max(target);
                    break;
                };
                state.now = callback.due;
                state.fired += 1;
                state
                    .trace
                    .record(callback.due, callback.seq, callback.label.clone());
                callback
            };
            tracing::trace!(
                due = callback.due,
                seq = callback.seq,
                label = callback.label.as_deref().unwrap_or(""),
                "Firing virtual callback"
            );
            callback.fire();
            fired += 1;
        }
        tracing::debug!(now = target, fired, "Virtual time advanced");
        fired
    }

    fn limit_exceeded(&self, limit: usize) -> HarnessError {
        HarnessError::InvalidState(format!(
            "more than {limit} callbacks fired at {}ms; is a callback rescheduling itself?",
            self.now()
        ))
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("VirtualClock")
            .field("now", &state.now)
            .field("queue", &state.queue)
            .field("fired", &state.fired)
            .finish()
    }
}

struct NoopWake;

impl Wake for NoopWake {
    fn wake(self: Arc<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce()>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let make = move |name: &'static str| {
            let sink = Rc::clone(&sink);
            Box::new(move || sink.borrow_mut().push(name)) as Box<dyn FnOnce()>
        };
        (log, make)
    }

    #[test]
    fn test_new_clock_starts_at_zero() {
        let clock = VirtualClock::new();
        assert_eq!(clock.now(), 0);
        assert_eq!(clock.pending_count(), 0);
        assert_eq!(clock.next_due(), None);
    }

    #[test]
    fn test_advance_fires_in_due_order() {
        let clock = VirtualClock::new();
        let (log, make) = recorder();
        clock.schedule(200, make("c"));
        clock.schedule(100, make("a"));
        clock.schedule(150, make("b"));

        assert_eq!(clock.advance(200).unwrap(), 3);
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
        assert_eq!(clock.now(), 200);
    }

    #[test]
    fn test_equal_due_times_fire_in_insertion_order() {
        let clock = VirtualClock::new();
        let (log, make) = recorder();
        clock.schedule(10, make("first"));
        clock.schedule(10, make("second"));
        clock.schedule(10, make("third"));

        clock.advance(10).unwrap();
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_advance_stops_at_window_end() {
        let clock = VirtualClock::new();
        let (log, make) = recorder();
        clock.schedule(100, make("inside"));
        clock.schedule(101, make("outside"));

        assert_eq!(clock.advance(100).unwrap(), 1);
        assert_eq!(*log.borrow(), vec!["inside"]);
        assert_eq!(clock.pending_count(), 1);
        assert_eq!(clock.next_due(), Some(101));
    }

    #[test]
    fn test_negative_advance_is_rejected() {
        let clock = VirtualClock::new();
        clock.advance(50).unwrap();

        let err = clock.advance(-1).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidArgument(_)));
        assert_eq!(clock.now(), 50);
    }

    #[test]
    fn test_advance_to_rejects_past() {
        let clock = VirtualClock::new();
        clock.advance(10).unwrap();
        assert!(matches!(
            clock.advance_to(5),
            Err(HarnessError::InvalidArgument(_))
        ));
        assert_eq!(clock.advance_to(10).unwrap(), 0);
    }

    #[test]
    fn test_now_during_callback_is_due_time() {
        let clock = VirtualClock::new();
        let seen = Rc::new(Cell::new(0));
        let observer = clock.clone();
        let out = Rc::clone(&seen);
        clock.schedule(40, move || out.set(observer.now()));

        clock.advance(100).unwrap();
        assert_eq!(seen.get(), 40);
        assert_eq!(clock.now(), 100);
    }

    #[test]
    fn test_reentrant_schedule_fires_within_window() {
        let clock = VirtualClock::new();
        let (log, make) = recorder();
        let inner = clock.clone();
        let nested = make("nested");
        let outer = make("outer");
        clock.schedule(10, move || {
            outer();
            inner.schedule(20, nested);
        });

        assert_eq!(clock.advance(30).unwrap(), 2);
        assert_eq!(*log.borrow(), vec!["outer", "nested"]);
    }

    #[test]
    fn test_reentrant_schedule_outside_window_waits() {
        let clock = VirtualClock::new();
        let inner = clock.clone();
        clock.schedule(10, move || {
            inner.schedule(50, || {});
        });

        assert_eq!(clock.advance(30).unwrap(), 1);
        assert_eq!(clock.next_due(), Some(60));
    }

    #[test]
    fn test_cancel_before_fire() {
        let clock = VirtualClock::new();
        let (log, make) = recorder();
        let handle = clock.schedule(10, make("cancelled"));
        clock.schedule(10, make("kept"));

        assert!(clock.is_scheduled(handle));
        assert!(clock.cancel(handle));
        clock.advance(10).unwrap();
        assert_eq!(*log.borrow(), vec!["kept"]);
    }

    #[test]
    fn test_cancel_after_fire_is_noop() {
        let clock = VirtualClock::new();
        let handle = clock.schedule(1, || {});
        clock.advance(1).unwrap();

        assert!(!clock.cancel(handle));
    }

    #[test]
    fn test_callback_can_cancel_sibling() {
        let clock = VirtualClock::new();
        let (log, make) = recorder();
        let sibling = clock.schedule(20, make("sibling"));
        let inner = clock.clone();
        clock.schedule(10, move || {
            inner.cancel(sibling);
        });

        clock.advance(50).unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_advance_to_next() {
        let clock = VirtualClock::new();
        clock.schedule(70, || {});
        clock.schedule(70, || {});
        clock.schedule(90, || {});

        assert_eq!(clock.advance_to_next(), Some(70));
        assert_eq!(clock.fired_count(), 2);
        assert_eq!(clock.advance_to_next(), Some(90));
        assert_eq!(clock.advance_to_next(), None);
    }

    #[test]
    fn test_run_all_drains_chain() {
        let clock = VirtualClock::new();
        let inner = clock.clone();
        clock.schedule(5, move || {
            let again = inner.clone();
            inner.schedule(5, move || {
                again.schedule(5, || {});
            });
        });

        assert_eq!(clock.run_all(DEFAULT_RUN_LIMIT).unwrap(), 3);
        assert_eq!(clock.now(), 15);
    }

    #[test]
    fn test_run_all_detects_runaway_rescheduling() {
        fn tick(clock: VirtualClock) {
            let next = clock.clone();
            clock.schedule(1, move || tick(next));
        }
        let clock = VirtualClock::new();
        tick(clock.clone());

        let err = clock.run_all(50).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidState(_)));
        clock.clear();
    }

    #[test]
    fn test_run_until_reports_stall() {
        let clock = VirtualClock::new();
        clock.schedule(5, || {});

        let err = clock.run_until(|| false, DEFAULT_RUN_LIMIT).unwrap_err();
        assert_eq!(err, HarnessError::Stalled { now: 5 });
    }

    #[test]
    fn test_run_until_stops_when_condition_holds() {
        let clock = VirtualClock::new();
        let flag = Rc::new(Cell::new(false));
        let setter = Rc::clone(&flag);
        clock.schedule(30, move || setter.set(true));
        clock.schedule(60, || {});

        let check = Rc::clone(&flag);
        clock.run_until(move || check.get(), DEFAULT_RUN_LIMIT).unwrap();
        assert_eq!(clock.now(), 30);
        assert_eq!(clock.pending_count(), 1);
    }

    #[test]
    fn test_resolve_after_settles_on_time() {
        let clock = VirtualClock::new();
        let op = clock.resolve_after(100, "done");

        clock.advance(99).unwrap();
        assert!(op.is_pending());
        clock.advance(1).unwrap();
        assert_eq!(op.value(), Some("done"));
    }

    #[test]
    fn test_reject_after_settles_with_reason() {
        let clock = VirtualClock::new();
        let op = clock.reject_after::<u32>(10, "timeout");

        clock.advance(10).unwrap();
        assert_eq!(op.rejection().as_deref(), Some("timeout"));
    }

    #[test]
    fn test_block_on_drives_virtual_time() {
        let clock = VirtualClock::new();
        let op = clock.resolve_after(250, 9_u32);

        let value = clock.block_on(op, DEFAULT_RUN_LIMIT).unwrap();
        assert_eq!(value, Ok(9));
        assert_eq!(clock.now(), 250);
    }

    #[test]
    fn test_block_on_stalls_without_timers() {
        let clock = VirtualClock::new();
        let (op, _resolver) = crate::operation::pending::<u32>();

        let err = clock.block_on(op, DEFAULT_RUN_LIMIT).unwrap_err();
        assert_eq!(err, HarnessError::Stalled { now: 0 });
    }

    #[test]
    fn test_trace_records_labels() {
        let clock = VirtualClock::new();
        clock.schedule_labeled(20, "second", || {});
        clock.schedule_labeled(10, "first", || {});
        clock.advance(20).unwrap();

        let trace = clock.trace();
        assert_eq!(trace.labels(), vec!["first", "second"]);
        assert_eq!(trace.fired_at("second"), Some(20));
    }

    #[test]
    fn test_clear_drops_pending() {
        let clock = VirtualClock::new();
        let (log, make) = recorder();
        clock.schedule(1, make("never"));

        assert_eq!(clock.clear(), 1);
        clock.advance(10).unwrap();
        assert!(log.borrow().is_empty());
    }
}
