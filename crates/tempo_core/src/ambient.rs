//! Ambient random function and clock.
//!
//! Code that would otherwise reach for a process-wide random number or a
//! wall-clock timer calls the functions in this module instead. By default
//! they delegate to [`SystemEntropy`] and [`SystemTimer`]; a test swaps in an
//! [`crate::entropy::EntropySequence`] or a [`VirtualClock`] through
//! [`override_entropy`] / [`override_timer`] and gets the previous
//! implementation back when the returned guard drops.
//!
//! The ambient state is per thread. The test runner gives every test case its
//! own thread, so overrides in one test are never visible to another.
//!
//! Guards must be dropped in reverse order of creation. Scoping them with
//! `let` bindings does that automatically. Debug builds panic when a guard is
//! dropped while a later one is still installed.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::clock::VirtualClock;
use crate::entropy::{EntropySource, SystemEntropy};
use crate::error::Result;
use crate::timer_queue::{Action, TimerHandle, TimerQueue};

/// Clock and delayed-callback primitives.
pub trait Timer {
    /// Current time in milliseconds.
    fn now_ms(&self) -> u64;

    /// Run `action` once `delay_ms` has elapsed.
    fn set_timeout(&self, delay_ms: u64, action: Action) -> TimerHandle;

    /// Cancel a pending callback. Returns `false` if it already ran.
    fn clear_timeout(&self, handle: TimerHandle) -> bool;
}

impl Timer for VirtualClock {
    fn now_ms(&self) -> u64 {
        self.now()
    }

    fn set_timeout(&self, delay_ms: u64, action: Action) -> TimerHandle {
        self.schedule_boxed(delay_ms, None, action)
    }

    fn clear_timeout(&self, handle: TimerHandle) -> bool {
        self.cancel(handle)
    }
}

/// Wall-clock timer.
///
/// Reads time from [`SystemTime`]. Callbacks wait in a local queue and run
/// when the owning thread calls [`SystemTimer::run_pending`], which sleeps
/// until each one is due. There is no background thread.
#[derive(Default)]
pub struct SystemTimer {
    queue: RefCell<TimerQueue>,
}

impl SystemTimer {
    /// Create a timer with nothing scheduled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep through the queue, running every callback as it comes due.
    ///
    /// Returns the number of callbacks run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let Some(due) = self.queue.borrow().next_due() else {
                break;
            };
            let now = self.now_ms();
            if due > now {
                std::thread::sleep(Duration::from_millis(due - now));
            }
            let callback = self.queue.borrow_mut().pop_due(due);
            if let Some(callback) = callback {
                callback.fire();
                ran += 1;
            }
        }
        ran
    }

    /// Number of callbacks waiting to run.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl Timer for SystemTimer {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
    }

    fn set_timeout(&self, delay_ms: u64, action: Action) -> TimerHandle {
        let due = self.now_ms().saturating_add(delay_ms);
        self.queue.borrow_mut().push(due, None, action)
    }

    fn clear_timeout(&self, handle: TimerHandle) -> bool {
        self.queue.borrow_mut().cancel(handle)
    }
}

impl fmt::Debug for SystemTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemTimer")
            .field("queue", &self.queue.borrow())
            .finish()
    }
}

thread_local! {
    static ENTROPY_OVERRIDE: RefCell<Option<Rc<dyn EntropySource>>> = const { RefCell::new(None) };
    static TIMER_OVERRIDE: RefCell<Option<Rc<dyn Timer>>> = const { RefCell::new(None) };
    static SYSTEM_ENTROPY: Rc<SystemEntropy> = Rc::new(SystemEntropy::from_entropy());
    static SYSTEM_TIMER: Rc<SystemTimer> = Rc::new(SystemTimer::new());
}

fn current_entropy() -> Rc<dyn EntropySource> {
    ENTROPY_OVERRIDE
        .with(|slot| slot.borrow().clone())
        .unwrap_or_else(|| SYSTEM_ENTROPY.with(|s| Rc::clone(s) as Rc<dyn EntropySource>))
}

fn current_timer() -> Rc<dyn Timer> {
    TIMER_OVERRIDE
        .with(|slot| slot.borrow().clone())
        .unwrap_or_else(|| SYSTEM_TIMER.with(|t| Rc::clone(t) as Rc<dyn Timer>))
}

/// Draw from the ambient random function.
///
/// # Errors
/// Whatever the installed source reports, e.g.
/// [`crate::error::HarnessError::EmptySequence`].
pub fn random() -> Result<f64> {
    current_entropy().draw()
}

/// Read the ambient clock.
pub fn now_ms() -> u64 {
    current_timer().now_ms()
}

/// Schedule `action` on the ambient timer.
pub fn set_timeout<F>(delay_ms: u64, action: F) -> TimerHandle
where
    F: FnOnce() + 'static,
{
    current_timer().set_timeout(delay_ms, Box::new(action))
}

/// Cancel a callback scheduled through [`set_timeout`].
pub fn clear_timeout(handle: TimerHandle) -> bool {
    current_timer().clear_timeout(handle)
}

/// Run pending callbacks of this thread's [`SystemTimer`].
///
/// Only meaningful when no timer override is installed.
pub fn run_system_timers() -> usize {
    let timer = SYSTEM_TIMER.with(Rc::clone);
    timer.run_pending()
}

/// Replace the ambient random function until the guard drops.
pub fn override_entropy(source: Rc<dyn EntropySource>) -> EntropyOverride {
    let installed = address(&source);
    let previous = ENTROPY_OVERRIDE.with(|slot| slot.borrow_mut().replace(source));
    tracing::debug!(nested = previous.is_some(), "Ambient entropy overridden");
    EntropyOverride {
        previous,
        installed,
    }
}

/// Replace the ambient clock and timer until the guard drops.
pub fn override_timer(timer: Rc<dyn Timer>) -> TimerOverride {
    let installed = address(&timer);
    let previous = TIMER_OVERRIDE.with(|slot| slot.borrow_mut().replace(timer));
    tracing::debug!(nested = previous.is_some(), "Ambient timer overridden");
    TimerOverride {
        previous,
        installed,
    }
}

fn address<T: ?Sized>(rc: &Rc<T>) -> usize {
    Rc::as_ptr(rc).cast::<()>() as usize
}

// A guard must find its own override still installed; anything else means a
// later guard is still alive and is about to be clobbered.
fn check_lifo(kind: &str, current: Option<usize>, installed: usize) {
    if current == Some(installed) {
        return;
    }
    tracing::error!(kind, "Ambient override dropped out of order");
    if cfg!(debug_assertions) && !std::thread::panicking() {
        panic!("{kind} override dropped while a later override is still installed");
    }
}

/// Restores the previous ambient random function on drop.
#[must_use = "the override is removed as soon as the guard is dropped"]
pub struct EntropyOverride {
    previous: Option<Rc<dyn EntropySource>>,
    installed: usize,
}

impl Drop for EntropyOverride {
    fn drop(&mut self) {
        let previous = self.previous.take();
        tracing::debug!(nested = previous.is_some(), "Ambient entropy restored");
        let replaced = ENTROPY_OVERRIDE.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), previous));
        check_lifo("entropy", replaced.as_ref().map(address), self.installed);
    }
}

impl fmt::Debug for EntropyOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntropyOverride")
            .field("nested", &self.previous.is_some())
            .finish()
    }
}

/// Restores the previous ambient timer on drop.
#[must_use = "the override is removed as soon as the guard is dropped"]
pub struct TimerOverride {
    previous: Option<Rc<dyn Timer>>,
    installed: usize,
}

impl Drop for TimerOverride {
    fn drop(&mut self) {
        let previous = self.previous.take();
        tracing::debug!(nested = previous.is_some(), "Ambient timer restored");
        let replaced = TIMER_OVERRIDE.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), previous));
        check_lifo("timer", replaced.as_ref().map(address), self.installed);
    }
}

impl fmt::Debug for TimerOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerOverride")
            .field("nested", &self.previous.is_some())
            .finish()
    }
}

/// Identity of the installed overrides, for before/after comparisons.
///
/// `None` means the real implementation is in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmbientSnapshot {
    /// Address of the installed entropy override.
    pub entropy: Option<usize>,
    /// Address of the installed timer override.
    pub timer: Option<usize>,
}

/// Capture which overrides are currently installed on this thread.
pub fn snapshot() -> AmbientSnapshot {
    AmbientSnapshot {
        entropy: ENTROPY_OVERRIDE.with(|slot| slot.borrow().as_ref().map(address)),
        timer: TIMER_OVERRIDE.with(|slot| slot.borrow().as_ref().map(address)),
    }
}
