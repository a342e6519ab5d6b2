//! Per-test harness bundle.
//!
//! A [`Harness`] owns a fresh [`VirtualClock`] and [`EntropySequence`] and
//! installs both as the ambient clock and random function. Dropping it clears
//! the clock's queue and restores whatever was installed before, so no
//! virtual time or entropy cursor leaks into the next test.
//!
//! ```
//! use tempo_core::ambient;
//! use tempo_core::harness::Harness;
//!
//! let before = ambient::snapshot();
//! {
//!     let harness = Harness::with_entropy([0.5]).unwrap();
//!     assert_eq!(ambient::random().unwrap(), 0.5);
//!     harness.clock().advance(10).unwrap();
//!     assert_eq!(ambient::now_ms(), 10);
//! }
//! assert_eq!(ambient::snapshot(), before);
//! ```

use std::rc::Rc;

use crate::ambient::{self, EntropyOverride, TimerOverride};
use crate::clock::VirtualClock;
use crate::entropy::EntropySequence;
use crate::error::Result;

/// Fresh clock and entropy installed for the lifetime of one test case.
#[must_use = "the overrides are removed as soon as the harness is dropped"]
#[derive(Debug)]
pub struct Harness {
    clock: VirtualClock,
    entropy: EntropySequence,
    // Declared in reverse install order so they drop LIFO.
    entropy_guard: Option<EntropyOverride>,
    timer_guard: Option<TimerOverride>,
}

impl Harness {
    /// Install a virtual clock and an empty entropy sequence.
    pub fn new() -> Self {
        Self::install(EntropySequence::empty())
    }

    /// Install a virtual clock and an entropy sequence replaying `values`.
    pub fn with_entropy(values: impl Into<Vec<f64>>) -> Result<Self> {
        Ok(Self::install(EntropySequence::new(values)?))
    }

    fn install(entropy: EntropySequence) -> Self {
        let clock = VirtualClock::new();
        let timer_guard = ambient::override_timer(Rc::new(clock.clone()));
        let entropy_guard = ambient::override_entropy(Rc::new(entropy.clone()));
        tracing::debug!(values = entropy.values().len(), "Harness installed");
        Self {
            clock,
            entropy,
            entropy_guard: Some(entropy_guard),
            timer_guard: Some(timer_guard),
        }
    }

    /// The installed clock.
    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    /// The installed entropy sequence.
    pub fn entropy(&self) -> &EntropySequence {
        &self.entropy
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let dropped = self.clock.clear();
        drop(self.entropy_guard.take());
        drop(self.timer_guard.take());
        tracing::debug!(
            now = self.clock.now(),
            draws = self.entropy.draw_count(),
            dropped,
            "Harness torn down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;

    use crate::error::HarnessError;

    #[test]
    fn test_installs_both_overrides() {
        let harness = Harness::with_entropy(vec![0.7]).unwrap();
        let snap = ambient::snapshot();
        assert!(snap.entropy.is_some());
        assert!(snap.timer.is_some());

        assert_eq!(ambient::random().unwrap(), 0.7);
        assert_eq!(harness.entropy().draw_count(), 1);
    }

    #[test]
    fn test_empty_harness_draw_fails() {
        let _harness = Harness::new();
        assert_eq!(ambient::random(), Err(HarnessError::EmptySequence));
    }

    #[test]
    fn test_drop_restores_and_clears() {
        let before = ambient::snapshot();
        let fired = Rc::new(Cell::new(false));
        let clock = {
            let harness = Harness::new();
            let flag = Rc::clone(&fired);
            ambient::set_timeout(5, move || flag.set(true));
            harness.clock().clone()
        };

        assert_eq!(ambient::snapshot(), before);
        assert_eq!(clock.pending_count(), 0);
        clock.advance(10).unwrap();
        assert!(!fired.get());
    }

    #[test]
    fn test_fresh_harness_has_fresh_state() {
        {
            let harness = Harness::with_entropy(vec![0.1, 0.2]).unwrap();
            harness.clock().advance(500).unwrap();
            ambient::random().unwrap();
        }
        let harness = Harness::with_entropy(vec![0.1, 0.2]).unwrap();
        assert_eq!(harness.clock().now(), 0);
        assert_eq!(harness.entropy().draw_count(), 0);
        assert_eq!(ambient::random().unwrap(), 0.1);
    }

    #[test]
    fn test_stale_handle_cannot_cancel_next_harness_timer() {
        let stale = {
            let _harness = Harness::new();
            ambient::set_timeout(10, || {})
        };

        let harness = Harness::new();
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        let live = ambient::set_timeout(10, move || flag.set(true));

        assert_eq!(stale.sequence(), live.sequence());
        assert!(!ambient::clear_timeout(stale));
        harness.clock().advance(10).unwrap();
        assert!(fired.get());
    }
}
