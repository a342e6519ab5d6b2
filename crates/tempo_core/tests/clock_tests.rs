//! Virtual clock behaviour observed through the public API and the ambient
//! timer.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use tempo_core::ambient;
use tempo_core::clock::{VirtualClock, DEFAULT_RUN_LIMIT};
use tempo_core::error::{HarnessError, Result};
use tempo_core::harness::Harness;
use tempo_test_utils::determinism::{
    find_clock_divergence, find_first_divergence, run_scenario, verify_scenario_determinism,
};
use tempo_test_utils::strategies::arb_delays;

type Log = Rc<RefCell<Vec<(u64, usize)>>>;

fn schedule_all(clock: &VirtualClock, delays: &[u64]) -> Log {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    for (index, &delay) in delays.iter().enumerate() {
        let sink = Rc::clone(&log);
        let at = clock.clone();
        clock.schedule(delay, move || sink.borrow_mut().push((at.now(), index)));
    }
    log
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn test_same_due_fires_in_schedule_order() {
    let clock = VirtualClock::new();
    let log = schedule_all(&clock, &[50, 50, 50]);

    clock.advance(50).unwrap();
    assert_eq!(*log.borrow(), vec![(50, 0), (50, 1), (50, 2)]);
}

#[test]
fn test_nested_schedule_fires_in_same_advance() {
    let clock = VirtualClock::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    let inner_clock = clock.clone();
    let sink = Rc::clone(&log);
    clock.schedule(10, move || {
        sink.borrow_mut().push(("outer", inner_clock.now()));
        let sink = Rc::clone(&sink);
        let at = inner_clock.clone();
        inner_clock.schedule(5, move || sink.borrow_mut().push(("inner", at.now())));
    });

    assert_eq!(clock.advance(20).unwrap(), 2);
    assert_eq!(*log.borrow(), vec![("outer", 10), ("inner", 15)]);
    assert_eq!(clock.now(), 20);
}

#[test]
fn test_nested_schedule_past_window_waits() {
    let clock = VirtualClock::new();
    let fired = Rc::new(RefCell::new(false));

    let inner_clock = clock.clone();
    let flag = Rc::clone(&fired);
    clock.schedule(10, move || {
        inner_clock.schedule(100, move || *flag.borrow_mut() = true);
    });

    clock.advance(20).unwrap();
    assert!(!*fired.borrow());
    assert_eq!(clock.next_due(), Some(110));
    clock.advance(90).unwrap();
    assert!(*fired.borrow());
}

#[test]
fn test_cancelled_callback_never_fires() {
    let clock = VirtualClock::new();
    let log = schedule_all(&clock, &[10, 20]);
    let handle = clock.schedule(15, || panic!("cancelled callback ran"));

    assert!(clock.cancel(handle));
    assert!(!clock.cancel(handle));
    clock.advance(30).unwrap();
    assert_eq!(log.borrow().len(), 2);
}

#[test]
fn test_negative_advance_rejected() {
    let clock = VirtualClock::new();
    let log = schedule_all(&clock, &[0]);

    let err = clock.advance(-1).unwrap_err();
    assert!(matches!(err, HarnessError::InvalidArgument(_)));
    assert_eq!(clock.now(), 0);
    assert!(log.borrow().is_empty());
}

#[test]
fn test_zero_advance_fires_due_now() {
    let clock = VirtualClock::new();
    let log = schedule_all(&clock, &[0, 1]);

    assert_eq!(clock.advance(0).unwrap(), 1);
    assert_eq!(*log.borrow(), vec![(0, 0)]);
}

#[test]
fn test_run_all_reports_runaway_callback() {
    fn tick(clock: VirtualClock) {
        let next = clock.clone();
        clock.schedule(1, move || tick(next));
    }

    let clock = VirtualClock::new();
    tick(clock.clone());
    let err = clock.run_all(100).unwrap_err();
    assert!(matches!(err, HarnessError::InvalidState(_)));
    clock.clear();
}

// =============================================================================
// Ambient Timer
// =============================================================================

#[test]
fn test_ambient_timer_follows_harness_clock() {
    let harness = Harness::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    for delay in [300, 100, 200] {
        let sink = Rc::clone(&log);
        ambient::set_timeout(delay, move || sink.borrow_mut().push(ambient::now_ms()));
    }
    let skipped = ambient::set_timeout(150, || panic!("cleared timeout ran"));
    assert!(ambient::clear_timeout(skipped));

    harness.clock().run_all(DEFAULT_RUN_LIMIT).unwrap();
    assert_eq!(*log.borrow(), vec![100, 200, 300]);
}

#[test]
fn test_harness_drop_discards_pending_callbacks() {
    let ran = Rc::new(RefCell::new(false));
    {
        let _harness = Harness::new();
        let flag = Rc::clone(&ran);
        ambient::set_timeout(10, move || *flag.borrow_mut() = true);
    }
    let harness = Harness::new();
    harness.clock().advance(1_000).unwrap();
    assert!(!*ran.borrow());
    assert_eq!(harness.clock().pending_count(), 0);
}

// =============================================================================
// Determinism
// =============================================================================

#[test]
fn test_scenario_runs_are_identical() {
    let result = verify_scenario_determinism(5, &[0.3, 0.6, 0.9], |harness| {
        for _ in 0..3 {
            let delay = (ambient::random()? * 1_000.0) as u64;
            ambient::set_timeout(delay, || {});
        }
        harness.clock().run_all(DEFAULT_RUN_LIMIT)?;
        Ok(())
    })
    .unwrap();
    result.assert_deterministic();
}

#[test]
fn test_different_entropy_diverges() {
    let scenario = |harness: &Harness| -> Result<()> {
        let delay = (ambient::random()? * 1_000.0) as u64;
        harness.clock().schedule_labeled(delay, "draw", || {});
        harness.clock().run_all(DEFAULT_RUN_LIMIT)?;
        Ok(())
    };
    let a = run_scenario(&[0.1], scenario).unwrap();
    let b = run_scenario(&[0.2], scenario).unwrap();

    assert_eq!(find_first_divergence(&a, &b), Some(0));
    assert_eq!(find_first_divergence(&a, &a.clone()), None);
}

#[test]
fn test_identical_setups_never_diverge() {
    let setup = || {
        let clock = VirtualClock::new();
        for delay in [5, 12, 12, 40] {
            clock.schedule(delay, || {});
        }
        clock
    };
    assert_eq!(find_clock_divergence(setup, 7, 10), None);
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_fires_in_due_then_schedule_order(delays in arb_delays(32)) {
        let clock = VirtualClock::new();
        let log = schedule_all(&clock, &delays);
        let horizon = delays.iter().copied().max().unwrap_or(0);

        clock.advance(i64::try_from(horizon).unwrap()).unwrap();

        let mut expected: Vec<(u64, usize)> = delays.iter().copied().zip(0..).collect();
        expected.sort_unstable();
        prop_assert_eq!(log.borrow().clone(), expected);
    }

    #[test]
    fn prop_split_advance_matches_single(delays in arb_delays(16), split in 0u64..10_000) {
        let single = VirtualClock::new();
        let single_log = schedule_all(&single, &delays);
        single.advance(10_000).unwrap();

        let stepped = VirtualClock::new();
        let stepped_log = schedule_all(&stepped, &delays);
        stepped.advance(i64::try_from(split).unwrap()).unwrap();
        stepped.advance(i64::try_from(10_000 - split).unwrap()).unwrap();

        prop_assert_eq!(single_log.borrow().clone(), stepped_log.borrow().clone());
        prop_assert_eq!(single.trace(), stepped.trace());
    }

    #[test]
    fn prop_negative_advance_is_noop(by in i64::MIN..0) {
        let clock = VirtualClock::new();
        clock.schedule(0, || {});
        prop_assert!(clock.advance(by).is_err());
        prop_assert_eq!(clock.now(), 0);
        prop_assert_eq!(clock.pending_count(), 1);
    }
}
