//! Determinism testing utilities.
//!
//! Provides a harness for verifying that code driven by the virtual clock and
//! a replayed entropy sequence produces identical results on every run.
//!
//! # Testing Strategy
//!
//! Tests of async and randomized code go flaky for a handful of reasons:
//!
//! - **Wall-clock delays**: a fixed sleep that is "usually long enough".
//!   Everything time-based goes through [`tempo_core::ambient`] and a
//!   [`VirtualClock`] instead.
//!
//! - **Random draws**: outputs that are only right "most of the time".
//!   Draws come from an [`tempo_core::entropy::EntropySequence`], so each
//!   input sequence has exactly one correct output.
//!
//! - **Completion guesses**: asserting before the work has finished. Gates
//!   from [`tempo_core::gate`] become ready only on real settlement.
//!
//! # Test Levels
//!
//! 1. **Unit tests**: individual primitives (clock ordering, wraparound)
//! 2. **Property tests**: arbitrary delays and sequences still obey the laws
//! 3. **Scenario tests**: whole scenarios hash identically across runs

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tempo_core::clock::VirtualClock;
use tempo_core::error::Result;
use tempo_core::harness::Harness;
use tempo_core::trace::FiringTrace;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Hashes from each run.
    pub hashes: Vec<u64>,
    /// Number of steps run per repetition.
    pub steps: u64,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for deterministic code).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that every run matched, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the runs produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Runs are non-deterministic!\n\
                 Runs: {}\n\
                 Steps: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.steps,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run a stepped computation multiple times and verify determinism.
///
/// # Arguments
///
/// * `runs` - Number of repetitions
/// * `steps` - Number of steps per repetition
/// * `setup` - Function to create initial state
/// * `step` - Function to advance state by one step
/// * `hash` - Function to compute state hash
///
/// # Example
///
/// ```
/// use tempo_core::clock::VirtualClock;
/// use tempo_test_utils::determinism::verify_determinism;
///
/// let result = verify_determinism(
///     3,
///     10,
///     || {
///         let clock = VirtualClock::new();
///         clock.schedule(5, || {});
///         clock
///     },
///     |clock| { clock.advance(1).unwrap(); },
///     |clock| clock.trace().state_hash(),
/// );
/// result.assert_deterministic();
/// ```
pub fn verify_determinism<S, Setup, Step, HashFn>(
    runs: usize,
    steps: u64,
    setup: Setup,
    step: Step,
    hash: HashFn,
) -> DeterminismResult
where
    Setup: Fn() -> S,
    Step: Fn(&mut S),
    HashFn: Fn(&S) -> u64,
{
    let mut hashes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let mut state = setup();

        for _ in 0..steps {
            step(&mut state);
        }

        hashes.push(hash(&state));
    }

    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        steps,
    }
}

/// Outcome of one scenario run under a fresh [`Harness`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScenarioRun {
    /// Callbacks fired, in order.
    pub trace: FiringTrace,
    /// Virtual time when the scenario returned.
    pub final_time: u64,
    /// Entropy draws performed.
    pub draws: usize,
}

impl ScenarioRun {
    /// Hash of the whole run.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        compute_hash(self)
    }
}

/// Run `scenario` once under a fresh harness replaying `entropy`.
///
/// # Errors
///
/// Propagates harness construction errors and whatever the scenario returns.
pub fn run_scenario<F>(entropy: &[f64], scenario: F) -> Result<ScenarioRun>
where
    F: FnOnce(&Harness) -> Result<()>,
{
    let harness = Harness::with_entropy(entropy.to_vec())?;
    scenario(&harness)?;
    Ok(ScenarioRun {
        trace: harness.clock().trace(),
        final_time: harness.clock().now(),
        draws: harness.entropy().draw_count(),
    })
}

/// Run a scenario `runs` times, each under a fresh harness, and compare.
///
/// # Errors
///
/// Returns the first error any run produced.
pub fn verify_scenario_determinism<F>(
    runs: usize,
    entropy: &[f64],
    scenario: F,
) -> Result<DeterminismResult>
where
    F: Fn(&Harness) -> Result<()>,
{
    let mut hashes = Vec::with_capacity(runs);
    for run in 0..runs {
        let outcome = run_scenario(entropy, &scenario)?;
        tracing::debug!(run, hash = outcome.state_hash(), "Scenario run complete");
        hashes.push(outcome.state_hash());
    }
    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);
    Ok(DeterminismResult {
        is_deterministic,
        hashes,
        steps: 1,
    })
}

/// Find the first firing at which two runs diverge.
///
/// Returns `None` if both traces are identical.
#[must_use]
pub fn find_first_divergence(a: &ScenarioRun, b: &ScenarioRun) -> Option<usize> {
    a.trace.first_divergence(&b.trace)
}

/// Step two clocks side by side and report the first step after which their
/// traces differ.
///
/// Useful for pinning down where nondeterminism creeps into a setup.
pub fn find_clock_divergence<F>(setup_fn: F, step_ms: i64, num_steps: u64) -> Option<u64>
where
    F: Fn() -> VirtualClock,
{
    let a = setup_fn();
    let b = setup_fn();

    for step in 0..num_steps {
        if a.advance(step_ms).is_err() || b.advance(step_ms).is_err() {
            return Some(step);
        }
        if a.trace() != b.trace() || a.now() != b.now() {
            return Some(step);
        }
    }

    None
}

/// Compute a hash for any hashable value.
#[must_use]
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for generating harness inputs.
pub mod strategies {
    use proptest::prelude::*;

    /// A single entropy value in `[0, 1)`.
    pub fn arb_entropy_value() -> impl Strategy<Value = f64> {
        0.0f64..1.0
    }

    /// A non-empty entropy sequence of up to `max_len` values.
    pub fn arb_entropy_sequence(max_len: usize) -> impl Strategy<Value = Vec<f64>> {
        proptest::collection::vec(arb_entropy_value(), 1..max_len.max(2))
    }

    /// A virtual delay in milliseconds.
    pub fn arb_delay() -> impl Strategy<Value = u64> {
        0u64..10_000
    }

    /// A list of delays.
    pub fn arb_delays(max_len: usize) -> impl Strategy<Value = Vec<u64>> {
        proptest::collection::vec(arb_delay(), 1..max_len.max(2))
    }

    /// Gaps between consecutive debounce triggers, each shorter than `window`.
    pub fn arb_burst_gaps(window: u64, max_len: usize) -> impl Strategy<Value = Vec<u64>> {
        proptest::collection::vec(0..window.max(1), 0..max_len.max(1))
    }
}
