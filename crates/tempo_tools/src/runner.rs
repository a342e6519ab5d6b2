//! Scenario runner.
//!
//! Runs a [`Scenario`] under a fresh [`Harness`] and summarises what happened
//! in a serializable [`ScenarioReport`].

use std::cell::Cell;
use std::rc::Rc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tempo_core::clock::VirtualClock;
use tempo_core::debounce::Debouncer;
use tempo_core::error::HarnessError;
use tempo_core::gate::{await_all, await_one};
use tempo_core::harness::Harness;
use tempo_core::operation::{OperationId, PendingOperation};
use tempo_core::trace::FiringRecord;
use tempo_test_utils::determinism::{compute_hash, DeterminismResult};
use tempo_test_utils::fixtures::score_from_draws;

use crate::scenario::{GateMode, Outcome, Scenario, ScenarioError};

/// How the gate over the scenario's operations ended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GateReport {
    /// Every operation resolved (values in declaration order).
    Resolved {
        /// Resolved values.
        values: Vec<String>,
    },
    /// The first operation to settle won the race.
    Won {
        /// Name of the winning operation.
        winner: String,
        /// Its value, if it resolved.
        value: Option<String>,
        /// Its rejection reason, if it rejected.
        reason: Option<String>,
    },
    /// The gate failed with the earliest rejection.
    Rejected {
        /// Name of the rejected operation.
        operation: String,
        /// Rejection reason.
        reason: String,
    },
    /// The gate was still waiting when the scenario's time ran out.
    Unsettled {
        /// Operations still pending.
        pending: Vec<String>,
    },
}

/// Debounce burst summary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DebounceReport {
    /// Triggers issued.
    pub triggers: u64,
    /// Completions fired.
    pub fired: u64,
    /// Virtual time of the last completion.
    pub last_fired_at: Option<u64>,
    /// Index of the trigger whose argument reached the action.
    pub winning_trigger: Option<usize>,
}

/// Result of one scenario run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// Scenario name.
    pub name: String,
    /// Virtual time at the end of the run.
    pub final_time: u64,
    /// Scores drawn before scheduling.
    pub scores: Vec<u32>,
    /// Entropy draws performed.
    pub draw_count: usize,
    /// Gate outcome.
    pub gate: GateReport,
    /// Debounce summary, if the scenario had a burst.
    pub debounce: Option<DebounceReport>,
    /// Every fired callback, in order.
    pub fired: Vec<FiringRecord>,
    /// Hash of the firing trace.
    pub trace_hash: u64,
}

impl ScenarioReport {
    /// Hash of the full report.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        compute_hash(self)
    }
}

/// Run `scenario` once.
pub fn run_scenario(scenario: &Scenario) -> Result<ScenarioReport, ScenarioError> {
    scenario.validate()?;
    tracing::info!(name = %scenario.name, "Running scenario");

    let harness = Harness::with_entropy(scenario.entropy.clone())?;
    let clock = harness.clock();

    let scores = score_from_draws(scenario.draws)?;

    let named: Vec<(String, PendingOperation<String>)> = scenario
        .operations
        .iter()
        .map(|spec| {
            let outcome = match &spec.outcome {
                Outcome::Resolve(value) => Ok(value.clone()),
                Outcome::Reject(reason) => Err(reason.clone()),
            };
            let op = clock.settle_after(spec.delay_ms, Some(spec.name.clone()), outcome);
            (spec.name.clone(), op)
        })
        .collect();
    let operations: Vec<_> = named.iter().map(|(_, op)| op.clone()).collect();
    let name_of = |id: OperationId| {
        named
            .iter()
            .find(|(_, op)| op.id() == id)
            .map_or_else(String::new, |(name, _)| name.clone())
    };

    let winning_trigger = Rc::new(Cell::new(None));
    let debouncer = match &scenario.debounce {
        Some(spec) => {
            let winner = Rc::clone(&winning_trigger);
            let debouncer = Rc::new(Debouncer::new(clock, spec.window_ms, move |index: usize| {
                winner.set(Some(index));
                index
            })?);
            for (index, &at) in spec.triggers_at.iter().enumerate() {
                let target = Rc::clone(&debouncer);
                clock.schedule_labeled(at, format!("trigger-{index}"), move || {
                    target.trigger(index);
                });
            }
            Some(debouncer)
        }
        None => None,
    };

    let gate = match scenario.gate {
        GateMode::All => {
            let mut all = await_all(operations.clone());
            advance_by(clock, scenario.advance_ms)?;
            match (&mut all).now_or_never() {
                Some(Ok(values)) => GateReport::Resolved { values },
                Some(Err(HarnessError::OperationRejected { operation, reason })) => {
                    GateReport::Rejected {
                        operation: name_of(operation),
                        reason,
                    }
                }
                Some(Err(other)) => return Err(other.into()),
                None => unsettled(&named),
            }
        }
        GateMode::First => {
            let mut race = await_one(operations.clone())?;
            advance_by(clock, scenario.advance_ms)?;
            match (&mut race).now_or_never() {
                Some((winner, Ok(value))) => GateReport::Won {
                    winner: name_of(winner),
                    value: Some(value),
                    reason: None,
                },
                Some((winner, Err(HarnessError::OperationRejected { reason, .. }))) => {
                    GateReport::Won {
                        winner: name_of(winner),
                        value: None,
                        reason: Some(reason),
                    }
                }
                Some((_, Err(other))) => return Err(other.into()),
                None => unsettled(&named),
            }
        }
    };

    let debounce = debouncer.map(|d| DebounceReport {
        triggers: d.trigger_count(),
        fired: d.fired_count(),
        last_fired_at: d.last_fired_at(),
        winning_trigger: winning_trigger.get(),
    });

    let trace = clock.trace();
    let report = ScenarioReport {
        name: scenario.name.clone(),
        final_time: clock.now(),
        scores,
        draw_count: harness.entropy().draw_count(),
        gate,
        debounce,
        fired: trace.records().to_vec(),
        trace_hash: trace.state_hash(),
    };
    tracing::info!(
        name = %report.name,
        final_time = report.final_time,
        fired = report.fired.len(),
        "Scenario finished"
    );
    Ok(report)
}

/// Run `scenario` `runs` times and check every report hashes the same.
pub fn repeat_scenario(scenario: &Scenario, runs: usize) -> Result<DeterminismResult, ScenarioError> {
    let mut hashes = Vec::with_capacity(runs);
    for _ in 0..runs {
        hashes.push(run_scenario(scenario)?.state_hash());
    }
    Ok(DeterminismResult {
        is_deterministic: hashes.windows(2).all(|w| w[0] == w[1]),
        hashes,
        steps: scenario.advance_ms,
    })
}

/// Advance `clock` by `by_ms` relative to its current time.
fn advance_by(clock: &VirtualClock, by_ms: u64) -> Result<usize, HarnessError> {
    clock.advance_to(clock.now().saturating_add(by_ms))
}

fn unsettled(named: &[(String, PendingOperation<String>)]) -> GateReport {
    GateReport::Unsettled {
        pending: named
            .iter()
            .filter(|(_, op)| op.is_pending())
            .map(|(name, _)| name.clone())
            .collect(),
    }
}
