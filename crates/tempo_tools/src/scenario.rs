//! Scenario loading and configuration.
//!
//! A scenario describes one deterministic test run: the entropy sequence to
//! replay, operations that settle after virtual delays, an optional debounce
//! burst, and how far to advance the clock.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempo_core::entropy::EntropySequence;
use tempo_core::error::HarnessError;
use thiserror::Error;

/// Error type for scenario operations.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// File not found.
    #[error("Scenario file not found: {0}")]
    FileNotFound(String),
    /// Failed to read file.
    #[error("Failed to read scenario file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse RON.
    #[error("Failed to parse scenario: {0}")]
    ParseError(#[from] ron::error::SpannedError),
    /// Parsed, but inconsistent.
    #[error("Invalid scenario '{name}': {message}")]
    Invalid {
        /// Scenario name.
        name: String,
        /// What is wrong with it.
        message: String,
    },
    /// The harness refused the scenario at run time.
    #[error("Harness error: {0}")]
    Harness(#[from] HarnessError),
}

/// How the scenario's operations are awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GateMode {
    /// Wait for every operation.
    #[default]
    All,
    /// Wait for the first operation to settle.
    First,
}

/// How an operation settles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Resolve with a value.
    Resolve(String),
    /// Reject with a reason.
    Reject(String),
}

/// One operation that settles after a virtual delay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationSpec {
    /// Unique name, used in reports.
    pub name: String,
    /// Virtual delay before it settles.
    pub delay_ms: u64,
    /// How it settles.
    pub outcome: Outcome,
}

impl OperationSpec {
    /// An operation resolving with `value` after `delay_ms`.
    #[must_use]
    pub fn resolve(name: &str, delay_ms: u64, value: &str) -> Self {
        Self {
            name: name.to_string(),
            delay_ms,
            outcome: Outcome::Resolve(value.to_string()),
        }
    }

    /// An operation rejecting with `reason` after `delay_ms`.
    #[must_use]
    pub fn reject(name: &str, delay_ms: u64, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            delay_ms,
            outcome: Outcome::Reject(reason.to_string()),
        }
    }
}

/// A burst of debounce triggers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DebounceSpec {
    /// Debounce window.
    pub window_ms: u64,
    /// Absolute virtual times of each trigger, ascending.
    pub triggers_at: Vec<u64>,
}

/// A complete scenario configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Values replayed by the ambient random function.
    #[serde(default)]
    pub entropy: Vec<f64>,
    /// Number of scores to draw (`floor(100 * random())`) before scheduling.
    #[serde(default)]
    pub draws: usize,
    /// Operations settled by virtual timers.
    #[serde(default)]
    pub operations: Vec<OperationSpec>,
    /// Gate used to await the operations.
    #[serde(default)]
    pub gate: GateMode,
    /// Optional debounce burst.
    #[serde(default)]
    pub debounce: Option<DebounceSpec>,
    /// How far to advance virtual time from the start of the run.
    pub advance_ms: u64,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            name: "Three Fetches".to_string(),
            description: "Three operations at 100/150/200ms awaited together".to_string(),
            entropy: vec![0.8, 0.2, 0.42],
            draws: 3,
            operations: vec![
                OperationSpec::resolve("a", 100, "A"),
                OperationSpec::resolve("b", 150, "B"),
                OperationSpec::resolve("c", 200, "C"),
            ],
            gate: GateMode::All,
            debounce: None,
            advance_ms: 200,
        }
    }
}

impl Scenario {
    /// Load a scenario from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_ron_str(&contents)
    }

    /// Load from a RON string (useful for embedded scenarios).
    pub fn from_ron_str(ron: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = ron::from_str(ron)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// A debounced search box: three keystrokes 100ms apart, 300ms window.
    #[must_use]
    pub fn debounced_search() -> Self {
        Self {
            name: "Debounced Search".to_string(),
            description: "Keystrokes at 0/100/200ms collapse into one search at 500ms".to_string(),
            entropy: Vec::new(),
            draws: 0,
            operations: Vec::new(),
            gate: GateMode::All,
            debounce: Some(DebounceSpec {
                window_ms: 300,
                triggers_at: vec![0, 100, 200],
            }),
            advance_ms: 600,
        }
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        let invalid = |message: String| ScenarioError::Invalid {
            name: self.name.clone(),
            message,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("scenario name is empty".into()));
        }
        EntropySequence::new(self.entropy.clone()).map_err(|e| invalid(e.to_string()))?;
        if self.draws > 0 && self.entropy.is_empty() {
            return Err(invalid(format!(
                "{} draws requested but no entropy configured",
                self.draws
            )));
        }

        let mut names = HashSet::new();
        for op in &self.operations {
            if !names.insert(op.name.as_str()) {
                return Err(invalid(format!("duplicate operation name '{}'", op.name)));
            }
        }
        if self.gate == GateMode::First && self.operations.is_empty() {
            return Err(invalid("gate First needs at least one operation".into()));
        }

        if let Some(debounce) = &self.debounce {
            if debounce.window_ms == 0 {
                return Err(invalid("debounce window must be at least 1ms".into()));
            }
            if debounce.triggers_at.windows(2).any(|w| w[1] < w[0]) {
                return Err(invalid("debounce triggers must be in ascending order".into()));
            }
        }
        Ok(())
    }
}
