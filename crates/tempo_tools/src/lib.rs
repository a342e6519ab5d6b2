//! # Tempo Tools
//!
//! Command-line support for the deterministic harness:
//! - RON scenario loading and validation
//! - Scenario runner producing serializable reports
//! - Repeat runs to confirm determinism

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod runner;
pub mod scenario;
pub mod validate;

pub use runner::{repeat_scenario, run_scenario, GateReport, ScenarioReport};
pub use scenario::{Scenario, ScenarioError};
