//! Runs the bundled scenario files end to end.

use std::path::PathBuf;

use tempo_tools::runner::{repeat_scenario, run_scenario, GateReport};
use tempo_tools::scenario::Scenario;
use tempo_tools::validate::validate_scenario_directory;

fn scenario_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("scenarios")
}

fn load(file: &str) -> Scenario {
    Scenario::load(scenario_dir().join(file)).unwrap()
}

#[test]
fn test_bundled_scenarios_validate() {
    assert_eq!(validate_scenario_directory(&scenario_dir()).unwrap(), 3);
}

#[test]
fn test_three_fetches_file_matches_builtin() {
    let from_file = run_scenario(&load("three_fetches.ron")).unwrap();
    let builtin = run_scenario(&Scenario::default()).unwrap();

    assert_eq!(from_file.scores, vec![80, 20, 42]);
    assert_eq!(from_file.gate, builtin.gate);
    assert_eq!(from_file.trace_hash, builtin.trace_hash);
}

#[test]
fn test_debounced_search_file() {
    let report = run_scenario(&load("debounced_search.ron")).unwrap();
    let debounce = report.debounce.unwrap();

    assert_eq!(debounce.fired, 1);
    assert_eq!(debounce.last_fired_at, Some(500));
    assert_eq!(debounce.winning_trigger, Some(2));
}

#[test]
fn test_race_file_timeout_wins() {
    let report = run_scenario(&load("race.ron")).unwrap();
    assert_eq!(
        report.gate,
        GateReport::Won {
            winner: "timeout".into(),
            value: None,
            reason: Some("timed out".into()),
        }
    );
}

#[test]
fn test_bundled_scenarios_repeat_identically() {
    for file in ["three_fetches.ron", "debounced_search.ron", "race.ron"] {
        let result = repeat_scenario(&load(file), 3).unwrap();
        assert!(result.is_deterministic, "{file} diverged: {:?}", result.hashes);
    }
}

#[test]
fn test_report_serializes_to_json() {
    let report = run_scenario(&load("three_fetches.ron")).unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["gate"]["status"], "resolved");
    assert_eq!(json["final_time"], 200);
    assert_eq!(json["fired"].as_array().unwrap().len(), 3);
}
