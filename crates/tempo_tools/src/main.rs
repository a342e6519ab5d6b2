//! Tempo Harness - Scenario Tools

use std::path::Path;

use clap::{Parser, Subcommand};
use tempo_tools::runner::{repeat_scenario, run_scenario, GateReport, ScenarioReport};
use tempo_tools::scenario::Scenario;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tempo-tools")]
#[command(about = "Run and validate deterministic harness scenarios")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file and print its report
    Run {
        /// Path to a .ron scenario
        path: String,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Run this many times and check the reports match
        #[arg(long, default_value_t = 1)]
        repeat: usize,
    },
    /// Validate scenario files
    Validate {
        /// Path to scenario directory
        #[arg(default_value = "crates/tempo_tools/scenarios")]
        path: String,
    },
}

fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { path, json, repeat } => {
            if let Err(e) = run(&path, json, repeat) {
                tracing::error!("Scenario failed: {e}");
                std::process::exit(1);
            }
        }
        Commands::Validate { path } => {
            tracing::info!("Validating scenarios in: {path}");
            match tempo_tools::validate::validate_scenario_directory(Path::new(&path)) {
                Ok(count) => tracing::info!("Validation passed ({count} scenarios)"),
                Err(e) => {
                    tracing::error!("Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

fn run(path: &str, json: bool, repeat: usize) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = Scenario::load(path)?;

    if repeat > 1 {
        let result = repeat_scenario(&scenario, repeat)?;
        if !result.is_deterministic {
            return Err(format!("reports diverged across {repeat} runs: {:?}", result.hashes).into());
        }
        tracing::info!(runs = repeat, "All runs produced identical reports");
    }

    let report = run_scenario(&scenario)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &ScenarioReport) {
    println!("Scenario: {}", report.name);
    println!("  final time: {}ms", report.final_time);
    if !report.scores.is_empty() {
        let total: u32 = report.scores.iter().sum();
        println!("  scores: {:?} (total {total})", report.scores);
    }
    match &report.gate {
        GateReport::Resolved { values } => println!("  gate: resolved {values:?}"),
        GateReport::Won {
            winner,
            value,
            reason,
        } => match (value, reason) {
            (Some(value), _) => println!("  gate: {winner} won with {value}"),
            (None, Some(reason)) => println!("  gate: {winner} won by rejecting ({reason})"),
            (None, None) => println!("  gate: {winner} won"),
        },
        GateReport::Rejected { operation, reason } => {
            println!("  gate: rejected by {operation} ({reason})");
        }
        GateReport::Unsettled { pending } => println!("  gate: still waiting on {pending:?}"),
    }
    if let Some(debounce) = &report.debounce {
        println!(
            "  debounce: {} triggers, {} fired, last at {:?}",
            debounce.triggers, debounce.fired, debounce.last_fired_at
        );
    }
    for record in &report.fired {
        println!(
            "  t={:>6} #{:<4} {}",
            record.due,
            record.seq,
            record.label.as_deref().unwrap_or("-")
        );
    }
    println!("  trace hash: {:016x}", report.trace_hash);
}
