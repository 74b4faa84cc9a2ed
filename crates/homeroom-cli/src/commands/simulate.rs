use clap::Args;
use homeroom_core::runtime::{LeaderExit, SimulationHarness, SimulationScenario, SimulationSeed};
use homeroom_core::{Event, Settings};
use serde::Serialize;

use super::{print_json, CliResult};

#[derive(Args)]
pub struct SimulateArgs {
    /// Number of contexts attached to the learner
    #[arg(long, default_value_t = 3)]
    contexts: usize,
    /// Simulated seconds
    #[arg(long, default_value_t = 60)]
    seconds: u64,
    /// Remove the leader at this second
    #[arg(long)]
    kill_leader_at: Option<u64>,
    /// The removed leader resigns instead of crashing
    #[arg(long)]
    resign: bool,
    /// Seed for the election jitter
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Sync through an in-memory durable store
    #[arg(long)]
    durable: bool,
    /// Work phase length in minutes
    #[arg(long, default_value_t = 25)]
    work_minutes: u32,
    /// Leave the timer idle
    #[arg(long)]
    idle: bool,
    /// Print every event, not only leadership changes and completions
    #[arg(long)]
    verbose: bool,
}

#[derive(Serialize)]
struct Summary {
    scenario: String,
    elections: usize,
    completions: usize,
    signals: u64,
    max_concurrent_leaders: usize,
    converged_at_ms: Option<u64>,
    leader: Option<String>,
}

pub fn run(args: SimulateArgs) -> CliResult {
    let exit = if args.resign {
        LeaderExit::Resign
    } else {
        LeaderExit::Crash
    };
    let settings = Settings {
        work_minutes: args.work_minutes,
        ..Settings::default()
    };
    settings.validate()?;

    let scenario = SimulationScenario::new("cli", SimulationSeed::new(args.seed))
        .with_contexts(args.contexts)
        .with_seconds(args.seconds)
        .with_start_at((!args.idle).then_some(0))
        .with_kill_leader_at(args.kill_leader_at, exit)
        .with_durable(args.durable)
        .with_settings(settings);
    let result = SimulationHarness::new().run(&scenario)?;

    for entry in &result.timeline {
        let notable = matches!(
            entry.event,
            Event::LeaderElected { .. } | Event::LeaderDemoted { .. } | Event::PhaseCompleted { .. }
        );
        if args.verbose || notable {
            println!("{}", serde_json::to_string(entry)?);
        }
    }

    let summary = Summary {
        scenario: result.scenario.clone(),
        elections: result.elections().len(),
        completions: result.completions(),
        signals: result.total_signals(),
        max_concurrent_leaders: result.max_concurrent_leaders,
        converged_at_ms: result.converged_at_ms,
        leader: result
            .contexts
            .iter()
            .find(|c| c.alive && c.leader)
            .map(|c| c.context.to_string()),
    };
    print_json(&summary)
}
