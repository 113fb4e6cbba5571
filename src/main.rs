use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use homestead::{
    engine::record_run,
    policy::{Policy, RandomPolicy, UtilityPolicy, Weights},
    runlog::{RunIdSource, TimestampRunIds},
    scenario::{Scenario, ScenarioLoader},
    search::{EvolutionarySearch, PolicyFile, SearchSettings, SimulationEvaluator},
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Homestead settlement simulator and policy trainer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one simulation and write its run directory
    Run(RunArgs),
    /// Search for better utility weights
    Train(TrainArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AgentKind {
    Random,
    Utility,
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// Scenario YAML file; built-in defaults when omitted
    #[arg(long)]
    scenario: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    ticks: Option<u64>,

    /// Snapshot cadence in ticks (0 disables)
    #[arg(long)]
    snapshot_every: Option<u64>,

    #[arg(long, value_enum, default_value = "random")]
    agent: AgentKind,

    /// Policy file with utility weights (utility agent only)
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Build a storage as soon as materials are held (utility agent only)
    #[arg(long)]
    bootstrap_storage: bool,

    #[arg(long, default_value = "runs")]
    runs_dir: PathBuf,
}

#[derive(Debug, clap::Args)]
struct TrainArgs {
    #[arg(long)]
    scenario: Option<PathBuf>,

    #[arg(long, default_value_t = 10)]
    gens: u32,

    #[arg(long, default_value_t = 8)]
    pop: u32,

    /// Ticks per evaluation; the scenario's value when omitted
    #[arg(long)]
    ticks: Option<u64>,

    /// Evaluation and mutation seed; the scenario's seed when omitted
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value_t = 0.35)]
    sigma: f64,

    #[arg(long, default_value = "policies/best_policy.json")]
    policy: PathBuf,

    /// Keep a run directory for every evaluation
    #[arg(long)]
    write_runs: bool,

    #[arg(long, default_value = "runs")]
    runs_dir: PathBuf,

    /// Evaluate candidates one at a time
    #[arg(long)]
    serial: bool,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

fn load_scenario(path: Option<&PathBuf>) -> Result<Scenario> {
    match path {
        Some(path) => Ok(ScenarioLoader::new(".").load(path)?),
        None => Ok(Scenario::default()),
    }
}

fn run(args: RunArgs) -> Result<()> {
    let scenario = load_scenario(args.scenario.as_ref())?.with_overrides(
        args.seed,
        args.ticks,
        args.snapshot_every,
    );
    scenario.validate()?;

    let policy: Box<dyn Policy> = match args.agent {
        AgentKind::Random => Box::new(RandomPolicy::new()),
        AgentKind::Utility => {
            let weights = match &args.policy {
                Some(path) => Weights::from_map(PolicyFile::load(path)?.weights).with_defaults(),
                None => Weights::defaults(),
            };
            Box::new(UtilityPolicy::new(weights).with_storage_bootstrap(args.bootstrap_storage))
        }
    };

    let run_id = TimestampRunIds.next_run_id();
    let recorded = record_run(&scenario, policy, &run_id, &args.runs_dir)?;
    println!("Run complete: {}", recorded.report.run_id);
    println!("Outputs in: {}", recorded.dir.display());
    println!("Score: {}", recorded.report.score);
    Ok(())
}

fn train(args: TrainArgs) -> Result<()> {
    let scenario =
        load_scenario(args.scenario.as_ref())?.with_overrides(args.seed, args.ticks, None);
    scenario.validate()?;
    let seed = scenario.seed;

    let mut evaluator = SimulationEvaluator::new(scenario);
    if args.write_runs {
        evaluator = evaluator.recording(args.runs_dir.clone(), TimestampRunIds);
    }
    let settings = SearchSettings {
        generations: args.gens,
        population: args.pop,
        sigma: args.sigma,
        seed,
        parallel: !args.serial,
    };
    let outcome = EvolutionarySearch::new(settings, evaluator, args.policy.clone()).run()?;
    match outcome.best_score {
        Some(score) => println!("Best score: {score}"),
        None => println!("No finite score found"),
    }
    println!("Policy file: {}", args.policy.display());
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    match Cli::parse().command {
        Command::Run(args) => run(args),
        Command::Train(args) => train(args),
    }
}
