use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use portfolio_mc::config::{self, SimulationConfig};
use portfolio_mc::report::{SimulationReport, print_summary};
use portfolio_mc::{CorrelationPolicy, PortfolioSimulator};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, ValueEnum)]
enum Preset {
    SingleAsset,
    ThreeAsset,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Portfolio-MC: correlated Monte Carlo simulation of portfolio value and tail risk",
    after_help = "EXAMPLES:
    # Three-asset demo portfolio, 95% VaR
    cargo run --release

    # Custom portfolio from JSON, parallel, 99% VaR
    cargo run --release -- --config portfolio.json --parallel --confidence 0.99

    # Machine-readable output
    cargo run --release -- --preset single-asset --json"
)]
struct Args {
    /// JSON file with a full simulation config. Overrides --preset.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Built-in configuration used when no --config is given
    #[arg(long, value_enum, default_value_t = Preset::ThreeAsset)]
    preset: Preset,

    /// Number of simulated scenarios
    #[arg(long)]
    scenarios: Option<usize>,

    /// Number of time steps over the horizon
    #[arg(long)]
    steps: Option<usize>,

    /// RNG seed
    #[arg(long)]
    seed: Option<u64>,

    /// VaR / expected shortfall confidence level, e.g. 0.95
    #[arg(long)]
    confidence: Option<f64>,

    /// Replace a non-PSD correlation matrix with its nearest correlation matrix instead of failing
    #[arg(long)]
    repair_correlation: bool,

    /// Spread scenarios over a rayon thread pool
    #[arg(long)]
    parallel: bool,

    /// Worker threads for --parallel (default: all logical cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Print the report as JSON instead of the text summary
    #[arg(long)]
    json: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

fn resolve_config(args: &Args) -> Result<SimulationConfig> {
    let mut cfg = match &args.config {
        Some(path) => config::load_config(path)?,
        None => match args.preset {
            Preset::SingleAsset => SimulationConfig::single_asset(),
            Preset::ThreeAsset => SimulationConfig::three_asset(),
        },
    };
    cfg.apply_env_overrides()?;

    if let Some(scenarios) = args.scenarios {
        cfg.num_scenarios = scenarios;
    }
    if let Some(steps) = args.steps {
        cfg.num_steps = steps;
    }
    if let Some(seed) = args.seed {
        cfg.seed = seed;
    }
    if let Some(confidence) = args.confidence {
        cfg.confidence_level = confidence;
    }
    if args.repair_correlation {
        cfg.correlation_policy = CorrelationPolicy::NearestCorrelation;
    }
    Ok(cfg)
}

fn run(args: &Args) -> Result<()> {
    let cfg = resolve_config(args)?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(());
    }

    let simulator = PortfolioSimulator::new(cfg.clone()).context("Invalid simulation request")?;

    let outcome = if args.parallel {
        config::init_cpu_parallelism(args.threads);
        simulator.run_parallel()
    } else {
        simulator.run()
    };

    if args.json {
        let report = SimulationReport::new(&cfg, &outcome, simulator.covariance().was_repaired());
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&cfg, &outcome);
    }
    Ok(())
}

fn main() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("portfolio_mc=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => info!("Simulation completed."),
        Err(e) => {
            error!("Simulation failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
