//! replica-commit: in-process simulation of a replicated object creation
//!
//! Runs one creation transaction across a primary and a configurable group of
//! replicas, then prints the outcome.
//!
//! # Usage
//!
//! ```bash
//! # Three healthy replicas, default settings
//! ./replica-commit
//!
//! # One replica leaves mid-vote, one failure tolerated
//! REPLICA_COMMIT_FAILURE_THRESHOLD=1 ./replica-commit --replicas 4 --departing 1
//!
//! # A silent replica with a custom configuration file
//! ./replica-commit -c /path/to/config.json --silent 1
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use replica_commit::config::{load_config_with_env, load_default_with_env, Config};
use replica_commit::simulation::{self, SimulationConfig, SimulationReport};
use replica_commit::TransactionState;

/// Command-line arguments
struct Args {
    /// Configuration file path (defaults apply when absent)
    config_path: Option<PathBuf>,
    /// Generate default configuration
    generate_config: Option<PathBuf>,
    /// Group shape
    simulation: SimulationConfig,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = std::env::args().skip(1);
        let mut config_path = None;
        let mut generate_config = None;
        let mut simulation = SimulationConfig::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    config_path = Some(PathBuf::from(value(&arg, args.next())?));
                }
                "-g" | "--generate-config" => {
                    generate_config = Some(PathBuf::from(value(&arg, args.next())?));
                }
                "-n" | "--replicas" => simulation.replicas = number(&arg, args.next())?,
                "--failing" => simulation.failing = number(&arg, args.next())?,
                "--departing" => simulation.departing = number(&arg, args.next())?,
                "--silent" => simulation.silent = number(&arg, args.next())?,
                "--late-joiners" => simulation.late_joiners = number(&arg, args.next())?,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("replica-commit v{}", replica_commit::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Ok(Self {
            config_path,
            generate_config,
            simulation,
        })
    }
}

fn value(flag: &str, next: Option<String>) -> Result<String> {
    next.with_context(|| format!("{flag} requires a value"))
}

fn number<T>(flag: &str, next: Option<String>) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = value(flag, next)?;
    raw.parse()
        .with_context(|| format!("{flag}: invalid number {raw:?}"))
}

fn print_help() {
    println!(
        r#"replica-commit v{}

Simulate a two-phase commit of a replicated object creation.

USAGE:
    replica-commit [OPTIONS]

OPTIONS:
    -c, --config <PATH>           Configuration file path [default: built-in defaults]
    -g, --generate-config <PATH>  Write the default configuration and exit
    -n, --replicas <N>            Replicas in the group [default: 3]
        --failing <N>             Replicas that reject the creation [default: 0]
        --departing <N>           Replicas that leave instead of answering [default: 0]
        --silent <N>              Replicas that never answer [default: 0]
        --late-joiners <N>        Peers joining after voting started [default: 0]
    -h, --help                    Print help information
    -v, --version                 Print version information

ENVIRONMENT:
    REPLICA_COMMIT_TIMEOUT_MS          Override the vote timeout
    REPLICA_COMMIT_FAILURE_THRESHOLD   Override the failure threshold
    REPLICA_COMMIT_SEND_TIMEOUT_MS     Override the per-send timeout
    REPLICA_COMMIT_LOG_LEVEL           Override log level (trace, debug, info, warn, error)
"#,
        replica_commit::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    match (config.log.format.as_str(), config.log.timestamps) {
        ("json", true) => subscriber.json().init(),
        ("json", false) => subscriber.json().without_time().init(),
        (_, true) => subscriber.init(),
        (_, false) => subscriber.without_time().init(),
    }
}

/// Load the configuration file, or defaults with environment overrides
fn load(args: &Args) -> Result<Config> {
    match &args.config_path {
        Some(path) => load_config_with_env(path)
            .with_context(|| format!("Failed to load configuration from {path:?}")),
        None => load_default_with_env().context("Invalid environment override"),
    }
}

fn print_report(report: &SimulationReport) {
    match &report.outcome {
        Ok(()) => println!("COMMITTED in {:.2}ms", report.elapsed.as_secs_f64() * 1000.0),
        Err(e) => println!("ABORTED in {:.2}ms: {e}", report.elapsed.as_secs_f64() * 1000.0),
    }

    println!("  acknowledged: {}", report.primary.acknowledged.len());
    for (peer, cause) in &report.primary.failures {
        println!("  failed:       {peer} ({cause})");
    }
    for peer in &report.primary.participants {
        println!("  outstanding:  {peer}");
    }
    for late in &report.primary.late_failures {
        println!("  late failure: {late}");
    }
    println!(
        "  replicas:     {} committed, {} prepared, {} aborted",
        report.replicas_in(TransactionState::Committed),
        report.replicas_in(TransactionState::Prepared),
        report.replicas_in(TransactionState::Aborted),
    );
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse()?;

    if let Some(path) = &args.generate_config {
        replica_commit::config::create_default_config(path)?;
        println!("Generated default configuration at {path:?}");
        return Ok(());
    }

    let config = load(&args)?;
    init_logging(&config);

    info!("replica-commit v{}", replica_commit::VERSION);

    let report = simulation::run(&args.simulation, &config.transaction).await?;
    if !report.committed() {
        warn!("Creation aborted");
    }
    print_report(&report);

    report
        .ensure_committed()
        .context("Simulated creation did not commit")?;
    Ok(())
}
