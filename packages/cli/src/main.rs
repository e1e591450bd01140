use anyhow::Result;
use clap::{Parser, Subcommand};
use tickstep::{Runtime, RuntimeBuilder, RuntimeConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod scenarios;

use scenarios::Report;

/// tickstep scenario harness
/// Runs the canonical concurrency scenarios in real or virtual time
#[derive(Parser)]
#[command(name = "tickstep", version)]
#[command(about = "Run tickstep concurrency scenarios", long_about = None)]
struct Cli {
    /// Run scenario threads on virtual time (also TICKSTEP_SIM_TICKS)
    #[arg(long, global = true)]
    sim_ticks: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Three threads passing a token around a ring
    RoundRobin {
        #[arg(long, default_value_t = 3)]
        rounds: usize,
    },
    /// A thread timing out on its own semaphore
    TimedWait {
        #[arg(long, default_value_t = 333)]
        timeout_ms: u64,
    },
    /// A periodic interval that overruns once and resynchronizes
    Slippage {
        #[arg(long, default_value_t = 10)]
        period_ms: u64,
        #[arg(long, default_value_t = 5)]
        boundaries: usize,
    },
    /// Synchronous requests to a mailbox server
    Echo {
        #[arg(long, default_value_t = 5)]
        messages: u32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = RuntimeConfig::from_env();
    config.sim_ticks |= cli.sim_ticks;
    let runtime: Runtime = RuntimeBuilder::from_config(config).build();
    info!(sim_ticks = runtime.config().sim_ticks, "tickstep harness starting");

    let report = match cli.command {
        Commands::RoundRobin { rounds } => scenarios::round_robin(&runtime, rounds)?,
        Commands::TimedWait { timeout_ms } => scenarios::timed_wait(&runtime, timeout_ms)?,
        Commands::Slippage {
            period_ms,
            boundaries,
        } => scenarios::slippage(&runtime, period_ms, boundaries)?,
        Commands::Echo { messages } => scenarios::echo(&runtime, messages)?,
    };

    print_report(&report, cli.json)
}

fn print_report(report: &Report, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("scenario:   {}", report.scenario);
    println!("time base:  {}", if report.sim_ticks { "virtual" } else { "real" });
    println!("final time: {} ms", report.final_ms);
    for line in &report.lines {
        println!("  {line}");
    }
    Ok(())
}
