mod bench;
mod consumer;
mod coordinator;
mod error;
mod logging;
mod producer;
mod shared_queue;
mod types;

use std::io::{self, IsTerminal};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::coordinator::{DEFAULT_CONSUMERS, DEFAULT_MAX_DELAY_MS, RunConfig};
use crate::types::WaitStrategy;

/// One producer, several consumers, one locked queue, and an end-of-stream
/// marker that every consumer sees.
#[derive(Parser, Debug)]
#[command(name = "sentinel_buffer", version, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    demo: DemoArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Single silent run; prints one CSV row with timing and CPU usage.
    Bench(BenchArgs),
    /// Sweep item counts, consumer counts and wait strategies; prints CSV.
    Stress(StressArgs),
}

#[derive(Args, Debug)]
struct LogArgs {
    /// Emit debug diagnostics on stderr (RUST_LOG takes precedence).
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct DemoArgs {
    /// Number of consumer threads.
    #[arg(long, default_value_t = DEFAULT_CONSUMERS, value_parser = parse_positive)]
    consumers: usize,

    /// Comma-separated items to produce (default: 1,2,3,4,5).
    #[arg(long, value_delimiter = ',', conflicts_with = "count")]
    items: Option<Vec<String>>,

    /// Produce the synthetic items 1..=N instead.
    #[arg(long)]
    count: Option<usize>,

    /// Upper bound of the random pause after each append, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_MAX_DELAY_MS)]
    max_delay_ms: u64,

    /// How consumers wait on an empty queue.
    #[arg(long, value_enum, default_value_t = WaitStrategy::Block)]
    wait: WaitStrategy,

    /// Seed for the pause generator.
    #[arg(long)]
    seed: Option<u64>,

    /// Interrupt the producer's pause once after this many milliseconds.
    #[arg(long)]
    interrupt_after_ms: Option<u64>,

    /// Disable ANSI colors in the trace.
    #[arg(long)]
    no_color: bool,

    /// Print only the summary.
    #[arg(short, long)]
    quiet: bool,

    #[command(flatten)]
    log: LogArgs,
}

#[derive(Args, Debug)]
struct BenchArgs {
    #[arg(long, default_value_t = bench::DEFAULT_BENCH_ITEMS)]
    items: usize,

    #[arg(long, default_value_t = bench::DEFAULT_BENCH_CONSUMERS, value_parser = parse_positive)]
    consumers: usize,

    #[arg(long, value_enum, default_value_t = WaitStrategy::Block)]
    wait: WaitStrategy,

    #[arg(long, default_value_t = 0)]
    max_delay_ms: u64,

    #[command(flatten)]
    log: LogArgs,
}

#[derive(Args, Debug)]
struct StressArgs {
    /// Comma-separated item counts.
    #[arg(long, value_delimiter = ',')]
    item_sets: Option<Vec<usize>>,

    /// Comma-separated consumer counts (each > 0).
    #[arg(long, value_delimiter = ',', value_parser = parse_positive)]
    consumer_sets: Option<Vec<usize>>,

    /// Comma-separated wait strategies.
    #[arg(long, value_delimiter = ',', value_enum)]
    waits: Option<Vec<WaitStrategy>>,

    #[arg(long, default_value_t = 0)]
    max_delay_ms: u64,

    #[command(flatten)]
    log: LogArgs,
}

fn parse_positive(arg: &str) -> Result<usize, String> {
    match arg.trim().parse::<usize>() {
        Ok(0) => Err("must be greater than zero".to_string()),
        Ok(value) => Ok(value),
        Err(err) => Err(err.to_string()),
    }
}

impl DemoArgs {
    fn into_config(self) -> RunConfig {
        let defaults = RunConfig::default();
        let items = match (self.items, self.count) {
            (Some(items), _) => items,
            (None, Some(count)) => RunConfig::synthetic_items(count),
            (None, None) => defaults.items,
        };
        RunConfig {
            items,
            consumers: self.consumers,
            max_delay_ms: self.max_delay_ms,
            wait: self.wait,
            seed: self.seed,
            color: !self.no_color && io::stdout().is_terminal(),
            echo: !self.quiet,
            interrupt_after: self.interrupt_after_ms.map(Duration::from_millis),
        }
    }
}

fn run_demo(args: DemoArgs) -> anyhow::Result<bool> {
    let config = args.into_config();
    let report = coordinator::run(&config)?;
    let violations = report.verify();
    report.print_summary(&violations);
    Ok(violations.is_empty())
}

fn execute(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Some(Command::Bench(args)) => {
            logging::init_tracing(args.log.verbose);
            bench::run_benchmark(args.items, args.consumers, args.wait, args.max_delay_ms)
        }
        Some(Command::Stress(args)) => {
            logging::init_tracing(args.log.verbose);
            let item_sets = args
                .item_sets
                .unwrap_or_else(|| bench::DEFAULT_STRESS_ITEM_SETS.to_vec());
            let consumer_sets = args
                .consumer_sets
                .unwrap_or_else(|| bench::DEFAULT_STRESS_CONSUMER_SETS.to_vec());
            let waits = args
                .waits
                .unwrap_or_else(|| bench::DEFAULT_STRESS_WAITS.to_vec());
            bench::run_stress(&item_sets, &consumer_sets, &waits, args.max_delay_ms)
        }
        None => {
            logging::init_tracing(cli.demo.log.verbose);
            run_demo(cli.demo)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match execute(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
