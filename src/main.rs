//! Quicksilver inliner CLI
//!
//! Runs the inlining stage over a JSON fixture and prints the rewritten IR.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quicksilver_inliner::fixture::Fixture;
use quicksilver_inliner::ir::dump::dump_func;
use quicksilver_inliner::{inline_job, InlineContext, InlinerConfig, VERSION};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quicksilver-inliner")]
#[command(author, version, about = "Profile-driven function inlining for the Quicksilver JIT", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Inline a fixture's entry function and print the result
    Run {
        /// The fixture to inline
        fixture: PathBuf,

        /// Inliner configuration (JSON); defaults apply otherwise
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Print only the statistics
        #[arg(long)]
        stats_only: bool,

        /// Show how long inlining took
        #[arg(short, long)]
        time: bool,
    },

    /// Print a fixture's entry function without inlining anything
    Dump {
        fixture: PathBuf,
    },

    /// Validate a configuration file
    CheckConfig {
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let result = match cli.command {
        Commands::Run {
            fixture,
            config,
            stats_only,
            time,
        } => run_fixture(&fixture, config.as_deref(), stats_only, time),
        Commands::Dump { fixture } => dump_fixture(&fixture),
        Commands::CheckConfig { config } => check_config(&config),
    };

    if let Err(e) = result {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn setup_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<InlinerConfig> {
    match path {
        Some(path) => InlinerConfig::from_path(path)
            .with_context(|| format!("loading configuration '{}'", path.display())),
        None => Ok(InlinerConfig::default()),
    }
}

fn run_fixture(path: &Path, config: Option<&Path>, stats_only: bool, time: bool) -> Result<()> {
    let config = load_config(config)?;
    let fixture = Fixture::from_path(path).with_context(|| format!("loading fixture '{}'", path.display()))?;
    let mut job = fixture.build_job().context("building the entry function")?;
    let ctx = InlineContext::default();

    let start = Instant::now();
    let stats = inline_job(&mut job, &ctx, &config, &fixture.decider(), &fixture.ir_builder())
        .with_context(|| format!("inlining '{}'", fixture.entry))?;
    let elapsed = start.elapsed();

    if !stats_only {
        print!("{}", dump_func(&job, job.top()));
        println!();
    }
    println!("{}", stats);
    if time {
        eprintln!("inlined in {:?}", elapsed);
    }
    Ok(())
}

fn dump_fixture(path: &Path) -> Result<()> {
    let fixture = Fixture::from_path(path).with_context(|| format!("loading fixture '{}'", path.display()))?;
    let job = fixture.build_job().context("building the entry function")?;
    print!("{}", dump_func(&job, job.top()));
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = load_config(Some(path))?;
    println!(
        "{}: ok (quicksilver-inliner {}, argout limit {}, polymorphic limit {})",
        path.display(),
        VERSION,
        config.argout_limit(),
        config.polymorphic_limit()
    );
    Ok(())
}
