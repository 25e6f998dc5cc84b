//! CLI entry point for scope-daq.
//!
//! ```bash
//! scope-daq                         # interactive acquisition (default)
//! scope-daq --config lab.toml acquire
//! scope-daq init-ledger             # create an empty run ledger table
//! scope-daq inspect data/run_00042.daq
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use scope_daq::archive;
use scope_daq::beam::{BeamStatusLookup, FixedBeamTag, MemcacheLookup, UNKNOWN_BEAM_TAG};
use scope_daq::clock::{Clock, TokioClock};
use scope_daq::config::Settings;
use scope_daq::controller::{RunController, SessionContext};
use scope_daq::instrument::lecroy::LeCroyConnector;
use scope_daq::instrument::mock::{MockConnector, MockScopeConfig};
use scope_daq::instrument::ScopeConnector;
use scope_daq::interrupt::Interrupt;
use scope_daq::ledger::csv::CsvLedger;
use scope_daq::operator::TerminalOperator;
use scope_daq::session::Session;
use scope_daq::storage::format_for;
use scope_daq::storage::framed::ContainerReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "scope-daq")]
#[command(about = "Triggered oscilloscope acquisition with a run ledger", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the interactive acquisition session
    Acquire,
    /// Create an empty run ledger table
    InitLedger,
    /// List the events stored in a run container
    Inspect {
        /// Path to a `.daq` container
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("failed to load configuration")?;
    init_tracing(&settings.application.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    let result = runtime.block_on(async {
        match cli.command.unwrap_or(Commands::Acquire) {
            Commands::Acquire => acquire(settings).await,
            Commands::InitLedger => init_ledger(&settings),
            Commands::Inspect { file } => inspect(&file),
        }
    });
    // a console read may still be parked on stdin
    runtime.shutdown_timeout(Duration::from_millis(200));
    result
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn acquire(settings: Settings) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(TokioClock);
    let interrupt = Interrupt::new();
    let _ctrl_c = interrupt.forward_ctrl_c();

    let connector: Arc<dyn ScopeConnector> = match settings.instrument.driver.as_str() {
        "mock" => Arc::new(MockConnector::new(MockScopeConfig::default())),
        _ => Arc::new(LeCroyConnector::new(&settings.instrument, clock.clone())),
    };
    let beam: Arc<dyn BeamStatusLookup> = if settings.beam.enabled {
        Arc::new(MemcacheLookup::new(&settings.beam))
    } else {
        Arc::new(FixedBeamTag(UNKNOWN_BEAM_TAG.to_string()))
    };
    let format = format_for(&settings.storage.format)?;

    let ctx = SessionContext::new(
        &settings,
        Arc::new(CsvLedger::new(&settings.ledger.path)),
        beam,
        Arc::from(archive::from_settings(&settings.archive)),
        Arc::from(format),
    );
    tracing::info!(
        driver = %settings.instrument.driver,
        address = %settings.instrument.address,
        data = %settings.storage.path.display(),
        "starting acquisition session"
    );

    let mut session = Session::new(
        &settings,
        RunController::new(ctx),
        connector,
        clock,
        interrupt.clone(),
    );
    let mut operator = TerminalOperator::stdio(interrupt);
    let report = session.run(&mut operator).await;
    tracing::info!(
        runs = report.runs.len(),
        refused = report.refused,
        connections = report.connections,
        "session finished"
    );
    Ok(())
}

fn init_ledger(settings: &Settings) -> Result<()> {
    let ledger = CsvLedger::new(&settings.ledger.path);
    if ledger.create()? {
        println!("Created run ledger {}", ledger.path().display());
    } else {
        println!("Run ledger {} already exists", ledger.path().display());
    }
    Ok(())
}

fn inspect(path: &Path) -> Result<()> {
    let reader = ContainerReader::open(path)?;
    println!(
        "run {:05}: {} channel(s), target {} events, created {}",
        reader.info.run_id, reader.info.channels, reader.info.target_events, reader.info.created
    );
    for stored in &reader.entries {
        println!(
            "  {:>6}  channels {}  samples {:>8}  epoch {:.6}",
            stored.index,
            stored.event.channel_count(),
            stored.event.sample_count(),
            stored.event.epoch_timestamp
        );
    }
    println!("{} event(s)", reader.len());
    if reader.torn_bytes > 0 {
        println!("{} trailing byte(s) from an incomplete append ignored", reader.torn_bytes);
    }
    Ok(())
}
